// src/store/mod.rs -- the persistent two-tier store
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Persistent storage behind all of Lazytex's caches.
//!
//! Two logical tiers: a *blob* store holding file contents keyed by
//! canonical path (plus reserved `bundle:<name>` pseudo-paths for
//! decompressed bundle payloads), and a *record* store holding small JSON
//! records (package metadata, engine statistics, the alias table).
//!
//! Read misses are soft: a failed or missing read surfaces as
//! `NotAvailable`/`None` and the caller falls back to the network tier.

pub mod filesystem;
pub mod memory;

use std::sync::Arc;

use serde_json::Value;

use crate::errors::Result;
use crate::io::OpenResult;

/// The byte tier. Keys are canonical paths or `bundle:<name>`
/// pseudo-paths. Writes create intermediate directories and are atomic on
/// a per-path basis: concurrent writers race but readers never observe a
/// torn value.
pub trait BlobStore: Send + Sync {
    fn write_blob(&self, path: &str, bytes: &[u8]) -> Result<()>;

    fn read_blob(&self, path: &str) -> OpenResult<Vec<u8>>;

    fn contains_blob(&self, path: &str) -> bool;

    fn delete_blob(&self, path: &str) -> Result<()>;

    /// Drop every blob. Explicit user action only.
    fn clear_blobs(&self) -> Result<()>;
}

/// The record tier: small JSON documents under structured keys.
pub trait RecordStore: Send + Sync {
    /// A read miss — including a read that errors — is `None`.
    fn get_record(&self, key: &str) -> Option<Value>;

    fn put_record(&self, key: &str, value: &Value) -> Result<()>;

    fn delete_record(&self, key: &str) -> Result<()>;

    fn list_keys(&self, prefix: &str) -> Vec<String>;

    /// Drop every record. Explicit user action only.
    fn clear_records(&self) -> Result<()>;
}

/// Key grammar for the persisted layout.
pub fn bundle_blob_key(name: &str) -> String {
    format!("bundle:{}", name)
}

pub fn bundle_meta_key(name: &str) -> String {
    format!("bundle-meta:{}", name)
}

pub fn package_record_key(name: &str) -> String {
    format!("pkg:{}", name)
}

pub fn stats_record_key(fingerprint: &str) -> String {
    format!("stats:{}", fingerprint)
}

pub fn flag_record_key(fingerprint: &str, flag: &str) -> String {
    format!("flag:{}:{}", fingerprint, flag)
}

pub const ALIASES_RECORD_KEY: &str = "aliases";

/// A handle bundling the two tiers. Cheap to clone and share.
#[derive(Clone)]
pub struct Store {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl Store {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Store {
        Store { blobs, records }
    }

    /// An ephemeral store for tests and cache-less sessions.
    pub fn new_memory() -> Store {
        let backing = Arc::new(memory::MemoryStore::new());
        Store {
            blobs: backing.clone(),
            records: backing,
        }
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        &*self.blobs
    }

    pub fn records(&self) -> &dyn RecordStore {
        &*self.records
    }

    /// Total reset of all cached state; an explicit user action.
    pub fn reset(&self) -> Result<()> {
        self.blobs.clear_blobs()?;
        self.records.clear_records()?;
        Ok(())
    }
}
