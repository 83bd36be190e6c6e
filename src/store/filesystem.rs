// src/store/filesystem.rs -- on-disk store backend
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The on-disk store. Blobs live in a hierarchical tree mirroring their
//! canonical paths, bundle payloads in a flat directory keyed by name, and
//! records as individual JSON files. Writes stage into a temporary file in
//! the target directory and rename over the destination, so readers see
//! old or new content but never a torn value.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::errors::{ErrorKind, Result};
use crate::io::{normalize_engine_path, OpenResult};

use super::{BlobStore, RecordStore};

const BLOBS_DIR: &str = "blobs";
const BUNDLES_DIR: &str = "bundles";
const RECORDS_DIR: &str = "records";
const LOCK_NAME: &str = ".lock";

const BUNDLE_KEY_PREFIX: &str = "bundle:";

#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<FilesystemStore> {
        let root = root.into();

        for sub in &[BLOBS_DIR, BUNDLES_DIR, RECORDS_DIR] {
            fs::create_dir_all(root.join(sub))?;
        }

        Ok(FilesystemStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if let Some(name) = key.strip_prefix(BUNDLE_KEY_PREFIX) {
            if name.is_empty() || name.contains('/') {
                return Err(ErrorKind::PathForbidden(key.to_owned()).into());
            }
            return Ok(self.root.join(BUNDLES_DIR).join(format!("{}.bin", name)));
        }

        match normalize_engine_path(key) {
            Some(ref normed) if normed.len() > 1 => {
                Ok(self.root.join(BLOBS_DIR).join(&normed[1..]))
            }
            _ => Err(ErrorKind::PathForbidden(key.to_owned()).into()),
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        // ':' is not portable in file names; '@' never appears in keys.
        let encoded = key.replace(':', "@");
        self.root
            .join(RECORDS_DIR)
            .join(format!("{}.json", encoded))
    }

    fn record_lock(&self) -> Result<File> {
        let path = self.root.join(RECORDS_DIR).join(LOCK_NAME);
        let f = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)?;
        f.lock_exclusive()?;
        Ok(f)
    }

    fn write_atomically(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let parent = match target.parent() {
            Some(p) => p,
            None => return Err(ErrorKind::PathForbidden(target.display().to_string()).into()),
        };

        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        staged.write_all(bytes)?;
        staged
            .persist(target)
            .map_err(|e| crate::errors::Error::from(e.error))?;
        Ok(())
    }
}

impl BlobStore for FilesystemStore {
    fn write_blob(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.blob_path(path)?;
        self.write_atomically(&target, bytes)
    }

    fn read_blob(&self, path: &str) -> OpenResult<Vec<u8>> {
        let target = match self.blob_path(path) {
            Ok(p) => p,
            Err(e) => return OpenResult::Err(e),
        };

        let mut f = match File::open(&target) {
            Ok(f) => f,
            Err(ref e) if e.kind() == IoErrorKind::NotFound => return OpenResult::NotAvailable,
            Err(e) => return OpenResult::Err(e.into()),
        };

        let mut bytes = Vec::new();
        if let Err(e) = f.read_to_end(&mut bytes) {
            return OpenResult::Err(e.into());
        }

        OpenResult::Ok(bytes)
    }

    fn contains_blob(&self, path: &str) -> bool {
        match self.blob_path(path) {
            Ok(p) => p.is_file(),
            Err(_) => false,
        }
    }

    fn delete_blob(&self, path: &str) -> Result<()> {
        let target = self.blob_path(path)?;

        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_blobs(&self) -> Result<()> {
        for sub in &[BLOBS_DIR, BUNDLES_DIR] {
            let dir = self.root.join(sub);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

impl RecordStore for FilesystemStore {
    fn get_record(&self, key: &str) -> Option<Value> {
        let mut f = File::open(self.record_path(key)).ok()?;
        let mut text = String::new();
        f.read_to_string(&mut text).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn put_record(&self, key: &str, value: &Value) -> Result<()> {
        let _lock = self.record_lock()?;
        let text = serde_json::to_string(value)?;
        self.write_atomically(&self.record_path(key), text.as_bytes())
    }

    fn delete_record(&self, key: &str) -> Result<()> {
        let _lock = self.record_lock()?;

        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        let dir = match fs::read_dir(self.root.join(RECORDS_DIR)) {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };

        let mut keys: Vec<String> = dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_suffix(".json")?;
                Some(stem.replace('@', ":"))
            })
            .filter(|key| key.starts_with(prefix))
            .collect();

        keys.sort();
        keys
    }

    fn clear_records(&self) -> Result<()> {
        let dir = self.root.join(RECORDS_DIR);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(())
    }
}
