// src/store/memory.rs -- in-memory store backend
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! A store held entirely in memory. Backs tests and sessions that opt out
//! of persistence; both tiers live in one mutex-protected value.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::errors::Result;
use crate::io::OpenResult;

use super::{BlobStore, RecordStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        Default::default()
    }
}

impl BlobStore for MemoryStore {
    fn write_blob(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_owned(), bytes.to_owned());
        Ok(())
    }

    fn read_blob(&self, path: &str) -> OpenResult<Vec<u8>> {
        match self.blobs.lock().unwrap().get(path) {
            Some(bytes) => OpenResult::Ok(bytes.clone()),
            None => OpenResult::NotAvailable,
        }
    }

    fn contains_blob(&self, path: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(path)
    }

    fn delete_blob(&self, path: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(path);
        Ok(())
    }

    fn clear_blobs(&self) -> Result<()> {
        self.blobs.lock().unwrap().clear();
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get_record(&self, key: &str) -> Option<Value> {
        self.records.lock().unwrap().get(key).cloned()
    }

    fn put_record(&self, key: &str, value: &Value) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.clone());
        Ok(())
    }

    fn delete_record(&self, key: &str) -> Result<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn clear_records(&self) -> Result<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_round_trip() {
        let store = MemoryStore::new();

        assert!(store.read_blob("/texlive/a.sty").is_not_available());

        store.write_blob("/texlive/a.sty", b"contents").unwrap();
        assert!(store.contains_blob("/texlive/a.sty"));
        assert_eq!(store.read_blob("/texlive/a.sty").unwrap(), b"contents");

        store.delete_blob("/texlive/a.sty").unwrap();
        assert!(!store.contains_blob("/texlive/a.sty"));
    }

    #[test]
    fn record_prefix_listing() {
        let store = MemoryStore::new();

        store.put_record("pkg:amsmath", &json!({"name": "amsmath"})).unwrap();
        store.put_record("pkg:geometry", &json!({"name": "geometry"})).unwrap();
        store.put_record("stats:p_1abc", &json!([])).unwrap();

        let keys = store.list_keys("pkg:");
        assert_eq!(keys, vec!["pkg:amsmath".to_owned(), "pkg:geometry".to_owned()]);

        assert!(store.get_record("pkg:amsmath").is_some());
        assert!(store.get_record("pkg:missing").is_none());
    }
}
