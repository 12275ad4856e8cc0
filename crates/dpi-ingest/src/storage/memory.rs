//! In-memory [`ObjectStore`] for tests and dry runs

use async_trait::async_trait;
use dpi_common::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::ObjectStore;

/// A process-local object store backed by a map.
///
/// Used by the test suite to exercise the cache state machine without a
/// running S3 endpoint, and by `--dry-run` style tooling. Rename is a map
/// move, so unlike S3 it is atomic; tests that care about the
/// copy-then-delete window must use a real store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key currently present
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: Option<String>) -> Result<()> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.remove(from) {
            Some(data) => {
                objects.insert(to.to_string(), data);
                Ok(true)
            },
            None => Ok(false),
        }
    }
}
