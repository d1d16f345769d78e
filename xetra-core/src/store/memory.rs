//! In-memory object store for tests.

use super::{ObjectStore, StoreError};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Process-local object store backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    name: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every key currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".into())
}

impl ObjectStore for InMemoryStore {
    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects.get(key).cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "empty key".into(),
            });
        }
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(key.to_string(), body);
        Ok(())
    }
}
