//! In-memory object store for tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageResult;
use crate::ObjectStore;

/// Object store keeping uploads in a map. URLs are synthesized under a
/// fixed fake host.
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Whether a key exists.
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(
        &self,
        path: &Path,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        let bytes = tokio::fs::read(path).await?;
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(format!("https://storage.test/{key}"))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}
