//! Durable object store boundary.
//!
//! The pipeline persists final artifacts through the [`ObjectStore`]
//! trait; production uses an S3-compatible bucket (R2), tests use the
//! in-memory store.

pub mod client;
pub mod error;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryObjectStore;

/// Durable artifact storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, returning its public URL.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str)
        -> StorageResult<String>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
