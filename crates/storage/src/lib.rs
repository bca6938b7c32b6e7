//! Object storage abstraction and backends for tessera.
//!
//! This crate provides:
//! - An [`ObjectStore`] trait with atomic, streaming writes
//! - A local filesystem backend
//! - [`ChunkStore`], content-addressable storage for chunk payloads

pub mod backends;
pub mod chunk_store;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use chunk_store::{ChunkStore, StoredChunk};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use std::sync::Arc;
use tessera_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
