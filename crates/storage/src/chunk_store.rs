//! Content-addressable chunk payload storage.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tessera_core::{ChunkHash, ContentHasher};
use tracing::debug;

/// Result of a [`ChunkStore::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredChunk {
    /// Size of the blob now stored under the digest.
    pub size: u64,
    /// False when an identical blob was already present and nothing was written.
    pub created: bool,
}

/// Stores chunk payloads keyed solely by their digest.
///
/// Identical payloads share one blob no matter which file they belong to.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn ObjectStore>,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The underlying object store.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Check whether a payload with this digest is stored.
    pub async fn exists(&self, hash: &ChunkHash) -> StorageResult<bool> {
        self.store.exists(&hash.to_object_key()).await
    }

    /// Stream a payload into storage under `hash`.
    ///
    /// The payload is re-hashed while it is written and published only if it
    /// matches `hash`; on any error nothing becomes visible at the key.
    /// Writing a digest that is already stored is a no-op.
    pub async fn write<S>(&self, hash: &ChunkHash, body: S) -> StorageResult<StoredChunk>
    where
        S: Stream<Item = StorageResult<Bytes>> + Send,
    {
        let key = hash.to_object_key();
        if self.store.exists(&key).await? {
            let meta = self.store.head(&key).await?;
            debug!(chunk_hash = %hash, size = meta.size, "Chunk blob already stored");
            return Ok(StoredChunk {
                size: meta.size,
                created: false,
            });
        }

        let mut upload = self.store.put_stream(&key).await?;
        let mut hasher = ContentHasher::new();
        let mut body = std::pin::pin!(body);
        while let Some(next) = body.next().await {
            let written = match next {
                Ok(data) => {
                    hasher.update(&data);
                    upload.write(data).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                discard(upload).await;
                return Err(e);
            }
        }

        let actual = ChunkHash::from_content_hash(hasher.finalize());
        if actual != *hash {
            discard(upload).await;
            return Err(StorageError::HashMismatch {
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let size = upload.finish().await?;
        debug!(chunk_hash = %hash, size, backend = self.store.backend_name(), "Chunk blob stored");
        Ok(StoredChunk {
            size,
            created: true,
        })
    }

    /// Store an in-memory payload under `hash`.
    pub async fn write_bytes(&self, hash: &ChunkHash, data: Bytes) -> StorageResult<StoredChunk> {
        self.write(hash, futures::stream::once(async move { Ok(data) }))
            .await
    }

    /// Open a stored payload for reading.
    pub async fn read(&self, hash: &ChunkHash) -> StorageResult<ByteStream> {
        self.store.get_stream(&hash.to_object_key()).await
    }
}

async fn discard(upload: Box<dyn StreamingUpload>) {
    if let Err(e) = upload.abort().await {
        debug!(error = %e, "Failed to discard partial chunk upload");
    }
}
