//! Post-ingestion processing run once a file's chunk set is complete.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tessera_core::{Chunk, ContentHasher, File, FileHash};
use tessera_metadata::{MetadataError, MetadataStore};
use tessera_storage::{ChunkStore, StorageError, StreamingUpload};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a finalize run.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("chunk {hash} at position {position} is missing from storage")]
    MissingChunk { position: u32, hash: String },

    #[error("assembled size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("assembled hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Processing step invoked by the completion detector after it claims a file.
///
/// Runs at most once per claim. Implementations should be idempotent, since
/// the recovery sweep re-runs finalize for files left in processing.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, file: &File) -> Result<(), FinalizeError>;
}

/// Assembles chunk blobs, in ledger order, into one object keyed by the
/// whole-file hash, verifying size and digest before publishing.
pub struct AssemblingFinalizer {
    metadata: Arc<dyn MetadataStore>,
    chunks: ChunkStore,
}

impl AssemblingFinalizer {
    pub fn new(metadata: Arc<dyn MetadataStore>, chunks: ChunkStore) -> Self {
        Self { metadata, chunks }
    }

    async fn ledger(&self, file: &File) -> Result<Vec<Chunk>, FinalizeError> {
        let rows = self.metadata.get_chunks_for_file(*file.id.as_uuid()).await?;
        rows.into_iter()
            .map(|row| Chunk::try_from(row).map_err(|e| FinalizeError::Metadata(e.into())))
            .collect()
    }

    /// Stream every chunk into `upload`, returning the assembled size and digest.
    async fn copy_chunks(
        &self,
        file: &File,
        chunks: &[Chunk],
        upload: &mut Box<dyn StreamingUpload>,
    ) -> Result<(u64, FileHash), FinalizeError> {
        let mut hasher = ContentHasher::new();
        for chunk in chunks {
            let mut body = match self.chunks.read(&chunk.hash).await {
                Ok(body) => body,
                Err(StorageError::NotFound(_)) => {
                    return Err(FinalizeError::MissingChunk {
                        position: chunk.position,
                        hash: chunk.hash.to_hex(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            while let Some(data) = body.next().await {
                let data = data?;
                hasher.update(&data);
                if hasher.len() > file.size {
                    return Err(FinalizeError::SizeMismatch {
                        expected: file.size,
                        actual: hasher.len(),
                    });
                }
                upload.write(data).await?;
            }
        }
        let size = hasher.len();
        Ok((size, FileHash::from_content_hash(hasher.finalize())))
    }
}

#[async_trait]
impl Finalizer for AssemblingFinalizer {
    async fn finalize(&self, file: &File) -> Result<(), FinalizeError> {
        let store = self.chunks.object_store();
        let key = file.hash.to_object_key();
        if store.exists(&key).await? {
            debug!(file_id = %file.id, "Assembled file already stored");
            return Ok(());
        }

        let chunks = self.ledger(file).await?;
        let mut upload = store.put_stream(&key).await?;
        let assembled = self.copy_chunks(file, &chunks, &mut upload).await;

        let verdict = match assembled {
            Ok((size, _)) if size != file.size => Err(FinalizeError::SizeMismatch {
                expected: file.size,
                actual: size,
            }),
            Ok((_, hash)) if hash != file.hash => Err(FinalizeError::HashMismatch {
                expected: file.hash.to_hex(),
                actual: hash.to_hex(),
            }),
            other => other.map(|_| ()),
        };

        if let Err(e) = verdict {
            if let Err(abort_err) = upload.abort().await {
                debug!(file_id = %file.id, error = %abort_err, "Failed to discard partial assembly");
            }
            return Err(e);
        }

        let size = upload.finish().await?;
        info!(
            file_id = %file.id,
            file_hash = %file.hash,
            chunks = chunks.len(),
            size,
            "File assembled"
        );
        Ok(())
    }
}
