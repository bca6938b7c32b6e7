//! Chunk ledger repository.

use crate::error::MetadataResult;
use crate::models::ChunkRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for chunk ledger rows.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Check whether a chunk with this hash is already recorded for the file.
    async fn chunk_exists_for_file(&self, file_id: Uuid, chunk_hash: &str)
    -> MetadataResult<bool>;

    /// Count committed chunk rows for the file.
    async fn count_chunks_for_file(&self, file_id: Uuid) -> MetadataResult<u64>;

    /// Record a stored chunk.
    ///
    /// Returns `AlreadyExists` when `(file_id, chunk_hash)` is already
    /// recorded. This is the authoritative dedup signal under concurrency.
    async fn insert_chunk(&self, chunk: &ChunkRow) -> MetadataResult<()>;

    /// All chunk rows for the file ordered by position, then insertion time.
    async fn get_chunks_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<ChunkRow>>;
}
