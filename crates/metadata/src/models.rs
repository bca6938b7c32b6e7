//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use std::num::TryFromIntError;
use tessera_core::{Chunk, ChunkHash, ChunkId, File, FileHash, FileId, FileState};
use time::OffsetDateTime;
use uuid::Uuid;

/// File registry record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    /// Lowercase hex digest of the whole file. Unique.
    pub file_hash: String,
    pub size_bytes: i64,
    pub num_chunks: i32,
    pub name: String,
    pub content_type: String,
    /// One of `incomplete`, `processing`, `finished`.
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Chunk ledger record. Unique on `(file_id, chunk_hash)`.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub position: i32,
    pub size_bytes: i64,
    pub chunk_hash: String,
    pub created_at: OffsetDateTime,
}

fn out_of_range(field: &str, e: TryFromIntError) -> tessera_core::Error {
    tessera_core::Error::InvalidDescriptor(format!("{field} out of range: {e}"))
}

impl FileRow {
    /// Build a fresh `incomplete` row.
    pub fn new_incomplete(
        hash: &FileHash,
        size: u64,
        num_chunks: u32,
        name: &str,
        content_type: &str,
        now: OffsetDateTime,
    ) -> tessera_core::Result<Self> {
        Ok(Self {
            file_id: *FileId::new().as_uuid(),
            file_hash: hash.to_hex(),
            size_bytes: i64::try_from(size).map_err(|e| out_of_range("size", e))?,
            num_chunks: i32::try_from(num_chunks).map_err(|e| out_of_range("num_chunks", e))?,
            name: name.to_string(),
            content_type: content_type.to_string(),
            state: FileState::Incomplete.as_str().to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}

impl TryFrom<FileRow> for File {
    type Error = tessera_core::Error;

    fn try_from(row: FileRow) -> tessera_core::Result<Self> {
        Ok(File {
            id: FileId::from_uuid(row.file_id),
            hash: FileHash::from_hex(&row.file_hash)?,
            size: u64::try_from(row.size_bytes).map_err(|e| out_of_range("size_bytes", e))?,
            num_chunks: u32::try_from(row.num_chunks)
                .map_err(|e| out_of_range("num_chunks", e))?,
            name: row.name,
            content_type: row.content_type,
            state: FileState::parse(&row.state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl ChunkRow {
    /// Build a ledger row for a freshly stored payload.
    pub fn new(
        file_id: FileId,
        position: u32,
        size: u64,
        hash: &ChunkHash,
        now: OffsetDateTime,
    ) -> tessera_core::Result<Self> {
        Ok(Self {
            chunk_id: *ChunkId::new().as_uuid(),
            file_id: *file_id.as_uuid(),
            position: i32::try_from(position).map_err(|e| out_of_range("position", e))?,
            size_bytes: i64::try_from(size).map_err(|e| out_of_range("size", e))?,
            chunk_hash: hash.to_hex(),
            created_at: now,
        })
    }
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = tessera_core::Error;

    fn try_from(row: ChunkRow) -> tessera_core::Result<Self> {
        Ok(Chunk {
            id: ChunkId::from_uuid(row.chunk_id),
            file_id: FileId::from_uuid(row.file_id),
            position: u32::try_from(row.position).map_err(|e| out_of_range("position", e))?,
            size: u64::try_from(row.size_bytes).map_err(|e| out_of_range("size_bytes", e))?,
            hash: ChunkHash::from_hex(&row.chunk_hash)?,
            created_at: row.created_at,
        })
    }
}
