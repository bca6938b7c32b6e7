//! Test fixtures for generating test data.

use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use tessera_core::{ChunkHash, ContentHash, File, RegisterFile};
use tessera_server::ChunkUpload;
use uuid::Uuid;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Hex SHA-256 of `data`.
#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Split data into chunks of specified size.
#[allow(dead_code)]
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Registration request for `data` split into `num_chunks` chunks.
#[allow(dead_code)]
pub fn register_request(data: &[u8], num_chunks: u32) -> RegisterFile {
    RegisterFile {
        hash: sha256_hex(data),
        size: data.len() as u64,
        num_chunks,
        name: "upload.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
    }
}

/// A well-formed upload of `data` at `position` of `file`.
#[allow(dead_code)]
pub fn chunk_upload(file: &File, position: u32, data: &[u8]) -> ChunkUpload {
    ChunkUpload {
        file_id: Some(file.id.to_string()),
        position: Some(position.to_string()),
        declared_length: Some(data.len() as u64),
        client_hash: Some(ChunkHash::compute(data).to_hex()),
        session: None,
    }
}

/// Same as [`chunk_upload`] with a session token.
#[allow(dead_code)]
pub fn chunk_upload_with_session(
    file: &File,
    position: u32,
    data: &[u8],
    session: Uuid,
) -> ChunkUpload {
    ChunkUpload {
        session: Some(session.to_string()),
        ..chunk_upload(file, position, data)
    }
}

/// A single-item request body.
#[allow(dead_code)]
pub fn body(data: Bytes) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    futures::stream::once(async move { Ok(data) })
}

/// A request body delivered in `piece`-sized frames.
#[allow(dead_code)]
pub fn framed_body(data: Bytes, piece: usize) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    futures::stream::iter(split_into_chunks(&data, piece).into_iter().map(Ok))
}
