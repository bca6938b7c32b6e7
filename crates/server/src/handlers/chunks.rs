//! Chunk upload handler.

use crate::error::ApiResult;
use crate::ingest::ChunkUpload;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde::{Deserialize, Serialize};
use tessera_core::Chunk;

#[derive(Debug, Default, Deserialize)]
pub struct ChunkUploadQuery {
    /// Session token to notify when the file finishes.
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkUploadResponse {
    pub chunk: Chunk,
    /// False when identical content was already stored.
    pub blob_created: bool,
}

/// POST /v1/files/{file_id}/chunks/{position}/{hash} - Upload one chunk.
///
/// Responds as soon as the chunk is recorded; completion is evaluated in the
/// background.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((file_id, position, hash)): Path<(String, String, String)>,
    Query(query): Query<ChunkUploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<ChunkUploadResponse>)> {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let upload = ChunkUpload {
        file_id: Some(file_id),
        position: Some(position),
        declared_length,
        client_hash: Some(hash),
        session: query.session,
    };

    let receipt = state
        .coordinator
        .ingest_chunk(upload, body.into_data_stream())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChunkUploadResponse {
            chunk: receipt.chunk,
            blob_created: receipt.blob_created,
        }),
    ))
}
