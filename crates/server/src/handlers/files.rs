//! File registration and lookup handlers.

use crate::error::{ApiError, ApiResult};
use crate::ingest::ValidationError;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tessera_core::{File, FileHash, FileId, FileState, RegisterFile};

fn parse_file_id(raw: &str) -> ApiResult<FileId> {
    FileId::parse(raw).map_err(|e| {
        ApiError::Ingest(
            ValidationError::InvalidField {
                field: "file_id",
                reason: e.to_string(),
            }
            .into(),
        )
    })
}

/// Page size when none is given.
pub const DEFAULT_PER_PAGE: u32 = 20;
/// Largest page a client may request.
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<File>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// GET /v1/files - List registered files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<Json<FileListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = match query.per_page {
        None | Some(0) => DEFAULT_PER_PAGE,
        Some(n) if n > MAX_PER_PAGE => {
            return Err(ApiError::Ingest(
                ValidationError::InvalidField {
                    field: "per_page",
                    reason: format!("must be at most {MAX_PER_PAGE}"),
                }
                .into(),
            ));
        }
        Some(n) => n,
    };

    let (files, total) = state.coordinator.list_files(page, per_page).await?;
    Ok(Json(FileListResponse {
        files,
        page,
        per_page,
        total,
    }))
}

/// POST /v1/files - Register a file ahead of its chunks.
pub async fn create_file(
    State(state): State<AppState>,
    Json(request): Json<RegisterFile>,
) -> ApiResult<(StatusCode, Json<File>)> {
    let file = state.coordinator.register_file(request).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// GET /v1/files/{file_id}
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<File>> {
    let file_id = parse_file_id(&file_id)?;
    Ok(Json(state.coordinator.find_file(file_id).await?))
}

/// GET /v1/check/{hash} - Look up a file by its whole-file hash.
///
/// Lets a client skip uploading content the server already has.
pub async fn check_file_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<File>> {
    let hash = FileHash::from_hex(&hash.to_ascii_lowercase())
        .map_err(|_| ApiError::Ingest(ValidationError::MalformedHash(hash.clone()).into()))?;
    Ok(Json(state.coordinator.find_file_by_hash(&hash).await?))
}

/// GET /v1/files/{file_id}/data - Stream the assembled file.
///
/// Only finished files have assembled content.
pub async fn get_file_data(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let file = state.coordinator.find_file(file_id).await?;
    if file.state != FileState::Finished {
        return Err(ApiError::Conflict(format!(
            "file {} is {}, not finished",
            file.id, file.state
        )));
    }

    let stream = state.storage.get_stream(&file.hash.to_object_key()).await?;
    let content_type = if file.content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        file.content_type.clone()
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, file.size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
