//! Chunk ingestion.
//!
//! [`IngestCoordinator::ingest_chunk`] handles one chunk upload:
//!
//! 1. validate the request shape, rejecting oversize chunks before any work
//! 2. resolve the owning file
//! 3. read the payload, bounded by the chunk size limit
//! 4. hash it
//! 5. compare against the client's digest
//! 6. reject duplicates already in the ledger, re-evaluating completion
//!    since a retry may follow a lost evaluation
//! 7. store the payload by digest
//! 8. record the ledger row (a uniqueness race is a duplicate, not a failure)
//! 9. hand the file to the completion detector without waiting for it
//!
//! Cross-request coordination relies only on the metadata store: the
//! `(file, chunk hash)` uniqueness constraint for dedup, and the conditional
//! state update for the completion claim.

use crate::completion::{CompletionDetector, CompletionHandle};
use crate::metrics::{
    BLOBS_REUSED, BYTES_STORED, CHUNK_UPLOAD_DURATION, CHUNKS_DEDUPLICATED, CHUNKS_STORED,
    FILES_REGISTERED, record_upload_error,
};
use crate::notify::SessionNotifier;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::config::IngestConfig;
use tessera_core::{Chunk, ChunkHash, File, FileHash, FileId, RegisterFile};
use tessera_metadata::models::{ChunkRow, FileRow};
use tessera_metadata::{MetadataError, MetadataStore};
use tessera_storage::{ChunkStore, StorageError};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Malformed or missing request fields. Not retryable without a client fix.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid position: {0:?}")]
    InvalidPosition(String),

    #[error("position {position} is out of range for a file of {num_chunks} chunks")]
    PositionOutOfRange { position: u32, num_chunks: u32 },

    #[error("content length required")]
    LengthRequired,

    #[error("chunk of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("malformed hash: {0:?}")]
    MalformedHash(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failure of a storage or metadata call.
#[derive(Debug, Error)]
pub enum StorageFailure {
    #[error(transparent)]
    Blob(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageFailure),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl IngestError {
    /// Stable code for error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::LengthRequired) => "length_required",
            Self::Validation(ValidationError::PayloadTooLarge { .. }) => "payload_too_large",
            Self::Validation(ValidationError::MalformedHash(_)) => "malformed_hash",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Integrity { .. } => "hash_mismatch",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
            Self::BodyRead(_) => "body_read_error",
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<MetadataError> for IngestError {
    fn from(err: MetadataError) -> Self {
        Self::Storage(err.into())
    }
}

/// An inbound chunk upload, as received.
///
/// Fields are raw so that missing or malformed values surface as
/// [`ValidationError`]s rather than transport-level rejections.
#[derive(Clone, Debug, Default)]
pub struct ChunkUpload {
    pub file_id: Option<String>,
    pub position: Option<String>,
    /// Declared payload length (the request's `Content-Length`).
    pub declared_length: Option<u64>,
    /// Client-computed digest of the payload.
    pub client_hash: Option<String>,
    /// Session to notify when the file finishes.
    pub session: Option<String>,
}

/// Upload fields after shape validation.
#[derive(Clone, Copy, Debug)]
struct ValidatedUpload {
    file_id: FileId,
    position: u32,
    client_hash: ChunkHash,
    session: Option<Uuid>,
}

/// Acknowledgment of a stored chunk.
pub struct ChunkReceipt {
    pub chunk: Chunk,
    /// False when the payload was already stored for another chunk.
    pub blob_created: bool,
    /// Completion evaluation triggered by this commit.
    pub completion: CompletionHandle,
}

pub struct IngestCoordinator {
    metadata: Arc<dyn MetadataStore>,
    chunks: ChunkStore,
    detector: Arc<CompletionDetector>,
    sessions: Arc<SessionNotifier>,
    config: IngestConfig,
}

impl IngestCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        chunks: ChunkStore,
        detector: Arc<CompletionDetector>,
        sessions: Arc<SessionNotifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            metadata,
            chunks,
            detector,
            sessions,
            config,
        }
    }

    /// Register a file before any of its chunks arrive.
    ///
    /// A file whose whole-file hash is already registered is a conflict,
    /// including when a concurrent registration wins the insert.
    pub async fn register_file(&self, request: RegisterFile) -> Result<File, IngestError> {
        let hash = request.validate().map_err(|e| match e {
            tessera_core::Error::InvalidHash(_) => ValidationError::MalformedHash(request.hash.clone()),
            other => ValidationError::InvalidField {
                field: "descriptor",
                reason: other.to_string(),
            },
        })?;

        if self
            .bounded("file lookup", self.metadata.get_file_by_hash(&hash.to_hex()))
            .await?
            .is_some()
        {
            return Err(duplicate_file(&hash));
        }

        let row = FileRow::new_incomplete(
            &hash,
            request.size,
            request.num_chunks,
            request.name.trim(),
            &request.content_type,
            OffsetDateTime::now_utc(),
        )
        .map_err(|e| ValidationError::InvalidField {
            field: "descriptor",
            reason: e.to_string(),
        })?;

        match self
            .bounded("file insert", self.metadata.create_file(&row))
            .await
        {
            Ok(()) => {}
            Err(IngestError::Storage(StorageFailure::Metadata(MetadataError::AlreadyExists(_)))) => {
                return Err(duplicate_file(&hash));
            }
            Err(e) => return Err(e),
        }

        let file = File::try_from(row).map_err(MetadataError::from)?;
        FILES_REGISTERED.inc();
        info!(
            file_id = %file.id,
            file_hash = %file.hash,
            size = file.size,
            num_chunks = file.num_chunks,
            "File registered"
        );
        Ok(file)
    }

    pub async fn find_file(&self, file_id: FileId) -> Result<File, IngestError> {
        let row = self
            .bounded("file lookup", self.metadata.get_file(*file_id.as_uuid()))
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("file {file_id}")))?;
        Ok(File::try_from(row).map_err(MetadataError::from)?)
    }

    pub async fn find_file_by_hash(&self, hash: &FileHash) -> Result<File, IngestError> {
        let row = self
            .bounded("file lookup", self.metadata.get_file_by_hash(&hash.to_hex()))
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("file with hash {hash}")))?;
        Ok(File::try_from(row).map_err(MetadataError::from)?)
    }

    /// One page of the registry, newest first, with the total file count.
    ///
    /// `page` is 1-based; page 0 is treated as the first page.
    pub async fn list_files(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<File>, u64), IngestError> {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(per_page);
        let rows = self
            .bounded("file listing", self.metadata.list_files(offset, per_page))
            .await?;
        let total = self
            .bounded("file count", self.metadata.count_files())
            .await?;
        let files = rows
            .into_iter()
            .map(File::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(MetadataError::from)?;
        Ok((files, total))
    }

    /// Ingest one chunk. See the module docs for the protocol.
    ///
    /// If the caller stops polling midway (for example the client
    /// disconnects), nothing partial is published and no row is recorded.
    pub async fn ingest_chunk<S, E>(
        &self,
        upload: ChunkUpload,
        body: S,
    ) -> Result<ChunkReceipt, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let result = self.ingest(upload, body).await;
        match &result {
            Ok(_) => CHUNK_UPLOAD_DURATION.observe(started.elapsed().as_secs_f64()),
            Err(e) => record_upload_error(e.code()),
        }
        result
    }

    async fn ingest<S, E>(&self, upload: ChunkUpload, body: S) -> Result<ChunkReceipt, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display,
    {
        let upload = self.validate(upload)?;

        let file = self.find_file(upload.file_id).await?;
        if upload.position >= file.num_chunks {
            return Err(ValidationError::PositionOutOfRange {
                position: upload.position,
                num_chunks: file.num_chunks,
            }
            .into());
        }

        let data = self.read_body(body).await?;
        let hash = ChunkHash::compute(&data);

        if hash != upload.client_hash {
            warn!(
                file_id = %file.id,
                position = upload.position,
                expected = %upload.client_hash,
                actual = %hash,
                "Chunk hash mismatch"
            );
            return Err(IngestError::Integrity {
                expected: upload.client_hash.to_hex(),
                actual: hash.to_hex(),
            });
        }

        let file_key = *file.id.as_uuid();
        if self
            .bounded(
                "chunk lookup",
                self.metadata.chunk_exists_for_file(file_key, &hash.to_hex()),
            )
            .await?
        {
            CHUNKS_DEDUPLICATED.inc();
            debug!(file_id = %file.id, chunk_hash = %hash, "Chunk already recorded");
            self.reevaluate(&file);
            return Err(duplicate_chunk(&file, &hash));
        }

        if !file.state.accepts_chunks() {
            return Err(IngestError::Conflict(format!(
                "file {} is {} and accepts no more chunks",
                file.id, file.state
            )));
        }

        let size = data.len() as u64;
        let stored = self
            .bounded("chunk write", self.chunks.write_bytes(&hash, data))
            .await?;

        let row = ChunkRow::new(
            file.id,
            upload.position,
            size,
            &hash,
            OffsetDateTime::now_utc(),
        )
        .map_err(MetadataError::from)?;
        match self
            .bounded("chunk insert", self.metadata.insert_chunk(&row))
            .await
        {
            Ok(()) => {}
            Err(IngestError::Storage(StorageFailure::Metadata(MetadataError::AlreadyExists(_)))) => {
                CHUNKS_DEDUPLICATED.inc();
                debug!(file_id = %file.id, chunk_hash = %hash, "Lost chunk insert race");
                self.reevaluate(&file);
                return Err(duplicate_chunk(&file, &hash));
            }
            Err(e) => return Err(e),
        }

        CHUNKS_STORED.inc();
        if stored.created {
            BYTES_STORED.inc_by(size);
        } else {
            BLOBS_REUSED.inc();
        }
        debug!(
            file_id = %file.id,
            position = upload.position,
            chunk_hash = %hash,
            size,
            blob_created = stored.created,
            "Chunk stored"
        );

        if let Some(token) = upload.session {
            self.sessions.associate(file.id, token);
        }
        let completion = self.detector.spawn(file.id);

        Ok(ChunkReceipt {
            chunk: Chunk::try_from(row).map_err(MetadataError::from)?,
            blob_created: stored.created,
            completion,
        })
    }

    /// Re-run completion for a retried chunk. The retry may be the only
    /// signal left if the evaluation after the original commit was lost.
    /// The claim is conditional, so a file is still finalized at most once.
    fn reevaluate(&self, file: &File) {
        if file.state.accepts_chunks() {
            self.detector.spawn(file.id);
        }
    }

    fn validate(&self, upload: ChunkUpload) -> Result<ValidatedUpload, ValidationError> {
        let max = self.config.max_chunk_size;
        match upload.declared_length {
            None | Some(0) => return Err(ValidationError::LengthRequired),
            Some(size) if size > max => return Err(ValidationError::PayloadTooLarge { size, max }),
            Some(_) => {}
        }

        let raw_id = non_empty(upload.file_id, "file_id")?;
        let file_id = FileId::parse(&raw_id).map_err(|e| ValidationError::InvalidField {
            field: "file_id",
            reason: e.to_string(),
        })?;

        let raw_position = non_empty(upload.position, "position")?;
        let position = raw_position
            .parse::<u32>()
            .map_err(|_| ValidationError::InvalidPosition(raw_position.clone()))?;

        let raw_hash = non_empty(upload.client_hash, "hash")?;
        let client_hash = ChunkHash::from_hex(&raw_hash)
            .map_err(|_| ValidationError::MalformedHash(raw_hash.clone()))?;

        let session = upload
            .session
            .filter(|s| !s.is_empty())
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| ValidationError::InvalidField {
                field: "session",
                reason: e.to_string(),
            })?;

        Ok(ValidatedUpload {
            file_id,
            position,
            client_hash,
            session,
        })
    }

    /// Buffer the payload, failing as soon as it exceeds the chunk limit.
    async fn read_body<S, E>(&self, body: S) -> Result<Bytes, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display,
    {
        let max = self.config.max_chunk_size;
        let read = async {
            let mut body = std::pin::pin!(body);
            let mut buf = BytesMut::new();
            while let Some(next) = body.next().await {
                let data = next.map_err(|e| IngestError::BodyRead(e.to_string()))?;
                let size = (buf.len() + data.len()) as u64;
                if size > max {
                    return Err(ValidationError::PayloadTooLarge { size, max }.into());
                }
                buf.extend_from_slice(&data);
            }
            Ok::<_, IngestError>(buf.freeze())
        };

        let data = tokio::time::timeout(self.config.io_timeout(), read)
            .await
            .map_err(|_| IngestError::BodyRead("timed out reading chunk body".to_string()))??;
        if data.is_empty() {
            return Err(ValidationError::LengthRequired.into());
        }
        Ok(data)
    }

    /// Bound a storage or metadata call by the configured I/O timeout.
    async fn bounded<T, E>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, IngestError>
    where
        IngestError: From<E>,
    {
        let after = self.config.io_timeout();
        match tokio::time::timeout(after, call).await {
            Ok(result) => result.map_err(IngestError::from),
            Err(_) => Err(StorageFailure::Timeout { operation, after }.into()),
        }
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn duplicate_file(hash: &FileHash) -> IngestError {
    IngestError::Conflict(format!("file with hash {hash} is already registered"))
}

fn duplicate_chunk(file: &File, hash: &ChunkHash) -> IngestError {
    IngestError::Conflict(format!("chunk {hash} is already stored for file {}", file.id))
}
