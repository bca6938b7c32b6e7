//! Server test utilities.

use super::fixtures::{body, chunk_upload, register_request, split_into_chunks};
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::File;
use tessera_core::config::{AppConfig, MetadataConfig, StorageConfig};
use tessera_metadata::{MetadataStore, SqliteStore};
use tessera_server::{
    AppState, ChunkReceipt, CompletionOutcome, Finalizer, IngestCoordinator, create_router,
};
use tessera_storage::{FilesystemBackend, ObjectStore};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server with a custom finalize step.
    pub async fn with_finalizer(finalizer: Arc<dyn Finalizer>) -> Self {
        Self::build(|_| {}, Some(finalizer)).await
    }

    async fn build<F>(modifier: F, finalizer: Option<Arc<dyn Finalizer>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let state = match finalizer {
            Some(finalizer) => AppState::with_finalizer(config, storage, metadata, finalizer),
            None => AppState::new(config, storage, metadata),
        };
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    pub fn coordinator(&self) -> &IngestCoordinator {
        &self.state.coordinator
    }

    /// Register `data` as a file of `num_chunks` chunks.
    pub async fn register(&self, data: &[u8], num_chunks: u32) -> File {
        self.coordinator()
            .register_file(register_request(data, num_chunks))
            .await
            .expect("Failed to register file")
    }

    /// Upload one chunk of `file`.
    pub async fn upload(&self, file: &File, position: u32, data: &[u8]) -> ChunkReceipt {
        self.coordinator()
            .ingest_chunk(
                chunk_upload(file, position, data),
                body(bytes::Bytes::copy_from_slice(data)),
            )
            .await
            .expect("Failed to upload chunk")
    }

    /// Register `data`, upload it in `chunk_size` pieces in order, and wait
    /// for every completion evaluation.
    ///
    /// Returns the `Finished` outcome if any evaluation produced one.
    pub async fn ingest_whole(&self, data: &[u8], chunk_size: usize) -> (File, CompletionOutcome) {
        let pieces = split_into_chunks(data, chunk_size);
        let file = self.register(data, pieces.len() as u32).await;

        let mut receipts = Vec::new();
        for (position, piece) in pieces.iter().enumerate() {
            receipts.push(self.upload(&file, position as u32, piece).await);
        }

        let mut outcome = None;
        for receipt in receipts {
            let result = receipt
                .completion
                .outcome()
                .await
                .expect("completion evaluation failed");
            if matches!(result, CompletionOutcome::Finished(_)) || outcome.is_none() {
                outcome = Some(result);
            }
        }
        (file, outcome.expect("at least one chunk"))
    }
}
