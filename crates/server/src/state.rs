//! Application state shared across handlers.

use crate::completion::CompletionDetector;
use crate::finalize::{AssemblingFinalizer, Finalizer};
use crate::ingest::IngestCoordinator;
use crate::notify::SessionNotifier;
use std::sync::Arc;
use tessera_core::config::AppConfig;
use tessera_metadata::MetadataStore;
use tessera_storage::{ChunkStore, ObjectStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub coordinator: Arc<IngestCoordinator>,
    pub detector: Arc<CompletionDetector>,
    pub sessions: Arc<SessionNotifier>,
}

impl AppState {
    /// Create application state with the assembling finalizer.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let finalizer = Arc::new(AssemblingFinalizer::new(
            metadata.clone(),
            ChunkStore::new(storage.clone()),
        ));
        Self::with_finalizer(config, storage, metadata, finalizer)
    }

    /// Create application state with a custom finalize step.
    pub fn with_finalizer(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        finalizer: Arc<dyn Finalizer>,
    ) -> Self {
        let sessions = Arc::new(SessionNotifier::new());
        let detector = Arc::new(CompletionDetector::new(
            metadata.clone(),
            finalizer,
            sessions.clone(),
            config.ingest.finalize_timeout(),
        ));
        let coordinator = Arc::new(IngestCoordinator::new(
            metadata.clone(),
            ChunkStore::new(storage.clone()),
            detector.clone(),
            sessions.clone(),
            config.ingest.clone(),
        ));

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            coordinator,
            detector,
            sessions,
        }
    }
}
