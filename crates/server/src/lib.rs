//! HTTP ingestion server for tessera.
//!
//! This crate hosts the ingestion core and its HTTP surface:
//! - File registration and lookup
//! - Per-chunk ingestion with content-addressed dedup
//! - Completion detection with an at-most-once finalize claim
//! - Session-routed completion notifications
//! - Recovery of files stuck after a failed finalize

pub mod completion;
pub mod error;
pub mod finalize;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod routes;
pub mod state;

pub use completion::{
    CompletionDetector, CompletionError, CompletionHandle, CompletionOutcome, RecoveryReport,
};
pub use error::ApiError;
pub use finalize::{AssemblingFinalizer, FinalizeError, Finalizer};
pub use ingest::{
    ChunkReceipt, ChunkUpload, IngestCoordinator, IngestError, StorageFailure, ValidationError,
};
pub use notify::{CompletionEvent, Notifier, SessionNotifier};
pub use routes::create_router;
pub use state::AppState;
