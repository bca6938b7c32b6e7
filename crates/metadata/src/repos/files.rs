//! File registry repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;
use tessera_core::FileState;
use time::OffsetDateTime;
use uuid::Uuid;

/// Outcome of a conditional state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateTransition {
    /// This caller moved the file into the target state.
    Applied,
    /// The file was not in the required predecessor state; someone else
    /// already advanced it (or it has not yet reached that point).
    AlreadyHandled { current: FileState },
}

impl StateTransition {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Repository for file records and their lifecycle state.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a new file record.
    ///
    /// Returns `AlreadyExists` if a file with the same hash is registered,
    /// including when a concurrent registration wins the race.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a file by ID.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;

    /// Get a file by its whole-file hash (lowercase hex).
    async fn get_file_by_hash(&self, file_hash: &str) -> MetadataResult<Option<FileRow>>;

    /// Compare-and-set the file's state to `target`.
    ///
    /// The update only applies when the file is currently in
    /// `target.predecessor()`. Errors with `InvalidStateTransition` for a
    /// target that has no predecessor and `NotFound` for an unknown file.
    async fn set_file_state(
        &self,
        file_id: Uuid,
        target: FileState,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<StateTransition>;

    /// List files newest first.
    async fn list_files(&self, offset: u64, limit: u32) -> MetadataResult<Vec<FileRow>>;

    /// Total number of registered files.
    async fn count_files(&self) -> MetadataResult<u64>;

    /// Incomplete files registered before `updated_before` whose ledger
    /// already holds at least `num_chunks` rows, oldest first.
    ///
    /// These are files whose completion evaluation never ran to a claim.
    async fn get_unclaimed_complete_files(
        &self,
        updated_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Files in `state` whose `updated_at` is older than `updated_before`,
    /// oldest first.
    async fn get_stale_files(
        &self,
        state: FileState,
        updated_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Take ownership of a stale file by bumping its `updated_at` to `now`,
    /// provided it is still in `state` and still older than `updated_before`.
    ///
    /// Returns false if another caller got there first.
    async fn reclaim_stale_file(
        &self,
        file_id: Uuid,
        state: FileState,
        updated_before: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;
}

/// The state a file must currently be in for a move to `target`.
pub(crate) fn transition_source(target: FileState) -> MetadataResult<FileState> {
    target
        .predecessor()
        .ok_or_else(|| crate::error::MetadataError::InvalidStateTransition {
            from: "none".to_string(),
            to: target.as_str().to_string(),
        })
}
