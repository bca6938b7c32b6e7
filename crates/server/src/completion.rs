//! Completion detection and the at-most-once finalize claim.
//!
//! After every committed chunk the detector compares the ledger count with
//! the file's declared chunk count. The first caller to see the set complete
//! claims the file with a conditional `incomplete -> processing` update in the
//! registry; only that caller runs the finalizer. Coordination happens entirely
//! through the metadata store, so any number of server processes may race.

use crate::finalize::{FinalizeError, Finalizer};
use crate::metrics::{
    FILES_FINALIZED, FILES_RECOVERED, FILES_STUCK, FINALIZE_DURATION, FINALIZE_FAILURES,
};
use crate::notify::Notifier;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{File, FileId, FileState};
use tessera_metadata::{MetadataError, MetadataStore, StateTransition};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of evaluating a file for completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Not every chunk has been committed yet.
    Pending { committed: u64, required: u32 },
    /// Another evaluation already claimed the file, or it is finished.
    AlreadyClaimed { state: FileState },
    /// This evaluation claimed, finalized, and finished the file.
    Finished(File),
}

/// Errors from completion evaluation.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("finalize failed for file {file_id}: {source}")]
    Finalize {
        file_id: FileId,
        source: FinalizeError,
    },

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("finalize for file {file_id} timed out after {after:?}")]
    Timeout { file_id: FileId, after: Duration },

    #[error("completion task aborted: {0}")]
    Aborted(String),
}

/// Future over a spawned completion evaluation.
///
/// Dropping the handle detaches the task; it still runs to completion.
pub struct CompletionHandle {
    file_id: FileId,
    task: JoinHandle<Result<CompletionOutcome, CompletionError>>,
}

impl CompletionHandle {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Wait for the evaluation to finish.
    pub async fn outcome(self) -> Result<CompletionOutcome, CompletionError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(CompletionError::Aborted(join_err.to_string())),
        }
    }
}

/// Counts from one recovery sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stale processing files found.
    pub scanned: usize,
    /// Files this sweep took ownership of.
    pub reclaimed: usize,
    /// Incomplete files with a full ledger that were never claimed.
    pub unclaimed: usize,
    pub finished: usize,
    pub failed: usize,
}

pub struct CompletionDetector {
    metadata: Arc<dyn MetadataStore>,
    finalizer: Arc<dyn Finalizer>,
    notifier: Arc<dyn Notifier>,
    finalize_timeout: Duration,
}

impl CompletionDetector {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        finalizer: Arc<dyn Finalizer>,
        notifier: Arc<dyn Notifier>,
        finalize_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            finalizer,
            notifier,
            finalize_timeout,
        }
    }

    /// Evaluate a file after a chunk commit, claiming and finalizing it when
    /// its chunk set is complete.
    ///
    /// A finalize failure leaves the file in processing for the recovery
    /// sweep; it is never reverted to incomplete.
    pub async fn evaluate(&self, file_id: FileId) -> Result<CompletionOutcome, CompletionError> {
        let file = self.load(file_id).await?;
        if file.state != FileState::Incomplete {
            return Ok(CompletionOutcome::AlreadyClaimed { state: file.state });
        }

        let committed = self.metadata.count_chunks_for_file(*file_id.as_uuid()).await?;
        // Deliberately `>=` rather than `==`: the ledger is unique per
        // (file, hash), not per position, so a second chunk at a used position
        // can push the count past num_chunks. Claiming anyway keeps the file
        // from stalling in incomplete; assembly then rejects the extra chunk.
        if committed < u64::from(file.num_chunks) {
            debug!(
                file_id = %file_id,
                committed,
                required = file.num_chunks,
                "File still incomplete"
            );
            return Ok(CompletionOutcome::Pending {
                committed,
                required: file.num_chunks,
            });
        }

        let claim = self
            .metadata
            .set_file_state(
                *file_id.as_uuid(),
                FileState::Processing,
                OffsetDateTime::now_utc(),
            )
            .await?;
        match claim {
            StateTransition::Applied => {
                info!(file_id = %file_id, committed, "Claimed file for finalize");
            }
            StateTransition::AlreadyHandled { current } => {
                debug!(file_id = %file_id, state = %current, "Finalize already claimed");
                return Ok(CompletionOutcome::AlreadyClaimed { state: current });
            }
        }

        self.run_finalize(File {
            state: FileState::Processing,
            ..file
        })
        .await
    }

    /// Run [`Self::evaluate`] as a background task.
    ///
    /// The task logs its own outcome, so callers may drop the handle.
    pub fn spawn(self: &Arc<Self>, file_id: FileId) -> CompletionHandle {
        let detector = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = detector.evaluate(file_id).await;
            match &result {
                Ok(CompletionOutcome::Finished(file)) => {
                    debug!(file_id = %file.id, "Completion task finished file");
                }
                Ok(_) => {}
                // Finalize failures are logged where they happen.
                Err(CompletionError::Finalize { .. } | CompletionError::Timeout { .. }) => {}
                Err(e) => error!(file_id = %file_id, error = %e, "Completion evaluation failed"),
            }
            result
        });
        CompletionHandle { file_id, task }
    }

    /// Retry finalize for files stuck in processing longer than `stale_after`,
    /// then evaluate incomplete files whose ledger is already full.
    ///
    /// Each processing file is reclaimed with a conditional bump of its
    /// `updated_at`, so concurrent sweepers never finalize the same file twice.
    /// Unclaimed files go through the regular claim.
    pub async fn recover_stale(
        &self,
        stale_after: Duration,
        limit: u32,
    ) -> Result<RecoveryReport, CompletionError> {
        let now = OffsetDateTime::now_utc();
        let cutoff = stale_cutoff(now, stale_after);
        let stale = self
            .metadata
            .get_stale_files(FileState::Processing, cutoff, limit)
            .await?;

        let mut report = RecoveryReport {
            scanned: stale.len(),
            ..RecoveryReport::default()
        };
        FILES_STUCK.set(i64::try_from(stale.len()).unwrap_or(i64::MAX));

        for row in stale {
            let file_id = row.file_id;
            let reclaimed = self
                .metadata
                .reclaim_stale_file(file_id, FileState::Processing, cutoff, now)
                .await?;
            if !reclaimed {
                debug!(file_id = %file_id, "Stale file reclaimed by another sweeper");
                continue;
            }
            report.reclaimed += 1;

            let file = match File::try_from(row) {
                Ok(file) => file,
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "Skipping unreadable file record");
                    report.failed += 1;
                    continue;
                }
            };

            info!(file_id = %file.id, "Retrying finalize for stuck file");
            match self.run_finalize(file).await {
                Ok(CompletionOutcome::Finished(_)) => {
                    FILES_RECOVERED.inc();
                    report.finished += 1;
                }
                Ok(_) => {}
                Err(_) => report.failed += 1,
            }
        }

        let unclaimed = self
            .metadata
            .get_unclaimed_complete_files(cutoff, limit)
            .await?;
        report.unclaimed = unclaimed.len();
        for row in unclaimed {
            let file_id = FileId::from_uuid(row.file_id);
            warn!(file_id = %file_id, "Complete file was never claimed; evaluating");
            match self.evaluate(file_id).await {
                Ok(CompletionOutcome::Finished(_)) => {
                    FILES_RECOVERED.inc();
                    report.finished += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(file_id = %file_id, error = %e, "Unclaimed file evaluation failed");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 || report.unclaimed > 0 {
            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                unclaimed = report.unclaimed,
                finished = report.finished,
                failed = report.failed,
                "Recovery sweep complete"
            );
        }
        Ok(report)
    }

    /// Finalize a claimed file, then mark it finished and notify.
    async fn run_finalize(&self, file: File) -> Result<CompletionOutcome, CompletionError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.finalize_timeout, self.finalizer.finalize(&file)).await;
        FINALIZE_DURATION.observe(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                FINALIZE_FAILURES.inc();
                error!(
                    file_id = %file.id,
                    error = %source,
                    "Finalize failed; file left in processing"
                );
                return Err(CompletionError::Finalize {
                    file_id: file.id,
                    source,
                });
            }
            Err(_) => {
                FINALIZE_FAILURES.inc();
                error!(
                    file_id = %file.id,
                    timeout_secs = self.finalize_timeout.as_secs(),
                    "Finalize timed out; file left in processing"
                );
                return Err(CompletionError::Timeout {
                    file_id: file.id,
                    after: self.finalize_timeout,
                });
            }
        }

        let finished_at = OffsetDateTime::now_utc();
        let transition = self
            .metadata
            .set_file_state(*file.id.as_uuid(), FileState::Finished, finished_at)
            .await?;
        if let StateTransition::AlreadyHandled { current } = transition {
            warn!(file_id = %file.id, state = %current, "File finished elsewhere; skipping notify");
            return Ok(CompletionOutcome::AlreadyClaimed { state: current });
        }

        let file = File {
            state: FileState::Finished,
            updated_at: finished_at,
            ..file
        };
        FILES_FINALIZED.inc();
        info!(file_id = %file.id, file_hash = %file.hash, "File finished");
        self.notifier.file_finished(&file).await;
        Ok(CompletionOutcome::Finished(file))
    }

    async fn load(&self, file_id: FileId) -> Result<File, CompletionError> {
        let row = self
            .metadata
            .get_file(*file_id.as_uuid())
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("file {file_id}")))?;
        File::try_from(row).map_err(|e| CompletionError::Metadata(e.into()))
    }
}

/// `now - stale_after`, or the epoch when the window reaches past it.
fn stale_cutoff(now: OffsetDateTime, stale_after: Duration) -> OffsetDateTime {
    time::Duration::try_from(stale_after)
        .ok()
        .and_then(|window| now.checked_sub(window))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_cutoff_subtracts_window() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            stale_cutoff(now, Duration::from_secs(60)),
            now - time::Duration::seconds(60)
        );
        assert_eq!(stale_cutoff(now, Duration::ZERO), now);
    }

    #[test]
    fn test_stale_cutoff_saturates_at_epoch() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            stale_cutoff(now, Duration::from_secs(1_000_000_000_000)),
            OffsetDateTime::UNIX_EPOCH
        );
        assert_eq!(
            stale_cutoff(now, Duration::MAX),
            OffsetDateTime::UNIX_EPOCH
        );
    }
}
