//! Finalize steps with controllable behavior.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tessera_core::File;
use tessera_server::{FinalizeError, Finalizer};

/// Counts invocations, optionally failing the first `failures` runs and
/// sleeping before each run.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedFinalizer {
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
}

#[allow(dead_code)]
impl ScriptedFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finalizer for ScriptedFinalizer {
    async fn finalize(&self, file: &File) -> Result<(), FinalizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FinalizeError::SizeMismatch {
                expected: file.size,
                actual: 0,
            });
        }
        Ok(())
    }
}
