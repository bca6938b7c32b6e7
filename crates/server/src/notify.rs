//! Completion notifications routed by session token.

use crate::metrics::SESSION_SUBSCRIBERS;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tessera_core::{File, FileId};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Pending events per subscriber before new ones are dropped.
const SUBSCRIBER_BUFFER: usize = 16;

/// Receives a file once it has been finalized.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn file_finished(&self, file: &File);
}

/// Event pushed to a session subscriber.
#[derive(Clone, Debug, Serialize)]
pub struct CompletionEvent {
    pub event: &'static str,
    pub file: File,
}

impl CompletionEvent {
    pub const FILE_COMPLETED: &'static str = "file:completed";

    pub fn file_completed(file: File) -> Self {
        Self {
            event: Self::FILE_COMPLETED,
            file,
        }
    }
}

/// A file's session token and when an upload last named it.
#[derive(Clone, Copy, Debug)]
struct Association {
    token: Uuid,
    touched: Instant,
}

/// Session routing registry.
///
/// Uploads may name a session token; the token is remembered per file and
/// consumed when that file finishes, so each finalize notifies at most once.
/// Associations for files that never finish are dropped by
/// [`SessionNotifier::prune_idle`]. Subscribers attach to a token and receive
/// events over a bounded channel.
#[derive(Default)]
pub struct SessionNotifier {
    sessions: DashMap<FileId, Association>,
    subscribers: DashMap<Uuid, mpsc::Sender<CompletionEvent>>,
}

impl SessionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route completion of `file_id` to `token`. A later association replaces
    /// an earlier one.
    pub fn associate(&self, file_id: FileId, token: Uuid) {
        let association = Association {
            token,
            touched: Instant::now(),
        };
        if let Some(previous) = self.sessions.insert(file_id, association)
            && previous.token != token
        {
            debug!(file_id = %file_id, session = %token, "Session association replaced");
        }
    }

    /// The session currently associated with a file, if any.
    pub fn session_for(&self, file_id: FileId) -> Option<Uuid> {
        self.sessions.get(&file_id).map(|entry| entry.value().token)
    }

    /// Forget associations no upload has refreshed within `max_idle`.
    /// Returns how many were dropped.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, association| association.touched.elapsed() < max_idle);
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(pruned, "Dropped idle session associations");
        }
        pruned
    }

    pub fn association_count(&self) -> usize {
        self.sessions.len()
    }

    /// Attach a subscriber to `token`, replacing any previous one.
    pub fn subscribe(&self, token: Uuid) -> mpsc::Receiver<CompletionEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if self.subscribers.insert(token, tx).is_none() {
            SESSION_SUBSCRIBERS.inc();
        }
        rx
    }

    /// Drop the subscriber for `token` once its receiver is gone.
    ///
    /// A newer subscriber for the same token keeps its slot.
    pub fn release(&self, token: Uuid) {
        if self
            .subscribers
            .remove_if(&token, |_, tx| tx.is_closed())
            .is_some()
        {
            SESSION_SUBSCRIBERS.dec();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[async_trait]
impl Notifier for SessionNotifier {
    async fn file_finished(&self, file: &File) {
        let Some((_, Association { token, .. })) = self.sessions.remove(&file.id) else {
            debug!(file_id = %file.id, "No session associated with finished file");
            return;
        };

        // Clone the sender out so no map guard is held while sending.
        let Some(tx) = self.subscribers.get(&token).map(|entry| entry.value().clone()) else {
            debug!(file_id = %file.id, session = %token, "No subscriber for session; event dropped");
            return;
        };

        match tx.try_send(CompletionEvent::file_completed(file.clone())) {
            Ok(()) => debug!(file_id = %file.id, session = %token, "Completion event delivered"),
            Err(TrySendError::Full(_)) => {
                warn!(file_id = %file.id, session = %token, "Subscriber backlog full; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(file_id = %file.id, session = %token, "Subscriber gone; event dropped");
                self.release(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ContentHash, FileHash, FileState};
    use time::OffsetDateTime;

    fn finished_file() -> File {
        let now = OffsetDateTime::now_utc();
        File {
            id: FileId::new(),
            hash: FileHash::from_content_hash(ContentHash::compute(b"payload")),
            size: 7,
            num_chunks: 1,
            name: "payload.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            state: FileState::Finished,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_delivers_to_associated_session_once() {
        let notifier = SessionNotifier::new();
        let token = Uuid::new_v4();
        let file = finished_file();
        let mut rx = notifier.subscribe(token);
        notifier.associate(file.id, token);

        notifier.file_finished(&file).await;
        notifier.file_finished(&file).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, CompletionEvent::FILE_COMPLETED);
        assert_eq!(event.file.id, file.id);
        assert!(rx.try_recv().is_err());
        assert!(notifier.session_for(file.id).is_none());
    }

    #[tokio::test]
    async fn test_other_sessions_do_not_receive_event() {
        let notifier = SessionNotifier::new();
        let file = finished_file();
        let mut bystander = notifier.subscribe(Uuid::new_v4());
        notifier.associate(file.id, Uuid::new_v4());

        notifier.file_finished(&file).await;
        assert!(bystander.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_without_session_is_a_noop() {
        let notifier = SessionNotifier::new();
        notifier.file_finished(&finished_file()).await;
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_release_keeps_newer_subscriber() {
        let notifier = SessionNotifier::new();
        let token = Uuid::new_v4();

        let first = notifier.subscribe(token);
        let mut second = notifier.subscribe(token);
        drop(first);
        notifier.release(token);
        assert_eq!(notifier.subscriber_count(), 1);

        let file = finished_file();
        notifier.associate(file.id, token);
        notifier.file_finished(&file).await;
        assert_eq!(second.try_recv().unwrap().file.id, file.id);

        drop(second);
        notifier.release(token);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_idle_drops_stale_associations() {
        let notifier = SessionNotifier::new();
        let token = Uuid::new_v4();
        let mut rx = notifier.subscribe(token);
        let file = finished_file();
        notifier.associate(file.id, token);

        assert_eq!(notifier.prune_idle(Duration::from_secs(3600)), 0);
        assert_eq!(notifier.session_for(file.id), Some(token));

        assert_eq!(notifier.prune_idle(Duration::ZERO), 1);
        assert_eq!(notifier.association_count(), 0);

        // A pruned association no longer routes a late completion.
        notifier.file_finished(&file).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let file = finished_file();
        let json = serde_json::to_value(CompletionEvent::file_completed(file.clone())).unwrap();
        assert_eq!(json["event"], "file:completed");
        assert_eq!(json["file"]["hash"], file.hash.to_hex());
        assert_eq!(json["file"]["state"], "finished");
    }
}
