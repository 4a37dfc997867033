//! Per-user fan-out of pipeline progress events.
//!
//! Delivery is best effort: a user with no live session loses the event, and a
//! session whose buffer is full misses it. Track status stays recoverable from
//! the persisted track.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use trackline_core::models::ProgressEvent;
use uuid::Uuid;

struct Session {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

#[derive(Clone)]
pub struct Notifier {
    sessions: Arc<DashMap<Uuid, Vec<Session>>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("users", &self.sessions.len())
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Register a live session for `user_id`.
    pub fn subscribe(&self, user_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .entry(user_id)
            .or_default()
            .push(Session { id, tx });

        tracing::debug!(user_id = %user_id, session_id = id, "Notification session opened");
        Subscription {
            notifier: self.clone(),
            user_id,
            session_id: id,
            rx,
        }
    }

    /// Deliver `event` to every live session of `user_id`, returning how many accepted it.
    pub fn send(&self, user_id: Uuid, event: ProgressEvent) -> usize {
        let Some(mut sessions) = self.sessions.get_mut(&user_id) else {
            tracing::trace!(user_id = %user_id, event_type = %event.event_type, "No live sessions, event dropped");
            return 0;
        };

        let mut delivered = 0;
        sessions.retain(|session| match session.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(
                    user_id = %user_id,
                    session_id = session.id,
                    "Session buffer full, event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        let empty = sessions.is_empty();
        drop(sessions);
        if empty {
            self.sessions.remove_if(&user_id, |_, s| s.is_empty());
        }
        delivered
    }

    pub fn session_count(&self, user_id: Uuid) -> usize {
        self.sessions.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    fn unregister(&self, user_id: Uuid, session_id: u64) {
        if let Some(mut sessions) = self.sessions.get_mut(&user_id) {
            sessions.retain(|s| s.id != session_id);
        }
        self.sessions.remove_if(&user_id, |_, s| s.is_empty());
        tracing::debug!(user_id = %user_id, session_id, "Notification session closed");
    }
}

/// A live session. Dropping it unregisters the session.
pub struct Subscription {
    notifier: Notifier,
    user_id: Uuid,
    session_id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unregister(self.user_id, self.session_id);
    }
}
