//! Push session registry.
//!
//! Each `/sse` connection owns one [`Session`]. Messages pushed to a session
//! travel over a bounded channel to the connection's event stream. The
//! sender sits behind an async mutex so pushes to one session never
//! interleave. The first failed push removes the session for good; a push
//! that cannot enter a full buffer within [`SEND_TIMEOUT`] counts as failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::error::SessionError;

/// Messages buffered per session before pushes wait for the stream.
pub const SESSION_BUFFER: usize = 64;

/// How long a push waits for buffer space before the session is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One push channel.
#[derive(Debug)]
pub struct Session {
    id: String,
    writer: tokio::sync::Mutex<Option<mpsc::Sender<Value>>>,
    active: AtomicBool,
    closed: Notify,
}

impl Session {
    fn new(id: String, sender: mpsc::Sender<Value>) -> Self {
        Self {
            id,
            writer: tokio::sync::Mutex::new(Some(sender)),
            active: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the session still accepts pushes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Resolves once the session has been deactivated.
    pub async fn closed(&self) {
        if self.is_active() {
            self.closed.notified().await;
        }
    }

    /// Pushes `message` to the session's stream.
    ///
    /// A failed or timed-out push closes the session; later pushes fail
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the stream is gone or stalled.
    pub async fn send(&self, message: Value) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed(self.id.clone()));
        }

        let mut writer = self.writer.lock().await;
        let Some(sender) = writer.as_ref() else {
            return Err(SessionError::Closed(self.id.clone()));
        };

        if sender.send_timeout(message, SEND_TIMEOUT).await.is_err() {
            writer.take();
            self.deactivate();
            return Err(SessionError::Closed(self.id.clone()));
        }
        Ok(())
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.closed.notify_one();
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session with a fresh id.
    ///
    /// The receiver feeds the session's event stream; dropping it makes the
    /// next push fail.
    pub fn open(&self) -> (Arc<Session>, mpsc::Receiver<Value>) {
        let (sender, receiver) = mpsc::channel(SESSION_BUFFER);
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(id.clone(), sender));

        self.sessions.lock().insert(id.clone(), Arc::clone(&session));
        tracing::info!(session_id = %id, "Session opened");
        (session, receiver)
    }

    /// Looks up an active session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .get(id)
            .filter(|s| s.is_active())
            .cloned()
    }

    /// Removes a session. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        if let Some(session) = &removed {
            session.deactivate();
            tracing::info!(session_id = %id, "Session closed");
        }
        removed.is_some()
    }

    /// Pushes `message` to session `id`, removing the session on failure.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown or inactive sessions
    /// and [`SessionError::Closed`] if the push failed.
    pub async fn push(&self, id: &str, message: Value) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let result = session.send(message).await;
        if let Err(e) = &result {
            tracing::warn!(session_id = %id, error = %e, "Push failed, removing session");
            self.remove(id);
        }
        result
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Removes every session.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (_, session) in drained {
            session.deactivate();
        }
    }
}

/// Removes its session from the registry when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    /// Ties session `id`'s registration to this guard's lifetime.
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, id: String) -> Self {
        Self { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
