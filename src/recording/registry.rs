//! Session registry: the single owner of all session state

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{InhookError, Result};

use super::session::SessionSlot;
use super::{CapturedRequest, Event, ObserverLink, Session};

/// Concurrency-safe map of sessions
///
/// One lock guards every session. Appends and observer attaches take it
/// exclusively, so a capture's append-then-forward step is never interleaved
/// with an attach's history-read-then-install step.
pub struct Registry {
    sessions: RwLock<HashMap<String, SessionSlot>>,
    public_url: String,
}

impl Registry {
    /// Create an empty registry whose capture URLs live under `public_url`
    #[must_use]
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            public_url: public_url.into(),
        }
    }

    /// Base URL capture URLs are built from
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Create and register an empty session
    pub async fn create_session(&self) -> Session {
        let session = Session::new(&self.public_url);

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), SessionSlot::new(session.clone()));
        drop(sessions);

        info!("Created session {} ({})", session.id, session.url);
        session
    }

    /// Snapshot of a session
    ///
    /// # Errors
    ///
    /// Returns [`InhookError::SessionNotFound`] if the id is unknown
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Snapshot of a session's events
    ///
    /// # Errors
    ///
    /// Returns [`InhookError::SessionNotFound`] if the id is unknown
    pub async fn list_events(&self, id: &str) -> Result<Vec<Event>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|slot| slot.session.events.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Record a captured request and forward it to the session's observer
    ///
    /// # Errors
    ///
    /// Returns [`InhookError::SessionNotFound`] if the id is unknown; nothing
    /// is recorded in that case
    pub async fn append_event(&self, id: &str, request: CapturedRequest) -> Result<Event> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        let event = slot.append(request);
        let count = slot.session.events.len();
        drop(sessions);

        debug!(
            "Captured {} {} (session: {}, count: {})",
            event.method, event.url, id, count
        );
        Ok(event)
    }

    /// Install `observer` as the session's only observer
    ///
    /// Returns the history to replay. Events appended after this call are
    /// delivered through `observer`, so none fall between replay and live
    /// forwarding.
    ///
    /// # Errors
    ///
    /// Returns [`InhookError::SessionNotFound`] if the id is unknown; the
    /// observer is dropped in that case
    pub async fn attach_observer(
        &self,
        id: &str,
        observer: Box<dyn ObserverLink>,
    ) -> Result<Vec<Event>> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        let replay = slot.attach(observer);
        drop(sessions);

        info!(
            "Observer attached to session {} ({} events to replay)",
            id,
            replay.len()
        );
        Ok(replay)
    }

    /// Whether the session currently holds an observer handle
    pub async fn observer_attached(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(id).is_some_and(SessionSlot::has_observer)
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn not_found(id: &str) -> InhookError {
    InhookError::SessionNotFound(id.to_string())
}
