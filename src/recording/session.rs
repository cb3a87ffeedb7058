//! Capture sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{CapturedRequest, Event, ObserverLink};

/// A capture endpoint and the events recorded against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id
    pub id: String,
    /// Fully-qualified capture URL
    pub url: String,
    /// Captured events in capture order
    pub events: Vec<Event>,
}

impl Session {
    /// Create an empty session with a fresh id under `public_url`
    #[must_use]
    pub fn new(public_url: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let url = capture_url(public_url, &id);

        Self {
            id,
            url,
            events: Vec::new(),
        }
    }
}

/// Build the capture URL for a session id
#[must_use]
pub fn capture_url(public_url: &str, id: &str) -> String {
    format!("{}/events/{id}", public_url.trim_end_matches('/'))
}

/// Registry-private storage for one session and its observer handle
pub(super) struct SessionSlot {
    pub(super) session: Session,
    observer: Option<Box<dyn ObserverLink>>,
}

impl SessionSlot {
    pub(super) fn new(session: Session) -> Self {
        Self {
            session,
            observer: None,
        }
    }

    /// Append an event and push it to the observer, if any
    pub(super) fn append(&mut self, request: CapturedRequest) -> Event {
        let event = Event::from_capture(request, self.next_timestamp());
        self.session.events.push(event.clone());

        if let Some(observer) = &self.observer {
            // Delivery is best effort; the event stays recorded
            if let Err(e) = observer.forward(&event) {
                debug!(
                    "Dropped forward of event {} (session: {}): {}",
                    event.id, self.session.id, e
                );
            }
        }

        event
    }

    /// Replace the observer and return the history to replay to it
    pub(super) fn attach(&mut self, observer: Box<dyn ObserverLink>) -> Vec<Event> {
        if self.observer.replace(observer).is_some() {
            debug!("Replaced observer for session {}", self.session.id);
        }
        self.session.events.clone()
    }

    pub(super) fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Current time, never earlier than the last recorded event
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.session.events.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}
