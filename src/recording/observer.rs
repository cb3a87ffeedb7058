//! Observer links and the messages pushed through them

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::DeliveryFailure;

use super::Event;

/// A live push target for newly appended events
///
/// `forward` is called while the registry lock is held, so implementations
/// must not block.
pub trait ObserverLink: Send + Sync {
    /// Push one event to the observer
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryFailure`] if the event could not be handed off
    fn forward(&self, event: &Event) -> Result<(), DeliveryFailure>;
}

/// Observer link backed by a bounded channel
///
/// The receiving half is drained by the transport task that owns the socket.
pub struct ChannelObserver {
    tx: mpsc::Sender<Event>,
}

impl ChannelObserver {
    /// Create a link and the receiver its transport should drain
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ObserverLink for ChannelObserver {
    fn forward(&self, event: &Event) -> Result<(), DeliveryFailure> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Backpressure,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// Message sent to an observer socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    /// Replay batch sent once, right after attach
    InitialEvents {
        /// Session history at attach time
        events: Vec<Event>,
    },
    /// A single event forwarded after attach
    NewEvent {
        /// The appended event
        event: Event,
    },
}

impl ObserverMessage {
    /// Encode as a JSON text frame payload
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
