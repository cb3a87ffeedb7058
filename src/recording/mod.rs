//! Session registry and event capture/broadcast engine

mod event;
mod observer;
mod registry;
mod session;

pub use event::{CapturedRequest, Event};
pub use observer::{ChannelObserver, ObserverLink, ObserverMessage};
pub use registry::Registry;
pub use session::{capture_url, Session};

/// Status echoed in every event and capture acknowledgment
pub const CAPTURE_ACK_STATUS: u16 = 200;

/// Default number of events buffered per observer link
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;
