//! Network layer for inhook
//!
//! Serves the session API, the capture endpoint and observer WebSockets over
//! hyper. Observer sockets live on tasks owned by the server so shutdown can
//! close them.

mod handler;
mod http;
mod websocket;

pub use handler::{AppState, NetworkHandler};
pub use http::{HttpHandler, Route};
pub use websocket::WebSocketHandler;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
