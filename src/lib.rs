//! inhook - webhook inspector
//!
//! Captures arbitrary HTTP requests sent to per-session URLs and streams them
//! live to the session's observer over WebSocket.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod capture;
pub mod config;
pub mod error;
pub mod network;
pub mod recording;

pub use error::{DeliveryFailure, InhookError, Result};
