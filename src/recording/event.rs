//! Captured HTTP transaction records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CAPTURE_ACK_STATUS;

/// Raw material for one event, as extracted by the capture path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedRequest {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Request URI as received (path and raw query)
    pub url: String,
    /// First value of each header, keyed by canonical name
    pub headers: BTreeMap<String, String>,
    /// First value of each query parameter
    pub query_params: BTreeMap<String, String>,
    /// Request body as text
    pub body: String,
    /// Client address
    pub ip: String,
}

/// One captured HTTP transaction
///
/// Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id
    pub id: String,
    /// HTTP method
    pub method: String,
    /// Request URI
    pub url: String,
    /// Headers, first value per name
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: String,
    /// Query parameters, first value per name
    pub query_params: BTreeMap<String, String>,
    /// Client address
    pub ip: String,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Acknowledgment status returned to the sender
    pub status: u16,
}

impl Event {
    /// Build an event from captured request data with a fresh id
    #[must_use]
    pub fn from_capture(request: CapturedRequest, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
            query_params: request.query_params,
            ip: request.ip,
            timestamp,
            status: CAPTURE_ACK_STATUS,
        }
    }
}
