//! HTTP routing and responses

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::capture;
use crate::{InhookError, Result};

use super::{AppState, WebSocketHandler};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str =
    "Origin, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization";

/// A resolved request target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// CORS preflight for any path
    Preflight,
    /// `POST /api/sessions`
    CreateSession,
    /// `GET /api/sessions/{id}`
    GetSession(&'a str),
    /// `GET /api/events/{id}`
    ListEvents(&'a str),
    /// Any method on `/events/{id}`
    Capture(&'a str),
    /// `GET /ws/{id}`
    Observe(&'a str),
    /// Nothing matched
    NotFound,
}

impl<'a> Route<'a> {
    /// Resolve a method and path to a route
    #[must_use]
    pub fn resolve(method: &Method, path: &'a str) -> Self {
        if *method == Method::OPTIONS {
            return Self::Preflight;
        }

        let segments: Vec<&'a str> = path.trim_start_matches('/').split('/').collect();

        match segments.as_slice() {
            ["api", "sessions"] if *method == Method::POST => Self::CreateSession,
            ["api", "sessions", id] if *method == Method::GET && !id.is_empty() => {
                Self::GetSession(*id)
            }
            ["api", "events", id] if *method == Method::GET && !id.is_empty() => {
                Self::ListEvents(*id)
            }
            ["events", id] if !id.is_empty() => Self::Capture(*id),
            ["ws", id] if *method == Method::GET && !id.is_empty() => Self::Observe(*id),
            _ => Self::NotFound,
        }
    }
}

/// HTTP handler for the session API, capture endpoint and observer upgrade
pub struct HttpHandler;

impl HttpHandler {
    /// Serve one request
    ///
    /// Every response carries the CORS headers.
    pub async fn handle<B>(
        state: Arc<AppState>,
        mut request: Request<B>,
        peer: SocketAddr,
    ) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = match Route::resolve(&method, &path) {
            Route::Preflight => Self::empty_response(StatusCode::NO_CONTENT),
            Route::CreateSession => {
                let session = state.registry.create_session().await;
                Self::json_response(StatusCode::CREATED, &session)
            }
            Route::GetSession(id) => match state.registry.get_session(id).await {
                Ok(session) => Self::json_response(StatusCode::OK, &session),
                Err(e) => Self::error_response(&e),
            },
            Route::ListEvents(id) => match state.registry.list_events(id).await {
                Ok(events) => Self::json_response(StatusCode::OK, &events),
                Err(e) => Self::error_response(&e),
            },
            Route::Capture(id) => Self::capture(&state, id, request, peer).await,
            Route::Observe(id) => WebSocketHandler::upgrade(&state, id, &mut request).await,
            Route::NotFound => {
                Self::json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" }))
            }
        };

        debug!("{} {} -> {}", method, path, response.status().as_u16());
        Self::with_cors(response)
    }

    /// Record the request against session `id` and acknowledge it
    async fn capture<B>(
        state: &AppState,
        id: &str,
        request: Request<B>,
        peer: SocketAddr,
    ) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();

        // An unreadable body is recorded as empty rather than failing the sender
        let body = Self::read_body(body).await.unwrap_or_else(|e| {
            warn!("Capture for session {} read no body: {}", id, e);
            Bytes::new()
        });

        let captured = capture::capture_request(&parts, &body, peer);
        match state.registry.append_event(id, captured).await {
            Ok(_) => Self::json_response(StatusCode::OK, &json!({ "success": true })),
            Err(e) => Self::error_response(&e),
        }
    }

    /// Read the full request body
    ///
    /// # Errors
    ///
    /// Returns error if the body stream fails
    pub async fn read_body<B>(body: B) -> Result<Bytes>
    where
        B: Body,
        B::Error: Display,
    {
        let collected = body
            .collect()
            .await
            .map_err(|e| InhookError::Other(format!("Failed to read body: {e}")))?;

        Ok(collected.to_bytes())
    }

    /// Create a JSON response
    #[must_use]
    pub fn json_response<T>(status: StatusCode, value: &T) -> Response<Full<Bytes>>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                *response.status_mut() = status;
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=utf-8"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode response: {}", e);
                Self::empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Create an empty response
    #[must_use]
    pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    /// Create an error response
    #[must_use]
    pub fn error_response(error: &InhookError) -> Response<Full<Bytes>> {
        match error {
            InhookError::SessionNotFound(_) => Self::json_response(
                StatusCode::NOT_FOUND,
                &json!({ "error": "Session not found" }),
            ),
            _ => {
                error!("Request failed: {}", error);
                Self::json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": error.to_string() }),
                )
            }
        }
    }

    /// Attach the permissive CORS headers
    #[must_use]
    pub fn with_cors(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        response
    }
}
