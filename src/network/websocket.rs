//! Observer WebSocket: upgrade, replay and live forwarding

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

use crate::recording::{ChannelObserver, ObserverMessage, Registry};
use crate::Result;

use super::{AppState, HttpHandler};

/// WebSocket handler for session observers
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Check whether a request asks for a WebSocket upgrade
    #[must_use]
    pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
        let headers = request.headers();

        let upgrade = headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

        let connection = headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            });

        upgrade && connection && headers.contains_key(header::SEC_WEBSOCKET_KEY)
    }

    /// Answer an observer upgrade request for session `id`
    ///
    /// The socket itself is served on an observer task, tracked by the
    /// server's shutdown, once hyper hands over the upgraded connection.
    pub async fn upgrade<B>(
        state: &Arc<AppState>,
        id: &str,
        request: &mut Request<B>,
    ) -> Response<Full<Bytes>> {
        if let Err(e) = state.registry.get_session(id).await {
            return HttpHandler::error_response(&e);
        }

        if !Self::is_upgrade_request(request) {
            return HttpHandler::json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "Expected WebSocket upgrade" }),
            );
        }

        let accept = request
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .map(|key| derive_accept_key(key.as_bytes()))
            .and_then(|accept| HeaderValue::from_str(&accept).ok());
        let Some(accept) = accept else {
            return HttpHandler::json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "Invalid Sec-WebSocket-Key" }),
            );
        };

        let on_upgrade = hyper::upgrade::on(request);
        let shutdown = state.subscribe_shutdown();
        let task_state = Arc::clone(state);
        let id = id.to_string();

        state
            .spawn_observer(async move {
                match on_upgrade.await {
                    Ok(upgraded) => {
                        let ws = WebSocketStream::from_raw_socket(
                            TokioIo::new(upgraded),
                            Role::Server,
                            None,
                        )
                        .await;

                        let registry = &task_state.registry;
                        let buffer = task_state.observer_buffer;
                        if let Err(e) = Self::observe(registry, &id, buffer, ws, shutdown).await {
                            warn!("Observer for session {} ended with error: {}", id, e);
                        }
                    }
                    Err(e) => warn!("WebSocket upgrade failed for session {}: {}", id, e),
                }
            })
            .await;

        let mut response = HttpHandler::empty_response(StatusCode::SWITCHING_PROTOCOLS);
        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
        response
    }

    /// Serve an observer socket until it closes
    ///
    /// Attaches a fresh link to the session, sends the replay batch, then
    /// forwards each new event. Inbound frames are only read to notice the
    /// peer going away. If a newer observer replaces this one, or `shutdown`
    /// fires, the socket is closed.
    ///
    /// # Errors
    ///
    /// Returns error if the session is unknown or the socket fails while sending
    pub async fn observe<S>(
        registry: &Registry,
        id: &str,
        buffer: usize,
        ws: WebSocketStream<S>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (link, mut forwarded) = ChannelObserver::channel(buffer);
        let replay = registry.attach_observer(id, Box::new(link)).await?;

        let (mut sink, mut stream) = ws.split();
        let initial = ObserverMessage::InitialEvents { events: replay };
        sink.send(Message::Text(initial.to_json()?)).await?;

        loop {
            tokio::select! {
                event = forwarded.recv() => {
                    if let Some(event) = event {
                        let message = ObserverMessage::NewEvent { event };
                        sink.send(Message::Text(message.to_json()?)).await?;
                    } else {
                        info!("Observer for session {} superseded", id);
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Closing observer for session {} on shutdown", id);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(msg)) if msg.is_close() => {
                            debug!("Observer for session {} closed", id);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("Observer for session {} dropped: {}", id, e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }
}
