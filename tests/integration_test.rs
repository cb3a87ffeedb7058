//! End-to-end tests against a server on an ephemeral port

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use inhook::config::Config;
use inhook::network::NetworkHandler;
use inhook::recording::{Event, ObserverMessage, Registry, Session};

const PUBLIC_URL: &str = "http://hooks.inhook.test";
const WAIT: Duration = Duration::from_secs(5);

type Observer = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    client: Client<HttpConnector, Full<Bytes>>,
    shutdown: broadcast::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.server.public_url = Some(PUBLIC_URL.to_string());

        let registry = Arc::new(Registry::new(config.public_url()));
        let handler = NetworkHandler::bind(&config, Arc::clone(&registry))
            .await
            .unwrap();
        let addr = handler.local_addr().unwrap();
        let shutdown = handler.shutdown_handle();
        tokio::spawn(handler.run());

        Self {
            addr,
            registry,
            client: Client::builder(TokioExecutor::new()).build_http(),
            shutdown,
        }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> (StatusCode, Bytes) {
        let response = tokio::time::timeout(WAIT, self.client.request(request))
            .await
            .expect("request timed out")
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    async fn call(&self, method: &str, path: &str, body: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path))
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        self.send(request).await
    }

    async fn create_session(&self) -> Session {
        let (status, body) = self.call("POST", "/api/sessions", "").await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    async fn events(&self, id: &str) -> Vec<Event> {
        let (status, body) = self.call("GET", &format!("/api/events/{id}"), "").await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    async fn observe(&self, id: &str) -> Observer {
        let (ws, _) = connect_async(format!("ws://{}/ws/{}", self.addr, id))
            .await
            .unwrap();
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.send(()).ok();
    }
}

async fn next_message(ws: &mut Observer) -> ObserverMessage {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("observer timed out")
            .expect("observer stream ended")
            .unwrap();

        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_create_session_over_http() {
    let server = TestServer::start().await;
    let session = server.create_session().await;

    assert!(session.events.is_empty());
    assert_eq!(session.url, format!("{PUBLIC_URL}/events/{}", session.id));
    assert_eq!(server.registry.session_count().await, 1);

    let (status, body) = server
        .call("GET", &format!("/api/sessions/{}", session.id), "")
        .await;
    assert_eq!(status, StatusCode::OK);
    let fetched: Session = serde_json::from_slice(&body).unwrap();
    assert_eq!(fetched, session);
}

#[tokio::test]
async fn test_capture_scenario() {
    let server = TestServer::start().await;
    let session = server.create_session().await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("http://{}/events/{}?a=1", server.addr, session.id))
        .header("X-Test", "v")
        .body(Full::new(Bytes::from_static(b"hello")))
        .unwrap();
    let (status, body) = server.send(request).await;

    assert_eq!(status, StatusCode::OK);
    let ack: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack, serde_json::json!({ "success": true }));

    let events = server.events(&session.id).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.method, "GET");
    assert_eq!(event.url, format!("/events/{}?a=1", session.id));
    assert_eq!(event.query_params.get("a").map(String::as_str), Some("1"));
    assert_eq!(event.headers.get("X-Test").map(String::as_str), Some("v"));
    assert!(!event.headers.contains_key("Host"));
    assert_eq!(event.body, "hello");
    assert_eq!(event.status, 200);
    assert_eq!(event.ip, "127.0.0.1");
}

#[tokio::test]
async fn test_capture_accepts_any_method() {
    let server = TestServer::start().await;
    let session = server.create_session().await;
    let path = format!("/events/{}", session.id);

    for method in ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"] {
        let (status, _) = server.call(method, &path, "").await;
        assert_eq!(status, StatusCode::OK, "{method}");
    }

    let methods: Vec<_> = server
        .events(&session.id)
        .await
        .into_iter()
        .map(|e| e.method)
        .collect();
    assert_eq!(methods, ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]);
}

#[tokio::test]
async fn test_unknown_session() {
    let server = TestServer::start().await;

    let (status, body) = server.call("POST", "/events/missing", "payload").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "Session not found");

    let (status, _) = server.call("GET", "/api/sessions/missing", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(connect_async(format!("ws://{}/ws/missing", server.addr))
        .await
        .is_err());
    assert_eq!(server.registry.session_count().await, 0);
}

#[tokio::test]
async fn test_observer_replay_then_live() {
    let server = TestServer::start().await;
    let session = server.create_session().await;
    let path = format!("/events/{}", session.id);

    for n in 0..3 {
        server.call("POST", &path, &format!("early {n}")).await;
    }

    let mut observer = server.observe(&session.id).await;
    match next_message(&mut observer).await {
        ObserverMessage::InitialEvents { events } => {
            let bodies: Vec<_> = events.iter().map(|e| e.body.as_str()).collect();
            assert_eq!(bodies, ["early 0", "early 1", "early 2"]);
        }
        other => panic!("expected initial_events, got {other:?}"),
    }

    server.call("POST", &path, "live").await;
    let live = match next_message(&mut observer).await {
        ObserverMessage::NewEvent { event } => event,
        other => panic!("expected new_event, got {other:?}"),
    };
    assert_eq!(live.body, "live");

    let stored = server.events(&session.id).await;
    assert_eq!(stored.len(), 4);
    assert_eq!(stored.last(), Some(&live));

    observer.close(None).await.unwrap();
}

#[tokio::test]
async fn test_second_observer_replaces_first() {
    let server = TestServer::start().await;
    let session = server.create_session().await;

    let mut first = server.observe(&session.id).await;
    assert!(matches!(
        next_message(&mut first).await,
        ObserverMessage::InitialEvents { .. }
    ));

    let mut second = server.observe(&session.id).await;
    assert!(matches!(
        next_message(&mut second).await,
        ObserverMessage::InitialEvents { .. }
    ));

    server
        .call("POST", &format!("/events/{}", session.id), "only for second")
        .await;

    match next_message(&mut second).await {
        ObserverMessage::NewEvent { event } => assert_eq!(event.body, "only for second"),
        other => panic!("expected new_event, got {other:?}"),
    }

    // The superseded socket is closed without receiving the event
    let frame = tokio::time::timeout(WAIT, first.next())
        .await
        .expect("superseded observer was not closed");
    assert!(!matches!(frame, Some(Ok(Message::Text(_)))));

    second.send(Message::Close(None)).await.ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures() {
    let server = Arc::new(TestServer::start().await);
    let session = server.create_session().await;

    let mut tasks = Vec::new();
    for n in 0..32 {
        let server = Arc::clone(&server);
        let path = format!("/events/{}", session.id);
        tasks.push(tokio::spawn(async move {
            let (status, _) = server.call("POST", &path, &format!("capture {n}")).await;
            assert_eq!(status, StatusCode::OK);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let events = server.events(&session.id).await;
    assert_eq!(events.len(), 32);

    let ids: HashSet<_> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), 32);
    let bodies: HashSet<_> = events.iter().map(|e| e.body.as_str()).collect();
    assert_eq!(bodies.len(), 32);
}

#[tokio::test]
async fn test_cors_headers() {
    let server = TestServer::start().await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri(format!("http://{}/api/sessions", server.addr))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = tokio::time::timeout(WAIT, server.client.request(request))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_capture_acknowledged_while_connections_are_held() {
    let server = TestServer::start().await;
    let session = server.create_session().await;

    // Idle sockets and open observers must not starve a capture
    let mut idle = Vec::new();
    for _ in 0..4 {
        idle.push(TcpStream::connect(server.addr).await.unwrap());
    }
    let mut observers = Vec::new();
    for _ in 0..3 {
        let mut observer = server.observe(&session.id).await;
        next_message(&mut observer).await;
        observers.push(observer);
    }

    // A fresh connection, so the pooled client cannot mask a refused accept
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "POST /events/{} HTTP/1.1\r\nHost: {}\r\nContent-Length: 4\r\n\
         Connection: close\r\n\r\nping",
        session.id, server.addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .expect("capture was not acknowledged")
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

    let events = server.events(&session.id).await;
    assert_eq!(events.last().map(|e| e.body.as_str()), Some("ping"));
    drop(idle);
}

#[tokio::test]
async fn test_shutdown_closes_observers() {
    let server = TestServer::start().await;
    let session = server.create_session().await;

    let mut observer = server.observe(&session.id).await;
    assert!(matches!(
        next_message(&mut observer).await,
        ObserverMessage::InitialEvents { .. }
    ));

    server.shutdown.send(()).unwrap();

    let frame = tokio::time::timeout(WAIT, observer.next())
        .await
        .expect("observer was not closed on shutdown");
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));
}
