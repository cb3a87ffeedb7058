//! Main network handler: listener, connection serving and shutdown

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::recording::Registry;
use crate::Result;

use super::{HttpHandler, SHUTDOWN_TIMEOUT_MS};

/// State shared by every request handler
pub struct AppState {
    /// Session registry
    pub registry: Arc<Registry>,
    /// Buffer size for each observer link
    pub observer_buffer: usize,
    shutdown_tx: broadcast::Sender<()>,
    observers: Mutex<JoinSet<()>>,
}

impl AppState {
    /// Create handler state around a registry
    #[must_use]
    pub fn new(registry: Arc<Registry>, observer_buffer: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            registry,
            observer_buffer,
            shutdown_tx,
            observers: Mutex::new(JoinSet::new()),
        }
    }

    /// Receiver signalled when the server shuts down
    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run an observer socket task that shutdown waits for
    pub async fn spawn_observer<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut observers = self.observers.lock().await;
        // Reap finished sockets so the set only holds live ones
        while observers.try_join_next().is_some() {}
        observers.spawn(task);
    }

    /// Number of observer sockets still running
    pub async fn active_observers(&self) -> usize {
        let mut observers = self.observers.lock().await;
        while observers.try_join_next().is_some() {}
        observers.len()
    }

    async fn drain_observers(&self) {
        let mut observers = self.observers.lock().await;
        while let Some(result) = observers.join_next().await {
            if let Err(e) = result {
                warn!("Observer cleanup error: {}", e);
            }
        }
    }

    async fn abort_observers(&self) {
        let mut observers = self.observers.lock().await;
        if !observers.is_empty() {
            warn!("Aborting {} observers after shutdown timeout", observers.len());
        }
        observers.shutdown().await;
    }
}

/// HTTP server bound to a listener
///
/// Every accepted connection is served; capture requests are never turned
/// away at admission.
pub struct NetworkHandler {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl NetworkHandler {
    /// Bind the listener configured in `config`
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(config: &Config, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(config.server.listen_addr).await?;

        Ok(Self {
            listener,
            state: Arc::new(AppState::new(registry, config.limits.observer_buffer)),
        })
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender that stops [`NetworkHandler::run`] when signalled
    ///
    /// Open observer sockets are closed by the same signal.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.state.shutdown_tx.clone()
    }

    /// Shut down once `signal` resolves successfully
    ///
    /// A signal that fails to install is logged and the server keeps running.
    pub fn shutdown_on<F>(&self, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            match signal.await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown.send(()).ok();
                }
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        })
    }

    /// State shared with request handlers
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Accept and serve connections until shutdown is signalled
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails irrecoverably
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        let mut shutdown_rx = self.state.subscribe_shutdown();
        let mut connections = JoinSet::new();

        info!("Listening on {}", addr);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let state = Arc::clone(&self.state);
                            connections.spawn(Self::serve_connection(stream, peer, state));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Listener {} shutting down", addr);
                    break;
                }
            }
        }

        // Let in-flight requests finish and observers send their Close frame,
        // then drop whatever is left
        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
            self.state.drain_observers().await;
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} connections after shutdown timeout", connections.len());
            connections.shutdown().await;
            self.state.abort_observers().await;
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
        let service = service_fn(move |request| {
            let state = Arc::clone(&state);
            async move { Ok::<_, Infallible>(HttpHandler::handle(state, request, peer).await) }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            debug!("Connection error ({}): {}", peer, e);
        }
    }
}
