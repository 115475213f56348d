//! TCP server assembly.
//!
//! Binds the listener, wires each accepted socket into a
//! [`Connection`], registers it, and routes its decoded messages
//! through the [`Dispatcher`]. Kept thin: all protocol and lifecycle
//! logic lives in the components it composes.

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{BodyCodec, TagPrefixCodec};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7830".parse().expect("valid default address"),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            max_body_size: tether_protocol::DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            max_body_size: config.protocol.max_body_size,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub messages_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for tether.
pub struct Server {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    codec: Arc<dyn BodyCodec>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a new server with the default body codec.
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            dispatcher,
            codec: Arc::new(TagPrefixCodec),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Replaces the body codec.
    pub fn with_codec(mut self, codec: Arc<dyn BodyCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        self.running.store(true, Ordering::SeqCst);

        tracing::info!("Server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.registry.count() >= self.config.max_connections {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                drop(stream);
                                continue;
                            }
                            self.spawn_connection(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Wires one accepted socket into the pipeline and spawns its read task.
    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let (mut read_half, write_half) = stream.into_split();
        let conn = Connection::new(
            write_half,
            addr,
            Arc::clone(&self.codec),
            self.config.max_body_size,
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        conn.set_on_message(Arc::new(move |conn, message| {
            let dispatcher = Arc::clone(&dispatcher);
            let stats = Arc::clone(&stats);
            Box::pin(async move {
                stats.messages_total.fetch_add(1, Ordering::Relaxed);
                dispatcher.dispatch(&conn, &message).await;
            })
        }));

        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        conn.set_on_close(Arc::new(move |conn| {
            let registry = Arc::clone(&registry);
            let stats = Arc::clone(&stats);
            Box::pin(async move {
                registry.remove(conn.id());
                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            })
        }));

        self.registry.add(Arc::clone(&conn));
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let idle_timeout = self.config.idle_timeout;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tracing::info!(conn = %conn.id(), peer = %addr, "client connected");
            let mut buf = [0u8; 8192];

            loop {
                tokio::select! {
                    result = read_half.read(&mut buf) => {
                        match result {
                            Ok(0) => {
                                tracing::debug!(conn = %conn.id(), "connection closed by peer");
                                break;
                            }
                            Ok(n) => conn.ingest(&buf[..n]).await,
                            Err(e) => {
                                tracing::debug!(conn = %conn.id(), "read error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep(idle_timeout) => {
                        if conn.idle_for() >= idle_timeout {
                            tracing::debug!(conn = %conn.id(), "idle timeout");
                            break;
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!(conn = %conn.id(), "shutdown signal received");
                        break;
                    }
                }

                // A protocol violation or a handler may have closed us.
                if !conn.is_open() {
                    break;
                }
            }

            conn.close().await;
            tracing::info!(conn = %conn.id(), peer = %addr, "client disconnected");
        });
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the bound address once [`Server::run`] has bound the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
