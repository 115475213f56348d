//! Connection lifecycle and inbound frame reassembly.

use bytes::BytesMut;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_protocol::{frame, BodyCodec, Message};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting reads and writes.
    Open,
    /// Close requested; transport being released.
    Closing,
    /// Transport released and close callback finished. Terminal.
    Closed,
}

/// Callback invoked with each decoded inbound message.
pub type MessageCallback =
    Arc<dyn Fn(Arc<Connection>, Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked exactly once when the connection closes.
pub type CloseCallback = Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One live client connection.
///
/// Shared via `Arc` between the server assembly, the registry and
/// in-flight callback invocations; whoever holds the last reference
/// keeps it alive. The connection owns its transport write half and
/// inbound accumulator. Only the connection's own read task may call
/// [`Connection::ingest`].
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    accumulator: Mutex<BytesMut>,
    codec: Arc<dyn BodyCodec>,
    max_body_size: usize,
    last_activity: Mutex<Instant>,
    on_message: RwLock<Option<MessageCallback>>,
    on_close: RwLock<Option<CloseCallback>>,
}

impl Connection {
    /// Creates a connection around the write half of an accepted stream.
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        peer_addr: SocketAddr,
        codec: Arc<dyn BodyCodec>,
        max_body_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::generate(),
            peer_addr,
            state: Mutex::new(ConnectionState::Open),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            accumulator: Mutex::new(BytesMut::with_capacity(8192)),
            codec,
            max_body_size,
            last_activity: Mutex::new(Instant::now()),
            on_message: RwLock::new(None),
            on_close: RwLock::new(None),
        })
    }

    /// Creates a connection with no transport, for exercising the
    /// lifecycle and dispatch paths without a socket.
    #[cfg(test)]
    pub(crate) fn detached(codec: Arc<dyn BodyCodec>, max_body_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::generate(),
            peer_addr: "127.0.0.1:0".parse().unwrap(),
            state: Mutex::new(ConnectionState::Open),
            writer: tokio::sync::Mutex::new(None),
            accumulator: Mutex::new(BytesMut::new()),
            codec,
            max_body_size,
            last_activity: Mutex::new(Instant::now()),
            on_message: RwLock::new(None),
            on_close: RwLock::new(None),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Time since the last inbound bytes arrived.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Sets the callback invoked for each decoded inbound message.
    pub fn set_on_message(&self, callback: MessageCallback) {
        *self.on_message.write() = Some(callback);
    }

    /// Sets the callback invoked once when the connection closes.
    pub fn set_on_close(&self, callback: CloseCallback) {
        *self.on_close.write() = Some(callback);
    }

    /// Feeds newly arrived bytes into the accumulator and dispatches
    /// every complete frame, in arrival order.
    ///
    /// Each decoded body has its discriminator resolved by the body
    /// codec; bodies without one are logged and dropped. An oversized
    /// length prefix closes the connection and discards whatever else
    /// was buffered.
    pub async fn ingest(self: &Arc<Self>, data: &[u8]) {
        if !self.is_open() {
            return;
        }

        *self.last_activity.lock() = Instant::now();
        self.accumulator.lock().extend_from_slice(data);

        loop {
            // A handler may have closed us mid-loop.
            if !self.is_open() {
                return;
            }

            let decoded = {
                let mut buf = self.accumulator.lock();
                frame::try_decode_one(&mut buf, self.max_body_size)
            };

            match decoded {
                Ok(Some(body)) => {
                    let discriminator = match self.codec.extract_discriminator(&body) {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!(conn = %self.id, "dropping message: {}", e);
                            continue;
                        }
                    };

                    let callback = self.on_message.read().clone();
                    if let Some(callback) = callback {
                        callback(Arc::clone(self), Message { discriminator, body }).await;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(conn = %self.id, "frame decode failed: {}", e);
                    self.accumulator.lock().clear();
                    self.close().await;
                    return;
                }
            }
        }
    }

    /// Sends one message to the peer.
    ///
    /// Returns `false` if the connection is not open, body encoding or
    /// framing fails, or the transport write fails. Failed writes are
    /// reported, never retried.
    pub async fn send(&self, discriminator: u32, payload: &[u8]) -> bool {
        if !self.is_open() {
            tracing::debug!(conn = %self.id, discriminator, "send on non-open connection");
            return false;
        }

        let body = match self.codec.encode(discriminator, payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(conn = %self.id, discriminator, "body encoding failed: {}", e);
                return false;
            }
        };

        let framed = match frame::encode(&body, self.max_body_size) {
            Ok(framed) => framed,
            Err(e) => {
                tracing::error!(conn = %self.id, discriminator, "framing failed: {}", e);
                return false;
            }
        };

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => match w.write_all(&framed).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(conn = %self.id, "write failed: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Closes the connection.
    ///
    /// Idempotent: only the first call shuts down the transport and
    /// fires the close callback. The callback receives a strong
    /// reference, so the connection outlives registry removal performed
    /// inside it.
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Open {
                return;
            }
            *state = ConnectionState::Closing;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let callback = self.on_close.read().clone();
        if let Some(callback) = callback {
            callback(Arc::clone(self)).await;
        }

        *self.state.lock() = ConnectionState::Closed;
    }
}
