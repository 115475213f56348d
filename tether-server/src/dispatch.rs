//! Two-tier message dispatch.
//!
//! Each decoded message is offered to the scripted layer first; the
//! native fallback layer is only consulted when the scripted layer does
//! not handle it. A layer failure is contained at this boundary: it is
//! logged, counts as not-handled for that layer, and never closes the
//! connection.

use crate::connection::{Connection, ConnectionId};
use crate::error::HandlerError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use tether_protocol::Message;

/// Outcome of routing one message through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Unhandled,
}

/// Reply handle bound to the connection a message arrived on.
///
/// Passed into every handler invocation so a reply addresses the
/// originating peer without any shared mutable state between
/// concurrent dispatches.
#[derive(Clone)]
pub struct ReplyContext {
    conn: Arc<Connection>,
}

impl ReplyContext {
    fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Sends a reply to the originating peer.
    pub async fn send(&self, discriminator: u32, payload: &[u8]) -> bool {
        self.conn.send(discriminator, payload).await
    }
}

/// A handling layer's capability: attempt to process one message.
#[async_trait]
pub trait HandlerLayer: Send + Sync {
    /// Layer name used in logs.
    fn name(&self) -> &'static str;

    /// Attempts to handle the message. `Ok(true)` means handled;
    /// `Ok(false)` means this layer has no handler for it. An error
    /// means the layer itself failed and counts as not-handled.
    async fn attempt_handle(
        &self,
        message: Message,
        reply: ReplyContext,
    ) -> Result<bool, HandlerError>;
}

/// A single registered message handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, reply: ReplyContext) -> Result<(), HandlerError>;
}

/// Adapts a closure returning a boxed future into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Message, ReplyContext) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message, ReplyContext) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(&self, message: Message, reply: ReplyContext) -> Result<(), HandlerError> {
        (self.f)(message, reply).await
    }
}

/// Discriminator-keyed handler table, usable as a handling layer.
///
/// Registering an already-registered discriminator overwrites the
/// previous handler.
pub struct HandlerTable {
    name: &'static str,
    handlers: DashMap<u32, Arc<dyn MessageHandler>>,
}

impl HandlerTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: DashMap::new(),
        }
    }

    /// Registers a handler for a discriminator, overwriting any
    /// previous registration.
    pub fn register(&self, discriminator: u32, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(discriminator, handler);
    }

    /// Registers an async closure for a discriminator.
    pub fn register_fn<F>(&self, discriminator: u32, f: F)
    where
        F: Fn(Message, ReplyContext) -> BoxFuture<'static, Result<(), HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(discriminator, Arc::new(FnHandler::new(f)));
    }

    /// Removes a handler, returning whether one was registered.
    pub fn unregister(&self, discriminator: u32) -> bool {
        self.handlers.remove(&discriminator).is_some()
    }

    pub fn contains(&self, discriminator: u32) -> bool {
        self.handlers.contains_key(&discriminator)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl HandlerLayer for HandlerTable {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt_handle(
        &self,
        message: Message,
        reply: ReplyContext,
    ) -> Result<bool, HandlerError> {
        let handler = match self.handlers.get(&message.discriminator) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(false),
        };
        handler.handle(message, reply).await?;
        Ok(true)
    }
}

/// Routes messages through the scripted layer, then the native fallback.
pub struct Dispatcher {
    scripted: Arc<dyn HandlerLayer>,
    native: Arc<dyn HandlerLayer>,
}

impl Dispatcher {
    pub fn new(scripted: Arc<dyn HandlerLayer>, native: Arc<dyn HandlerLayer>) -> Self {
        Self { scripted, native }
    }

    /// Dispatches one decoded message from `conn`.
    ///
    /// Messages for non-open connections are rejected. The scripted
    /// layer has first refusal; the native layer is never consulted
    /// once the scripted layer reports handled.
    pub async fn dispatch(&self, conn: &Arc<Connection>, message: &Message) -> DispatchOutcome {
        if !conn.is_open() {
            tracing::error!(
                conn = %conn.id(),
                discriminator = message.discriminator,
                "dispatch on non-open connection"
            );
            return DispatchOutcome::Unhandled;
        }

        let reply = ReplyContext::new(Arc::clone(conn));

        for layer in [&self.scripted, &self.native] {
            match layer.attempt_handle(message.clone(), reply.clone()).await {
                Ok(true) => return DispatchOutcome::Handled,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        conn = %conn.id(),
                        layer = layer.name(),
                        discriminator = message.discriminator,
                        "handler failed: {}", e
                    );
                }
            }
        }

        tracing::warn!(
            conn = %conn.id(),
            discriminator = message.discriminator,
            "unhandled discriminator"
        );
        DispatchOutcome::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_protocol::{BodyCodec, TagPrefixCodec};
    use tokio::io::AsyncReadExt;

    const MAX: usize = 1024;

    fn codec() -> Arc<dyn BodyCodec> {
        Arc::new(TagPrefixCodec)
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        let counter = Arc::clone(counter);
        Arc::new(FnHandler::new(move |_msg, _reply| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
    }

    #[tokio::test]
    async fn test_scripted_layer_has_first_refusal() {
        let scripted = Arc::new(HandlerTable::new("scripted"));
        let native = Arc::new(HandlerTable::new("native"));

        let scripted_hits = Arc::new(AtomicUsize::new(0));
        let native_hits = Arc::new(AtomicUsize::new(0));
        scripted.register(1, counting_handler(&scripted_hits));
        native.register(1, counting_handler(&native_hits));

        let dispatcher = Dispatcher::new(scripted, native);
        let conn = Connection::detached(codec(), MAX);

        let outcome = dispatcher.dispatch(&conn, &Message::new(1, &b""[..])).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(scripted_hits.load(Ordering::SeqCst), 1);
        assert_eq!(native_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_native_layer_is_the_fallback() {
        let scripted = Arc::new(HandlerTable::new("scripted"));
        let native = Arc::new(HandlerTable::new("native"));

        let native_hits = Arc::new(AtomicUsize::new(0));
        native.register(2, counting_handler(&native_hits));

        let dispatcher = Dispatcher::new(scripted, native);
        let conn = Connection::detached(codec(), MAX);

        let outcome = dispatcher.dispatch(&conn, &Message::new(2, &b""[..])).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(native_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_falls_through_without_closing() {
        let scripted = Arc::new(HandlerTable::new("scripted"));
        let native = Arc::new(HandlerTable::new("native"));

        scripted.register_fn(3, |_msg, _reply| {
            Box::pin(async move { Err(HandlerError::new("script raised")) })
        });
        let native_hits = Arc::new(AtomicUsize::new(0));
        native.register(3, counting_handler(&native_hits));

        let dispatcher = Dispatcher::new(scripted, native);
        let conn = Connection::detached(codec(), MAX);

        let outcome = dispatcher.dispatch(&conn, &Message::new(3, &b""[..])).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(native_hits.load(Ordering::SeqCst), 1);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_unhandled_leaves_connection_open() {
        let dispatcher = Dispatcher::new(
            Arc::new(HandlerTable::new("scripted")),
            Arc::new(HandlerTable::new("native")),
        );
        let conn = Connection::detached(codec(), MAX);

        let outcome = dispatcher.dispatch(&conn, &Message::new(99, &b""[..])).await;

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_closed_connection() {
        let scripted = Arc::new(HandlerTable::new("scripted"));
        let hits = Arc::new(AtomicUsize::new(0));
        scripted.register(4, counting_handler(&hits));

        let dispatcher = Dispatcher::new(scripted, Arc::new(HandlerTable::new("native")));
        let conn = Connection::detached(codec(), MAX);
        conn.close().await;

        let outcome = dispatcher.dispatch(&conn, &Message::new(4, &b""[..])).await;

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let table = HandlerTable::new("native");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        table.register(5, counting_handler(&first));
        table.register(5, counting_handler(&second));
        assert_eq!(table.len(), 1);

        let conn = Connection::detached(codec(), MAX);
        let reply = ReplyContext::new(Arc::clone(&conn));
        let handled = table
            .attempt_handle(Message::new(5, &b""[..]), reply)
            .await
            .unwrap();

        assert!(handled);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let table = HandlerTable::new("native");
        let hits = Arc::new(AtomicUsize::new(0));

        table.register(6, counting_handler(&hits));
        assert!(table.contains(6));
        assert!(table.unregister(6));
        assert!(!table.unregister(6));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_reply_addresses_originating_connection() {
        let (server_end, mut client_end) = tokio::io::duplex(4096);
        let conn = Connection::new(server_end, "127.0.0.1:0".parse().unwrap(), codec(), MAX);

        let scripted = Arc::new(HandlerTable::new("scripted"));
        scripted.register_fn(8, |msg, reply| {
            Box::pin(async move {
                reply.send(msg.discriminator, b"pong").await;
                Ok(())
            })
        });

        let dispatcher = Dispatcher::new(scripted, Arc::new(HandlerTable::new("native")));
        let outcome = dispatcher.dispatch(&conn, &Message::new(8, &b""[..])).await;
        assert_eq!(outcome, DispatchOutcome::Handled);

        let mut received = [0u8; 12];
        client_end.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..4], &[0, 0, 0, 8]);
        assert_eq!(&received[4..8], &[0, 0, 0, 8]);
        assert_eq!(&received[8..], b"pong");
    }
}
