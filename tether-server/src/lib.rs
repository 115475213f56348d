//! # tether-server
//!
//! TCP server for tether.
//!
//! This crate provides:
//! - Connection lifecycle management with inbound frame reassembly
//! - A concurrency-safe registry of live connections
//! - Two-tier message dispatch: scripted layer first, native fallback
//! - Server assembly binding accepted sockets to the pipeline

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig, ProtocolConfig};
pub use connection::{CloseCallback, Connection, ConnectionId, ConnectionState, MessageCallback};
pub use dispatch::{
    DispatchOutcome, Dispatcher, FnHandler, HandlerLayer, HandlerTable, MessageHandler,
    ReplyContext,
};
pub use error::{HandlerError, ServerError};
pub use registry::ConnectionRegistry;
pub use server::{Server, ServerConfig, ServerStats};
