//! # tether-protocol
//!
//! Wire protocol implementation for tether.
//!
//! This crate provides:
//! - Length-prefixed binary framing with incremental reassembly
//! - The [`BodyCodec`] seam that resolves message discriminators
//! - Protocol error types

pub mod error;
pub mod frame;
pub mod message;

pub use error::ProtocolError;
pub use frame::FRAME_HEADER_SIZE;
pub use message::{BodyCodec, Message, TagPrefixCodec};

/// Default maximum frame body size (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;
