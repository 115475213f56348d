//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing bytes or resolving message bodies.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame body too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("body too short for a discriminator: {0} bytes")]
    MissingDiscriminator(usize),
}
