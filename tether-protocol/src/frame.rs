//! Length-prefixed binary framing.
//!
//! Frame layout (4 bytes header + payload):
//!
//! ```text
//! +-------------+------------------+
//! | body length | body             |
//! |   4 bytes   | body_length bytes|
//! +-------------+------------------+
//! ```
//!
//! The length prefix is an unsigned 32-bit big-endian integer counting
//! only the body. Bodies are opaque at this layer; decoding never
//! inspects their contents.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encodes one body into a length-prefixed frame.
pub fn encode(body: &[u8], max_body_size: usize) -> Result<BytesMut, ProtocolError> {
    if body.len() > max_body_size {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: max_body_size,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf)
}

/// Attempts to decode the next frame from the front of `buf`.
///
/// Returns `Ok(Some(body))` if a complete frame was consumed,
/// `Ok(None)` if more data is needed. A length prefix exceeding
/// `max_body_size` fails immediately, before the body arrives; bytes
/// after a consumed frame are left in `buf` for the next call.
pub fn try_decode_one(
    buf: &mut BytesMut,
    max_body_size: usize,
) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let prefix = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if prefix > max_body_size {
        return Err(ProtocolError::FrameTooLarge {
            size: prefix,
            max: max_body_size,
        });
    }

    if buf.len() < FRAME_HEADER_SIZE + prefix {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    Ok(Some(buf.split_to(prefix).freeze()))
}
