//! Decoded messages and the body codec seam.
//!
//! The framing layer hands bodies through as opaque byte sequences; a
//! [`BodyCodec`] resolves each body's discriminator and builds outbound
//! bodies. Payload structure per discriminator is an application
//! concern and stays outside this crate.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the discriminator tag used by [`TagPrefixCodec`].
const TAG_SIZE: usize = 4;

/// A decoded application message: semantic kind plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unsigned integer identifying the message's semantic kind.
    pub discriminator: u32,
    /// Raw message body, including whatever encoding the body codec applied.
    pub body: Bytes,
}

impl Message {
    pub fn new(discriminator: u32, body: impl Into<Bytes>) -> Self {
        Self {
            discriminator,
            body: body.into(),
        }
    }
}

/// Application-level body codec.
///
/// Implementations decide how a discriminator is embedded in a body.
/// Extraction failure means the message has no valid discriminator and
/// must not be dispatched.
pub trait BodyCodec: Send + Sync {
    /// Extracts the message discriminator from a raw body.
    fn extract_discriminator(&self, body: &[u8]) -> Result<u32, ProtocolError>;

    /// Builds a raw body from a discriminator and payload.
    fn encode(&self, discriminator: u32, payload: &[u8]) -> Result<Bytes, ProtocolError>;
}

/// Default codec: a 4-byte big-endian discriminator tag in front of the
/// payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagPrefixCodec;

impl BodyCodec for TagPrefixCodec {
    fn extract_discriminator(&self, body: &[u8]) -> Result<u32, ProtocolError> {
        if body.len() < TAG_SIZE {
            return Err(ProtocolError::MissingDiscriminator(body.len()));
        }
        Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
    }

    fn encode(&self, discriminator: u32, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(TAG_SIZE + payload.len());
        buf.put_u32(discriminator);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_codec_roundtrip() {
        let codec = TagPrefixCodec;
        let body = codec.encode(7, b"payload").unwrap();
        assert_eq!(body.len(), TAG_SIZE + 7);
        assert_eq!(codec.extract_discriminator(&body).unwrap(), 7);
        assert_eq!(&body[TAG_SIZE..], b"payload");
    }

    #[test]
    fn test_tag_codec_empty_payload() {
        let codec = TagPrefixCodec;
        let body = codec.encode(0xDEAD_BEEF, b"").unwrap();
        assert_eq!(body.len(), TAG_SIZE);
        assert_eq!(codec.extract_discriminator(&body).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_tag_codec_short_body() {
        let codec = TagPrefixCodec;
        for len in 0..TAG_SIZE {
            let body = vec![0u8; len];
            let result = codec.extract_discriminator(&body);
            assert!(matches!(
                result,
                Err(ProtocolError::MissingDiscriminator(n)) if n == len
            ));
        }
    }

    #[test]
    fn test_tag_is_big_endian() {
        let codec = TagPrefixCodec;
        let body = codec.encode(0x0102_0304, b"").unwrap();
        assert_eq!(&body[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_message_new() {
        let msg = Message::new(42, &b"abc"[..]);
        assert_eq!(msg.discriminator, 42);
        assert_eq!(&msg.body[..], b"abc");
    }
}
