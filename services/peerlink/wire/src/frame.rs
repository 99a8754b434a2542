//! Message framing for the wire protocol.
//!
//! Every message travels as one length-prefixed frame: a big-endian `u32`
//! body length, a version byte, a flags byte and the payload.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Length prefix size in bytes
pub const LEN_PREFIX_SIZE: usize = 4;

/// Version + flags bytes that precede the payload
pub const FRAME_HEADER_SIZE: usize = 2;

/// Maximum frame body size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum frame body size limit (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

bitflags! {
    /// Message flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Payload is UTF-8 text
        const TEXT = 1 << 0;
    }
}

/// One logical message as carried by a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message flags
    pub flags: Flags,
    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message with explicit flags
    pub fn new(flags: Flags, payload: Bytes) -> Self {
        Self { flags, payload }
    }

    /// Create a binary message
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Flags::empty(), payload.into())
    }

    /// Create a UTF-8 text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Flags::TEXT, Bytes::from(text.into()))
    }

    /// Payload as text, if the message is flagged as text and valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        if self.flags.contains(Flags::TEXT) {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        LEN_PREFIX_SIZE + FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode the message as one frame into `buf`
    pub fn encode_into(&self, buf: &mut BytesMut, max_frame_size: usize) -> Result<(), WireError> {
        let body_len = FRAME_HEADER_SIZE + self.payload.len();
        if body_len > max_frame_size || body_len > u32::MAX as usize {
            return Err(WireError::Size(body_len));
        }

        buf.reserve(LEN_PREFIX_SIZE + body_len);
        buf.put_u32(body_len as u32);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.flags.bits());
        buf.put_slice(&self.payload);

        Ok(())
    }

    /// Encode the message to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode_into(&mut buf, max_frame_size)?;
        Ok(buf.freeze())
    }
}

/// Incremental frame decoder
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a frame decoder with a custom size limit (clamped to the hard limit)
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Configured size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode one message from a buffer.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
    /// Consumed bytes are removed from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at frame length
        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if frame_len > self.max_frame_size {
            return Err(WireError::Size(frame_len));
        }
        if frame_len < FRAME_HEADER_SIZE {
            return Err(WireError::Malformed);
        }

        if buf.len() < LEN_PREFIX_SIZE + frame_len {
            buf.reserve(LEN_PREFIX_SIZE + frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(LEN_PREFIX_SIZE);
        let mut frame_buf = buf.split_to(frame_len).freeze();

        let version = frame_buf.get_u8();
        if version != WIRE_VERSION {
            return Err(WireError::Version(version));
        }

        let raw_flags = frame_buf.get_u8();
        let flags = Flags::from_bits(raw_flags)
            .ok_or(WireError::Reserved(raw_flags & !Flags::all().bits()))?;

        Ok(Some(Message {
            flags,
            payload: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let encoded = Message::text("hello").encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::from(&encoded[..3]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[3..encoded.len() - 1]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        let message = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message.as_text(), Some("hello"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut buf = BytesMut::new();
        Message::text("a").encode_into(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap();
        Message::binary(vec![0u8, 1, 2]).encode_into(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap();

        let mut decoder = FrameDecoder::new();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.as_text(), Some("a"));
        assert_eq!(second.flags, Flags::empty());
        assert_eq!(&second.payload[..], &[0, 1, 2]);
        assert!(second.as_text().is_none());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_empty_payload() {
        let encoded = Message::binary(Bytes::new()).encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(encoded.len(), LEN_PREFIX_SIZE + FRAME_HEADER_SIZE);

        let mut buf = BytesMut::from(&encoded[..]);
        let message = FrameDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert!(message.payload.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_size(8);
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        assert!(matches!(decoder.decode(&mut buf), Err(WireError::Size(9))));

        let too_big = Message::binary(vec![0u8; 7]);
        assert!(matches!(too_big.encode(8), Err(WireError::Size(9))));
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(WIRE_VERSION);
        assert!(matches!(decoder.decode(&mut buf), Err(WireError::Malformed)));

        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u8(9);
        buf.put_u8(0);
        assert!(matches!(decoder.decode(&mut buf), Err(WireError::Version(9))));

        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(0x81);
        assert!(matches!(decoder.decode(&mut buf), Err(WireError::Reserved(0x80))));
    }

    #[test]
    fn test_max_frame_size_clamped() {
        let decoder = FrameDecoder::with_max_frame_size(usize::MAX);
        assert_eq!(decoder.max_frame_size(), HARD_MAX_FRAME_SIZE);
    }
}
