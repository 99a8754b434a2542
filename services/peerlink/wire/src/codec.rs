//! Async message codec.
//!
//! [`MessageCodec`] is the boundary a session drives: one call decodes the
//! next message from a byte source, one call encodes and sends a message to
//! a byte sink. [`FrameCodec`] implements it for the length-prefixed frames
//! in [`crate::frame`].

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::frame::{FrameDecoder, Message, DEFAULT_MAX_FRAME_SIZE};
use crate::WireError;

/// Initial read buffer capacity
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Socket error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stream ended cleanly between messages
    #[error("EOF while reading frame")]
    Eof,
    /// Stream ended inside a frame
    #[error("stream ended mid-frame with {0} bytes buffered")]
    Truncated(usize),
}

impl CodecError {
    /// Whether the error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            CodecError::Eof | CodecError::Truncated(_) => true,
            CodecError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ),
            CodecError::Wire(_) => false,
        }
    }
}

/// Frames messages on a byte stream.
///
/// A session clones the codec once per direction, so an implementation may
/// keep per-direction buffering state in `self`.
#[async_trait]
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Logical message type
    type Message: Send + Sync + 'static;

    /// Read from `reader` until one complete message is available
    async fn decode_next<R>(&mut self, reader: &mut R) -> Result<Self::Message, CodecError>
    where
        R: AsyncRead + Unpin + Send;

    /// Encode `message` and write it fully to `writer`
    async fn encode_and_send<W>(
        &mut self,
        writer: &mut W,
        message: &Self::Message,
    ) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin + Send;
}

/// Length-prefixed frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    decoder: FrameDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl FrameCodec {
    /// Create a codec with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_BUFFER_CAPACITY)
    }

    /// Create a codec with a frame size limit and an initial read buffer capacity
    pub fn with_limits(max_frame_size: usize, read_buffer_capacity: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_frame_size(max_frame_size),
            read_buf: BytesMut::with_capacity(read_buffer_capacity),
            write_buf: BytesMut::new(),
        }
    }

    /// Configured frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.decoder.max_frame_size()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageCodec for FrameCodec {
    type Message = Message;

    async fn decode_next<R>(&mut self, reader: &mut R) -> Result<Message, CodecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            if let Some(message) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(message);
            }

            let bytes_read = reader.read_buf(&mut self.read_buf).await?;
            if bytes_read == 0 {
                if self.read_buf.is_empty() {
                    return Err(CodecError::Eof);
                }
                return Err(CodecError::Truncated(self.read_buf.len()));
            }

            trace!(
                "Read {} bytes, buffer now has {} bytes",
                bytes_read,
                self.read_buf.len()
            );
        }
    }

    async fn encode_and_send<W>(&mut self, writer: &mut W, message: &Message) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.write_buf.clear();
        message.encode_into(&mut self.write_buf, self.decoder.max_frame_size())?;

        writer.write_all(&self.write_buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_send_then_decode_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut tx = FrameCodec::new();
        let mut rx = FrameCodec::new();

        let writer = tokio::spawn(async move {
            // Larger than the duplex buffer, so the reader sees partial frames
            let big = Message::binary(vec![7u8; 1000]);
            tx.encode_and_send(&mut client, &Message::text("first")).await.unwrap();
            tx.encode_and_send(&mut client, &big).await.unwrap();
        });

        let first = rx.decode_next(&mut server).await.unwrap();
        let second = rx.decode_next(&mut server).await.unwrap();
        writer.await.unwrap();

        assert_eq!(first.as_text(), Some("first"));
        assert_eq!(second.payload.len(), 1000);
        assert!(matches!(rx.decode_next(&mut server).await, Err(CodecError::Eof)));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let encoded = Message::text("cut short").encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        let mut reader = Cursor::new(encoded[..encoded.len() - 2].to_vec());

        let err = FrameCodec::new().decode_next(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_oversized_send_is_rejected_before_writing() {
        let mut codec = FrameCodec::with_limits(16, 64);
        let mut sink: Vec<u8> = Vec::new();

        let err = codec
            .encode_and_send(&mut sink, &Message::binary(vec![0u8; 32]))
            .await
            .unwrap_err();

        assert!(matches!(err, CodecError::Wire(WireError::Size(_))));
        assert!(!err.is_disconnect());
        assert!(sink.is_empty());
    }
}
