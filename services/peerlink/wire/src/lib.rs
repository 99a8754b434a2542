//! Message framing and the async message codec for peerlink sessions.
//!
//! This crate provides the codec a session uses to turn a byte stream into
//! discrete messages and back. Sessions only depend on the [`MessageCodec`]
//! trait; [`FrameCodec`] is the bundled implementation.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u8 version           | WIRE_VERSION               |
//! +----------------------+----------------------------+
//! | u8 flags             | TEXT, other bits reserved  |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;

// Re-export main types
pub use codec::{CodecError, FrameCodec, MessageCodec, DEFAULT_READ_BUFFER_CAPACITY};
pub use error::WireError;
pub use frame::{
    Flags, FrameDecoder, Message, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
    HARD_MAX_FRAME_SIZE, LEN_PREFIX_SIZE, WIRE_VERSION,
};
