//! Per-session tuning shared by every session an owner creates.

use peerlink_wire::{FrameCodec, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};

/// Configuration for peerlink sessions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,
    /// Initial capacity of each session's read buffer
    pub read_buffer_capacity: usize,
    /// Disable Nagle's algorithm on TCP sessions
    pub tcp_nodelay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            tcp_nodelay: true,
        }
    }
}

impl SessionConfig {
    /// Frame codec honouring this configuration
    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::with_limits(self.max_frame_size, self.read_buffer_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_codec_uses_limits() {
        let config = SessionConfig {
            max_frame_size: 1024,
            ..SessionConfig::default()
        };
        assert_eq!(config.frame_codec().max_frame_size(), 1024);
    }
}
