//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved flag bits nonzero
    #[error("reserved bits nonzero: {0:#04x}")]
    Reserved(u8),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
