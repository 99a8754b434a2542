//! Session error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors returned to the owner of a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is no longer active; the owner should drop it
    #[error("session of {remote_addr} is closed")]
    Closed {
        /// Peer the session was connected to
        remote_addr: SocketAddr,
    },

    /// No session registered under this id
    #[error("no session with id {0}")]
    Unknown(u64),
}

/// A failure raised by a caller-supplied callback
#[derive(Error, Debug)]
pub(crate) enum CallbackError {
    #[error("callback returned error: {0:#}")]
    Failed(anyhow::Error),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    pub(crate) fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        CallbackError::Panicked(message)
    }
}
