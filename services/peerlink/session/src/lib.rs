//! Socket sessions with independent read and write loops for peerlink.
//!
//! A [`Session`] wraps one connected byte stream. It decodes inbound
//! messages on a read loop and hands each to the owner's read callback, and
//! drains an outbound queue on a write loop. [`Session::write_message`]
//! never blocks on I/O. [`Session::close`] is idempotent and may race with
//! I/O failures on either loop; the close callback still runs exactly once.
//!
//! ## Features
//!
//! - **Codec-agnostic**: any [`peerlink_wire::MessageCodec`] frames the stream
//! - **Resilient delivery**: read callback errors and panics are logged, never fatal
//! - **Idempotent close**: one lock-guarded transition, callable from anywhere
//! - **Completion tracking**: [`Session::closed`] and [`Session::join`]
//! - **Owner bookkeeping**: [`SessionRegistry`] deregisters closed sessions
//!
//! ## Example
//!
//! ```rust,no_run
//! use peerlink_session::{connect_tcp, on_close, on_message, Session, SessionConfig};
//! use peerlink_wire::{FrameCodec, Message};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SessionConfig::default();
//! let stream = connect_tcp("127.0.0.1:9000".parse()?).await?;
//!
//! let session = Session::spawn_tcp(
//!     stream,
//!     config.frame_codec(),
//!     &config,
//!     on_message(|session: &Session<FrameCodec>, message: Message| {
//!         println!("{} sent {:?}", session.remote_addr(), message.as_text());
//!         Ok(())
//!     }),
//!     Some(on_close(|session: &Session<FrameCodec>| {
//!         println!("{} closed", session.remote_addr());
//!         Ok(())
//!     })),
//! )?;
//!
//! session.write_message(Message::text("hello"))?;
//! session.close();
//! session.join().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod transport;

// Re-export main types
pub use config::SessionConfig;
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{on_close, on_message, CloseCallback, ReadCallback, Session, SessionStats};
pub use transport::{connect_tcp, listen_tcp};
