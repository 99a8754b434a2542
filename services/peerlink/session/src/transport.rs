//! TCP transport for peerlink sessions.
//!
//! Binding, accepting and dialing stay with the owner; these helpers only
//! cover the common TCP case of handing a connected stream to a [`Session`].

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::config::SessionConfig;
use crate::session::{CloseCallback, ReadCallback, Session};
use peerlink_wire::MessageCodec;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

impl<C: MessageCodec> Session<C> {
    /// Start a session over a connected TCP stream.
    ///
    /// The peer address is taken from the socket. Fails only if the socket
    /// is already unusable.
    pub fn spawn_tcp(
        stream: TcpStream,
        codec: C,
        config: &SessionConfig,
        read_callback: ReadCallback<C>,
        close_callback: Option<CloseCallback<C>>,
    ) -> tokio::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(config.tcp_nodelay)?;
        debug!("Wrapping TCP stream from {} in a session", peer_addr);

        Ok(Self::spawn(stream, peer_addr, codec, read_callback, close_callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::on_message;
    use peerlink_wire::{FrameCodec, Message};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_tcp_sessions_exchange_messages() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();
        let config = SessionConfig::default();

        let (connected, accepted) = tokio::join!(connect_tcp(bound_addr), listener.accept());
        let (accepted, _) = accepted.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Session::spawn_tcp(
            accepted,
            config.frame_codec(),
            &config,
            on_message(move |session: &Session<FrameCodec>, message| {
                tx.send((session.remote_addr(), message))?;
                Ok(())
            }),
            None,
        )
        .unwrap();

        let client_stream = connected.unwrap();
        let client_addr = client_stream.local_addr().unwrap();
        let client = Session::spawn_tcp(
            client_stream,
            config.frame_codec(),
            &config,
            on_message(|_, _| Ok(())),
            None,
        )
        .unwrap();

        assert_eq!(client.remote_addr(), bound_addr);
        assert_eq!(server.remote_addr(), client_addr);

        client.write_message(Message::text("over tcp")).unwrap();
        let (from, message) = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(from, client_addr);
        assert_eq!(message.as_text(), Some("over tcp"));

        client.close();
        timeout(Duration::from_secs(5), server.closed()).await.unwrap();
    }
}
