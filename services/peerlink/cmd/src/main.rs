//! peerlink node binary.
//!
//! Accepts and dials TCP peers, wraps each connection in a session and
//! handles inbound messages according to the configured mode.

use clap::Parser;
use futures::future::join_all;
use peerlink_session::{
    connect_tcp, listen_tcp, on_message, ReadCallback, Session, SessionConfig, SessionRegistry,
};
use peerlink_wire::{FrameCodec, Message};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{Mode, NodeConfig};
use logging::PeerlinkLogFormatter;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Message sessions over TCP
#[derive(Parser, Debug)]
#[command(name = "peerlink", version, about = "Message sessions over TCP")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:9000
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Connect to address, e.g. 127.0.0.1:9000 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Text message to send on every dialled session (repeatable)
    #[arg(long)]
    send: Vec<String>,

    /// Inbound message handling
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Largest accepted frame body in bytes
    #[arg(long)]
    max_frame_size: Option<usize>,

    /// Stop after this long, e.g. 30s (runs until ctrl-c otherwise)
    #[arg(long)]
    linger: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "peerlink.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("peerlink={}", args.log_level).parse()?)
        .add_directive(format!("peerlink_session={}", args.log_level).parse()?)
        .add_directive(format!("peerlink_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(PeerlinkLogFormatter::new("peerlink".to_string()))
        .init();

    info!("Starting peerlink v{}", env!("CARGO_PKG_VERSION"));

    let mut node_config = NodeConfig::load_from_file(&args.config)?;
    if args.listen.is_some() {
        node_config.listen = args.listen;
    }
    if !args.connect.is_empty() {
        node_config.connect = args.connect.clone();
    }
    if let Some(mode) = args.mode {
        node_config.mode = mode;
    }
    if let Some(max_frame_size) = args.max_frame_size {
        node_config.session.max_frame_size = max_frame_size;
    }

    if node_config.listen.is_none() && node_config.connect.is_empty() {
        anyhow::bail!("nothing to do: pass --listen and/or --connect");
    }

    let registry = SessionRegistry::<FrameCodec>::new();

    let listening = match node_config.listen {
        Some(addr) => {
            let listener = listen_tcp(addr).await?;
            info!("Listening on {} in {:?} mode", listener.local_addr()?, node_config.mode);
            tokio::spawn(accept_loop(
                listener,
                node_config.session.clone(),
                node_config.mode,
                registry.clone(),
            ));
            true
        }
        None => false,
    };

    let mut dialled = Vec::new();
    for addr in &node_config.connect {
        match dial(*addr, &node_config.session, &registry).await {
            Ok(session) => {
                for text in &args.send {
                    if let Err(e) = session.write_message(Message::text(text.as_str())) {
                        warn!("Could not send to {}: {}", addr, e);
                        break;
                    }
                }
                dialled.push(session);
            }
            Err(e) => error!("Failed to connect to {}: {}", addr, e),
        }
    }

    if !listening && dialled.is_empty() {
        anyhow::bail!("no sessions could be established");
    }

    let linger = async {
        match args.linger {
            Some(duration) => tokio::time::sleep(Duration::from(duration)).await,
            None => futures::future::pending().await,
        }
    };
    let all_dialled_closed = async {
        if listening {
            futures::future::pending::<()>().await;
        }
        join_all(dialled.iter().map(|session| session.closed())).await;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received ctrl-c"),
        _ = linger => info!("Linger period elapsed"),
        _ = all_dialled_closed => info!("All dialled sessions closed"),
    }

    registry.shutdown().await;
    info!("peerlink stopped");
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    config: SessionConfig,
    mode: Mode,
    registry: SessionRegistry<FrameCodec>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                accept_backoff(&e).await;
                continue;
            }
        };

        let session = Session::spawn_tcp(
            stream,
            config.frame_codec(),
            &config,
            inbound_handler(mode, registry.clone()),
            Some(registry.close_callback()),
        );

        match session {
            Ok(session) => {
                component_info!("accept", "Accepted session {} from {}", session.id(), peer);
                registry.insert(session);
            }
            Err(e) => warn!("Could not start session for {}: {}", peer, e),
        }
    }
}

/// Log a failed accept and pause before the next attempt
async fn accept_backoff(e: &std::io::Error) {
    component_warn!("accept", "Accept failed: {}", e);
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

async fn dial(
    addr: SocketAddr,
    config: &SessionConfig,
    registry: &SessionRegistry<FrameCodec>,
) -> anyhow::Result<Session<FrameCodec>> {
    let stream = connect_tcp(addr).await?;
    let session = Session::spawn_tcp(
        stream,
        config.frame_codec(),
        config,
        inbound_handler(Mode::Log, registry.clone()),
        Some(registry.close_callback()),
    )?;

    component_info!("dial", "Connected session {} to {}", session.id(), addr);
    registry.insert(session.clone());
    Ok(session)
}

fn describe(message: &Message) -> String {
    match message.as_text() {
        Some(text) => format!("{:?}", text),
        None => format!("{} bytes", message.payload.len()),
    }
}

fn inbound_handler(mode: Mode, registry: SessionRegistry<FrameCodec>) -> ReadCallback<FrameCodec> {
    on_message(move |session, message| {
        info!("{} -> {}", session.remote_addr(), describe(&message));

        match mode {
            Mode::Echo => session.write_message(message)?,
            Mode::Relay => {
                let forwarded = registry.broadcast(&message, Some(session.id()));
                component_debug!(
                    "relay",
                    "Relayed message from {} to {} sessions",
                    session.remote_addr(),
                    forwarded
                );
            }
            Mode::Log => {}
        }
        Ok(())
    })
}
