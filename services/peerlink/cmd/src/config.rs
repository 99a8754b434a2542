//! Configuration handling for the peerlink node.
//!
//! Values come from a YAML file, then environment variables, then explicit
//! command line flags (applied in `main`).

use anyhow::Result;
use clap::ValueEnum;
use peerlink_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// What the node does with inbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Write every message back to the session it came from
    Echo,
    /// Forward every message to all other sessions
    Relay,
    /// Only log inbound messages
    Log,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address to accept sessions on
    pub listen: Option<SocketAddr>,
    /// Peers to dial at startup
    pub connect: Vec<SocketAddr>,
    /// Inbound message handling
    pub mode: Mode,
    /// Settings applied to every session
    pub session: SessionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: Vec::new(),
            mode: Mode::Log,
            session: SessionConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    node: Option<NodeSection>,
    session: Option<SessionConfig>,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    listen: Option<SocketAddr>,
    connect: Option<Vec<SocketAddr>>,
    mode: Option<Mode>,
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides();

        info!(
            "Final node configuration: listen={:?}, connect={:?}, mode={:?}, max_frame_size={}",
            config.listen, config.connect, config.mode, config.session.max_frame_size
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(node) = root_config.node {
            if node.listen.is_some() {
                self.listen = node.listen;
            }
            if let Some(connect) = node.connect {
                self.connect = connect;
            }
            if let Some(mode) = node.mode {
                self.mode = mode;
            }
        }

        if let Some(session) = root_config.session {
            self.session = session;
        }
    }

    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `PEERLINK_*` overrides; unparsable values are logged and ignored
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("PEERLINK_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring PEERLINK_LISTEN={}: {}", listen, e),
            }
        }

        if let Some(max_frame_size) = lookup("PEERLINK_MAX_FRAME_SIZE") {
            match max_frame_size.parse::<usize>() {
                Ok(size) => {
                    self.session.max_frame_size = size;
                    info!("Max frame size overridden by environment: {}", size);
                }
                Err(e) => warn!("Ignoring PEERLINK_MAX_FRAME_SIZE={}: {}", max_frame_size, e),
            }
        }

        if let Some(mode) = lookup("PEERLINK_MODE") {
            match Mode::from_str(&mode, true) {
                Ok(mode) => {
                    self.mode = mode;
                    info!("Mode overridden by environment: {:?}", mode);
                }
                Err(e) => warn!("Ignoring PEERLINK_MODE={}: {}", mode, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen, None);
        assert!(config.connect.is_empty());
        assert_eq!(config.mode, Mode::Log);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  listen: 127.0.0.1:9000
  connect:
    - 127.0.0.1:9001
    - 127.0.0.1:9002
  mode: relay

session:
  max_frame_size: 4096
  tcp_nodelay: false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = NodeConfig::default();
        let root: RootConfig =
            serde_yaml::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        config.apply_root_config(root);

        assert_eq!(config.listen, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(config.connect.len(), 2);
        assert_eq!(config.mode, Mode::Relay);
        assert_eq!(config.session.max_frame_size, 4096);
        assert!(!config.session.tcp_nodelay);
        // Unset keys keep their defaults
        assert_eq!(
            config.session.read_buffer_capacity,
            SessionConfig::default().read_buffer_capacity
        );
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn overrides(vars: &[(&str, &str)]) -> (NodeConfig, String) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let mut config = NodeConfig::default();
        tracing::subscriber::with_default(subscriber, || {
            config.apply_overrides(|name| {
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
            });
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        (config, output)
    }

    #[test]
    fn test_environment_overrides() {
        let (config, _) = overrides(&[
            ("PEERLINK_LISTEN", "127.0.0.1:9100"),
            ("PEERLINK_MAX_FRAME_SIZE", "2048"),
            ("PEERLINK_MODE", "ECHO"),
        ]);
        assert_eq!(config.listen, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(config.session.max_frame_size, 2048);
        assert_eq!(config.mode, Mode::Echo);
    }

    #[test]
    fn test_bad_environment_overrides_warn() {
        let (config, output) = overrides(&[
            ("PEERLINK_LISTEN", "nowhere"),
            ("PEERLINK_MAX_FRAME_SIZE", "lots"),
            ("PEERLINK_MODE", "shout"),
        ]);
        assert_eq!(config.listen, None);
        assert_eq!(config.session.max_frame_size, SessionConfig::default().max_frame_size);
        assert_eq!(config.mode, Mode::Log);

        assert!(output.contains("Ignoring PEERLINK_LISTEN=nowhere"));
        assert!(output.contains("Ignoring PEERLINK_MAX_FRAME_SIZE=lots"));
        assert!(output.contains("Ignoring PEERLINK_MODE=shout"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.session.max_frame_size, SessionConfig::default().max_frame_size);
    }
}
