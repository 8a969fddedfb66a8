//! Session configuration.

use crate::error::Result;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rxp_policy::AccessPolicy;
use rxp_protocol::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Port a server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 6789;

/// Configuration for a [`Server`](crate::Server).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address to bind.
    pub listen_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Grants given to every request before its `Authorization` header is
    /// applied, in `pattern rights, ...` form.
    pub default_credentials: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 100,
            max_frame_size: MAX_FRAME_SIZE,
            default_credentials: None,
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the default
    /// credentials do not parse.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if let Some(grants) = &config.default_credentials {
            AccessPolicy::from_authorization(grants)?;
        }
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Maximum frame size.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Shared, swappable server configuration.
///
/// Each request reads the snapshot current at the time it arrives; a
/// connection reads its frame limit once when it is accepted.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<ServerConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Wraps a fixed configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: None,
        }
    }

    /// Loads `path` and remembers it for [`Self::reload`].
    ///
    /// # Errors
    ///
    /// Fails like [`ServerConfig::load`].
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = ServerConfig::load(&path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: Some(path),
        })
    }

    /// The current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<ServerConfig> {
        self.current.load_full()
    }

    /// Replaces the configuration.
    pub fn store(&self, config: ServerConfig) {
        self.current.store(Arc::new(config));
    }

    /// Re-reads the file this handle was created from. Without a file the
    /// current snapshot is returned unchanged. On error the previous
    /// configuration stays in place.
    ///
    /// # Errors
    ///
    /// Fails like [`ServerConfig::load`].
    pub fn reload(&self) -> Result<Arc<ServerConfig>> {
        let Some(path) = &self.path else {
            return Ok(self.load());
        };

        let config = Arc::new(ServerConfig::load(path)?);
        self.current.store(Arc::clone(&config));
        info!(path = %path.display(), "reloaded server config");
        Ok(config)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tracing_test::traced_test;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            listen-addr = "0.0.0.0:7000"
            default-credentials = "public/# r, me/# crud"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert_eq!(
            config.default_credentials.as_deref(),
            Some("public/# r, me/# crud")
        );
    }

    #[test]
    fn test_bad_default_credentials_are_rejected() {
        assert!(matches!(
            ServerConfig::from_toml_str(r#"default-credentials = "public/#""#),
            Err(Error::Credentials(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("max-connections = \"many\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_reload_swaps_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max-connections = 5").unwrap();

        let handle = ConfigHandle::from_file(file.path()).unwrap();
        let before = handle.load();
        assert_eq!(before.max_connections, 5);

        std::fs::write(file.path(), "max-connections = 7\n").unwrap();
        assert_eq!(handle.reload().unwrap().max_connections, 7);
        assert_eq!(handle.load().max_connections, 7);
        assert_eq!(before.max_connections, 5);
        assert!(logs_contain("reloaded server config"));

        std::fs::write(file.path(), "max-connections = [").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.load().max_connections, 7);
    }

    #[test]
    fn test_store_without_file() {
        let handle = ConfigHandle::default();
        handle.store(ServerConfig {
            max_frame_size: 1024,
            ..ServerConfig::default()
        });
        assert_eq!(handle.reload().unwrap().max_frame_size, 1024);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ServerConfig::load(dir.path().join("absent.toml")),
            Err(Error::Io(_))
        ));
    }
}
