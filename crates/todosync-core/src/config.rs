//! On-disk configuration.
//!
//! A single TOML file in the data directory (default `~/.todo/`). A missing
//! file is created with defaults on first run. Values that parse but make no
//! sense (port 0, empty passphrase, zero timeouts) fall back to their
//! defaults with a warning.
//!
//! ```toml
//! [database]
//! sort_key = "priority"
//! reverse_sort = false
//!
//! [server]
//! passphrase = "BewareTheBlackGuardian"
//! run = true
//! address = "127.0.0.1"
//! port = 5364
//! allow_pull = true
//! allow_push = true
//! ```

use std::{
    fmt, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use todosync_crypto::Key;
use todosync_proto::SortKey;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "todosync.toml";

/// Name of the collection document inside the data directory.
pub const LISTS_FILE: &str = "todo_lists.json";

/// Data directory name under the user's home.
pub const DATA_DIR: &str = ".todo";

/// Passphrase used when none is configured.
pub const DEFAULT_PASSPHRASE: &str = "BewareTheBlackGuardian";

/// Listening port used when none (or an invalid one) is configured.
pub const DEFAULT_PORT: u16 = 5364;

/// Listening address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUSH_LINGER_SECS: u64 = 10;
const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Errors loading or saving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory to derive the data directory from.
    #[error("unable to determine home directory")]
    NoHomeDir,

    /// Reading or writing the file failed.
    #[error("failed to access configuration at {path}: {source}")]
    Io {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// File is not valid TOML for this schema.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// Serializing the configuration failed.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Address and port do not form a socket address.
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
}

/// Shared secret both peers derive their key from.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    /// The passphrase text.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Derive the session key.
    pub fn key(&self) -> Key {
        Key::from_passphrase(&self.0)
    }
}

impl Default for Passphrase {
    fn default() -> Self {
        Self::new(DEFAULT_PASSPHRASE)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// List to make active on load and after a sync. Unset or empty means
    /// "choose automatically".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_list: Option<String>,
    /// Key used when sorting the active list.
    pub sort_key: SortKey,
    /// Sort descending.
    pub reverse_sort: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { active_list: None, sort_key: SortKey::Priority, reverse_sort: false }
    }
}

impl DatabaseConfig {
    /// Configured active list, treating the empty string as unset.
    pub fn active_list(&self) -> Option<&str> {
        self.active_list.as_deref().filter(|name| !name.is_empty())
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared secret.
    pub passphrase: Passphrase,
    /// Start the server on launch.
    pub run: bool,
    /// Bind address.
    pub address: String,
    /// Bind port.
    pub port: u16,
    /// Serve pull requests.
    pub allow_pull: bool,
    /// Accept push invitations.
    pub allow_push: bool,
    /// Port of the pusher to connect back to for the reverse pull. Defaults
    /// to our own listening port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_port: Option<u16>,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-read timeout in seconds.
    pub io_timeout_secs: u64,
    /// How long a pusher keeps pulls enabled waiting for the reverse pull.
    pub push_linger_secs: u64,
    /// Read window for the payload loop.
    pub read_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            passphrase: Passphrase::default(),
            run: true,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            allow_pull: true,
            allow_push: true,
            reply_port: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            push_linger_secs: DEFAULT_PUSH_LINGER_SECS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl ServerConfig {
    /// `address:port` to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.address, self.port);
        text.parse().map_err(|_| ConfigError::InvalidAddress(text))
    }

    /// Port the reverse pull connects to.
    pub fn reply_port(&self) -> u16 {
        self.reply_port.unwrap_or(self.port)
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-read timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Push linger window.
    pub fn push_linger(&self) -> Duration {
        Duration::from_secs(self.push_linger_secs)
    }
}

/// Full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `[database]`
    pub database: DatabaseConfig,
    /// `[server]`
    pub server: ServerConfig,
}

impl SyncConfig {
    /// Default data directory, `~/.todo`.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir().map(|home| home.join(DATA_DIR)).ok_or(ConfigError::NoHomeDir)
    }

    /// True if `dir` holds a configuration file.
    pub fn exists(dir: &Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    /// Load and validate the configuration in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        let mut config: Self =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate();
        Ok(config)
    }

    /// Write the configuration to `dir`, creating the directory if needed.
    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let path = dir.join(CONFIG_FILE);
        fs::create_dir_all(dir)
            .map_err(|source| ConfigError::Io { path: dir.to_path_buf(), source })?;
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
    }

    /// Load the configuration in `dir`, writing defaults first if there is
    /// none.
    pub fn load_or_init(dir: &Path) -> Result<Self, ConfigError> {
        if Self::exists(dir) {
            return Self::load(dir);
        }
        let config = Self::default();
        config.save(dir)?;
        tracing::info!(path = %dir.join(CONFIG_FILE).display(), "wrote default configuration");
        Ok(config)
    }

    /// Path of the collection document for data directory `dir`.
    pub fn lists_path(dir: &Path) -> PathBuf {
        dir.join(LISTS_FILE)
    }

    /// Replace nonsensical values with defaults.
    pub fn validate(&mut self) {
        let defaults = ServerConfig::default();
        let server = &mut self.server;

        if server.passphrase.expose().is_empty() {
            tracing::warn!("empty passphrase, using default");
            server.passphrase = defaults.passphrase;
        }
        if server.address.trim().is_empty() {
            tracing::warn!("empty server address, using {DEFAULT_ADDRESS}");
            server.address = defaults.address;
        }
        if server.port == 0 {
            tracing::warn!("server port 0 is invalid, using {DEFAULT_PORT}");
            server.port = defaults.port;
        }
        if server.reply_port == Some(0) {
            tracing::warn!("reply port 0 is invalid, using the server port");
            server.reply_port = None;
        }
        if server.connect_timeout_secs == 0 {
            tracing::warn!(
                "connect timeout of 0 is invalid, using {DEFAULT_CONNECT_TIMEOUT_SECS}s"
            );
            server.connect_timeout_secs = defaults.connect_timeout_secs;
        }
        if server.io_timeout_secs == 0 {
            tracing::warn!("I/O timeout of 0 is invalid, using {DEFAULT_IO_TIMEOUT_SECS}s");
            server.io_timeout_secs = defaults.io_timeout_secs;
        }
        if server.read_chunk_size == 0 {
            tracing::warn!("read chunk size of 0 is invalid, using {DEFAULT_READ_CHUNK_SIZE}");
            server.read_chunk_size = defaults.read_chunk_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!SyncConfig::exists(dir.path()));

        let config = SyncConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert!(SyncConfig::exists(dir.path()));
        assert_eq!(SyncConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn defaults_match_legacy_settings() {
        let server = ServerConfig::default();
        assert_eq!(server.passphrase.expose(), "BewareTheBlackGuardian");
        assert_eq!(server.bind_addr().unwrap(), "127.0.0.1:5364".parse().unwrap());
        assert!(server.run && server.allow_pull && server.allow_push);
        assert_eq!(server.connect_timeout(), Duration::from_secs(30));
        assert_eq!(server.reply_port(), 5364);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let partial = "[server]\nport = 6000\nallow_push = false\n";
        fs::write(dir.path().join(CONFIG_FILE), partial).unwrap();

        let config = SyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 6000);
        assert!(!config.server.allow_push);
        assert!(config.server.allow_pull);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn invalid_values_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[server]\nport = 0\npassphrase = \"\"\nread_chunk_size = 0\nreply_port = 0\n",
        )
        .unwrap();

        let config = SyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.passphrase, Passphrase::default());
        assert_eq!(config.server.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(config.server.reply_port, None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[server\nport = ").unwrap();
        assert!(matches!(SyncConfig::load(dir.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn active_list_empty_string_is_unset() {
        let mut db = DatabaseConfig::default();
        assert_eq!(db.active_list(), None);
        db.active_list = Some(String::new());
        assert_eq!(db.active_list(), None);
        db.active_list = Some("Work".into());
        assert_eq!(db.active_list(), Some("Work"));
    }

    #[test]
    fn passphrase_is_redacted() {
        let config = SyncConfig::default();
        let debug = format!("{config:?}");
        assert!(!debug.contains(DEFAULT_PASSPHRASE));
        assert!(debug.contains("Passphrase(<redacted>)"));
    }

    #[test]
    fn sort_key_round_trips_lowercase() {
        let mut config = SyncConfig::default();
        config.database.sort_key = SortKey::Reminder;
        config.database.reverse_sort = true;
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("sort_key = \"reminder\""));
        assert_eq!(toml::from_str::<SyncConfig>(&text).unwrap(), config);
    }
}
