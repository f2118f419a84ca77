//! Server configuration.
//!
//! Stored as TOML. The file is taken from the first command-line argument,
//! then `$POND_CONFIG`, then the platform config directory:
//! - Linux: `~/.config/pondrelay/server.toml`
//! - Windows: `%APPDATA%/pondrelay/server.toml`

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pondrelay_server::ServerConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "POND_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Path the FilePond endpoint is mounted at.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Directory holding in-progress and unconfirmed uploads.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Directory holding committed uploads.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    /// Seconds of inactivity before a transfer is discarded (0 = never).
    #[serde(default = "default_transfer_ttl_secs")]
    pub transfer_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum request body in bytes (0 = unlimited).
    #[serde(default)]
    pub max_chunk_bytes: usize,

    /// Send permissive CORS headers.
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8888))
}

fn default_base_path() -> String {
    "/filepond".into()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/filepond/temp")
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("/tmp/filepond/save")
}

fn default_transfer_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            base_path: default_base_path(),
            temp_dir: default_temp_dir(),
            save_dir: default_save_dir(),
            transfer_ttl_secs: default_transfer_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_chunk_bytes: 0,
            cors: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default file there.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Settings for the HTTP layer.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
            base_path: self.base_path.clone(),
            transfer_ttl: Duration::from_secs(self.transfer_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_chunk_bytes: self.max_chunk_bytes,
            cors: self.cors,
        }
    }
}

/// Resolves the config file from an explicit argument, the environment,
/// or the platform default.
pub fn config_path(arg: Option<OsString>) -> anyhow::Result<PathBuf> {
    if let Some(arg) = arg {
        return Ok(PathBuf::from(arg));
    }
    if let Some(env) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env));
    }
    default_config_path()
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("pondrelay")
            .join("server.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("pondrelay").join("server.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/pondrelay/server.toml"))
    }
}
