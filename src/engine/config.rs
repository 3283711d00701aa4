//! Fleetward Configuration Module
//! Handles loading and validating the server and client JSON config files

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SERVER_CONFIG_FILE: &str = "fleetward-server.json";
pub const CLIENT_CONFIG_FILE: &str = "fleetward-update.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Could not determine hostname: {0}")]
    Hostname(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Document store directory
    pub store_path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hex-encoded Ed25519 secret key
    pub signing_key_path: PathBuf,
    /// Where built release bundles are kept and served from
    pub release_dir: PathBuf,
    #[serde(default = "default_release_file")]
    pub release_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Tree that releases and patches are installed into
    pub root_dir: PathBuf,
    /// Release marker, relative to `root_dir` unless absolute
    #[serde(default = "default_release_file")]
    pub release_file: String,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Hex-encoded Ed25519 public key of the server
    pub public_key: String,
    /// Shell command run after a change; the built-in signature check runs otherwise
    #[serde(default)]
    pub verify_command: Option<String>,
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Parent of the per-pass scratch directory
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    8400
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_release_file() -> String {
    "release.txt".to_string()
}

fn default_verify_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    60
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: ServerConfig = load_json(path)?;
        if config.release_file.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "release_file",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }

    /// Layout rooted at `base`, used when no config file exists yet
    pub fn default_for(base: &Path) -> Self {
        Self {
            store_path: base.join("store"),
            host: default_host(),
            port: default_port(),
            signing_key_path: base.join("signing.key"),
            release_dir: base.join("releases"),
            release_file: default_release_file(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: ClientConfig = load_json(path)?;
        if config.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server_url",
                reason: "must not be empty".to_string(),
            });
        }
        if config.public_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "public_key",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }

    pub fn release_path(&self) -> PathBuf {
        let file = Path::new(&self.release_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root_dir.join(file)
        }
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join("var"))
    }

    /// Configured hostname, or the system hostname when unset
    pub fn resolve_hostname(&self) -> Result<String, ConfigError> {
        if let Some(name) = self.hostname.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        let name = hostname::get().map_err(|e| ConfigError::Hostname(e.to_string()))?;
        let name = name.to_string_lossy().trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Hostname("system hostname is empty".to_string()));
        }
        Ok(name)
    }
}
