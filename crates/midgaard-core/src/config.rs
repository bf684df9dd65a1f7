//! Configuration resolution for the bridge.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Settings file (`--config`, else `<config dir>/midgaard/settings.toml`)
//! 3. Environment variables and CLI arguments, applied as [`ConfigOverrides`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub mud: MudConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Chat server endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MatrixConfig {
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    pub homeserver_url: String,
    /// Fully qualified bridge user, e.g. `@midgaard:example.org`.
    pub user_id: String,
    pub access_token: String,
}

/// Remote line server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MudConfig {
    /// `host:port` of the line server.
    pub host: String,
}

/// Session multiplexer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Leading character that marks a group-room message as a command.
    pub command_prefix: char,
    /// Events older than this are never forwarded.
    pub freshness_window_secs: u64,
    /// How long shutdown waits for session tasks to finish.
    pub shutdown_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_prefix: '$',
            freshness_window_secs: 60,
            shutdown_timeout_secs: 5,
        }
    }
}

impl BridgeConfig {
    pub const fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Long-poll settings for the chat event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server-side long-poll timeout.
    pub timeout_ms: u64,
    /// Delay before the first retry after a failed poll.
    pub retry_initial_ms: u64,
    /// Upper bound on the retry delay.
    pub retry_max_ms: u64,
    pub retry_multiplier: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_initial_ms: 1_000,
            retry_max_ms: 60_000,
            retry_multiplier: 2.0,
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub homeserver_url: Option<String>,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub mud_host: Option<String>,
    pub command_prefix: Option<char>,
    pub freshness_window_secs: Option<u64>,
}

impl Config {
    /// Apply overrides on top of whatever the file and defaults produced.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.homeserver_url {
            self.matrix.homeserver_url = url;
        }
        if let Some(user) = overrides.user_id {
            self.matrix.user_id = user;
        }
        if let Some(token) = overrides.access_token {
            self.matrix.access_token = token;
        }
        if let Some(host) = overrides.mud_host {
            self.mud.host = host;
        }
        if let Some(prefix) = overrides.command_prefix {
            self.bridge.command_prefix = prefix;
        }
        if let Some(secs) = overrides.freshness_window_secs {
            self.bridge.freshness_window_secs = secs;
        }
    }

    /// Check that every required setting is present and well formed.
    pub fn validate(&self) -> Result<()> {
        let raw = &self.matrix.homeserver_url;
        if raw.is_empty() {
            return Err(Error::Config("matrix.homeserver_url is required".into()));
        }
        let url = url::Url::parse(raw)
            .map_err(|e| Error::Config(format!("matrix.homeserver_url {raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(Error::Config(format!(
                "matrix.homeserver_url must be an http(s) URL, got {raw}"
            )));
        }
        if self.matrix.user_id.is_empty() {
            return Err(Error::Config("matrix.user_id is required".into()));
        }
        if self.matrix.access_token.is_empty() {
            return Err(Error::Config("matrix.access_token is required".into()));
        }

        let host = &self.mud.host;
        if host.is_empty() {
            return Err(Error::Config("mud.host is required".into()));
        }
        match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(Error::Config(format!(
                    "mud.host must be host:port, got {host}"
                )));
            }
        }

        if self.bridge.command_prefix.is_whitespace() {
            return Err(Error::Config(
                "bridge.command_prefix cannot be whitespace".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from defaults and a settings file.
///
/// An explicit `path` must exist. Without one, the default settings file is
/// read only if present.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config_file(path),
        None => match default_config_path() {
            Some(path) if path.exists() => load_config_file(&path),
            _ => Ok(Config::default()),
        },
    }
}

/// `<config dir>/midgaard/settings.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("midgaard").join("settings.toml"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read settings file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(toml::from_str(&content)?)
}
