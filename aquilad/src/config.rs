//! Configuration loading for aquilad.
//!
//! The config path comes from the `AQUILAD_CONFIG` environment variable (or
//! the `--config` flag). The format is inferred from the file extension
//! (`.json`, `.yaml`, `.yml`); `http`/`https` URLs are fetched with a short
//! timeout.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use aquila_core::qos::QoS;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "AQUILAD_CONFIG";

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AQUILAD_CONFIG is not set; point it at a config file")]
    MissingPath,

    #[error("failed to read `{0}`: {1}")]
    Read(String, String),

    #[error("failed to fetch `{0}`: {1}")]
    Fetch(String, String),

    #[error("cannot infer config format from `{0}` (expected .json, .yaml or .yml)")]
    UnknownFormat(String),

    #[error("invalid config in `{0}`: {1}")]
    Parse(String, String),
}

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

/// Everything under the `server` key.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// TLS for the TCP listener; used when both paths are non-empty.
    pub tls: Option<TlsConfig>,

    /// TCP listen address (e.g. `0.0.0.0:1883`). Absent disables TCP.
    pub tcp: Option<String>,

    /// WebSocket listen address. Absent disables the WebSocket listener.
    pub http: Option<String>,

    /// Highest QoS granted to subscribers. Values above 2 behave as 2.
    #[serde(default = "default_max_qos")]
    pub max_qos: u8,

    pub auth: Option<AuthConfig>,

    pub persistence: Option<PersistenceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            tls: None,
            tcp: None,
            http: None,
            max_qos: default_max_qos(),
            auth: None,
            persistence: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert: String,

    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Backend selector; `file` is the built-in one.
    #[serde(rename = "type")]
    pub kind: String,

    /// Password file for the `file` backend (`username:hash` lines).
    pub password_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PersistenceConfig {
    /// Backend selector: `memory` (embedded) or `redis`. Anything else
    /// installs no store.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub memory: MemoryConfig,

    pub redis: Option<RedisConfig>,
}

/// Embedded store tuning. An empty path keeps everything in memory; a
/// non-empty path persists to a SQLite database at that location.
#[derive(Debug, Default, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub password: Option<String>,
}

fn default_max_qos() -> u8 {
    2
}

enum Format {
    Json,
    Yaml,
}

impl Format {
    fn infer(path: &str) -> Result<Format, ConfigError> {
        if path.ends_with(".json") {
            Ok(Format::Json)
        } else if path.ends_with(".yaml") || path.ends_with(".yml") {
            Ok(Format::Yaml)
        } else {
            Err(ConfigError::UnknownFormat(path.to_string()))
        }
    }
}

impl Config {
    /// Load from the path named by `AQUILAD_CONFIG`.
    pub async fn load() -> Result<Config, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).map_err(|_| ConfigError::MissingPath)?;
        Self::load_from(&path).await
    }

    /// Load from an explicit path or `http(s)` URL.
    pub async fn load_from(path: &str) -> Result<Config, ConfigError> {
        let contents = if path.starts_with("http://") || path.starts_with("https://") {
            fetch_remote(path).await?
        } else {
            std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(path.to_string(), e.to_string()))?
        };

        Self::parse(path, &contents)
    }

    fn parse(path: &str, contents: &str) -> Result<Config, ConfigError> {
        match Format::infer(path)? {
            Format::Json => serde_json::from_str(contents)
                .map_err(|e| ConfigError::Parse(path.to_string(), e.to_string())),
            Format::Yaml => serde_yaml::from_str(contents)
                .map_err(|e| ConfigError::Parse(path.to_string(), e.to_string())),
        }
    }

    /// The configured maximum QoS as a typed value.
    pub fn max_qos(&self) -> QoS {
        match self.server.max_qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

async fn fetch_remote(url: &str) -> Result<String, ConfigError> {
    let fetch = |e: reqwest::Error| ConfigError::Fetch(url.to_string(), e.to_string());

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(fetch)?;

    client
        .get(url)
        .send()
        .await
        .map_err(fetch)?
        .error_for_status()
        .map_err(fetch)?
        .text()
        .await
        .map_err(fetch)
}
