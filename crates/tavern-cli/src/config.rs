//! `tavern.toml` configuration.
//!
//! Every section and field is optional; a missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tavern_agent::ModelConfig;
use tavern_core::{TavernError, TavernResult};

/// Environment variable consulted when `[model] api_key` is empty.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const REDACTED: &str = "***";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TavernConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub orchestrator: NarratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON document per session under `data_dir`.
    #[default]
    File,
    /// Process memory; sessions are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_processing_lease")]
    pub processing_lease_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            ttl_secs: default_session_ttl(),
            processing_lease_secs: default_processing_lease(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_connection_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_connection_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarratorConfig {
    #[serde(default = "default_narrator_name")]
    pub narrator_name: String,
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            narrator_name: default_narrator_name(),
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_session_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn default_processing_lease() -> u64 {
    300
}
fn default_connection_ttl() -> u64 {
    tavern_gateway::connection::DEFAULT_CONNECTION_TTL_SECS as u64
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_narrator_name() -> String {
    "Dungeon Master".to_string()
}
fn default_generation_timeout() -> u64 {
    120
}

impl TavernConfig {
    pub fn from_toml_str(text: &str) -> TavernResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TavernError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects a processing lease that a slow but healthy action could outlive.
    ///
    /// An action spends at most `request_timeout_secs` per generator call
    /// around a stream bounded by `generation_timeout_secs`.
    pub fn validate(&self) -> TavernResult<()> {
        let worst_case = self
            .orchestrator
            .generation_timeout_secs
            .saturating_add(self.model.request_timeout_secs)
            .saturating_mul(2);
        if self.sessions.processing_lease_secs <= worst_case {
            return Err(TavernError::Config(format!(
                "sessions.processing_lease_secs ({}) must exceed {worst_case}s, twice the \
                 generation and request timeouts combined",
                self.sessions.processing_lease_secs
            )));
        }
        Ok(())
    }

    /// Reads `path`, or returns the defaults when the file does not exist.
    pub async fn load(path: &Path) -> TavernResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(TavernError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))),
        }
    }

    /// Fills an empty `api_key` from `env_key`.
    pub fn with_api_key_fallback(mut self, env_key: Option<String>) -> Self {
        if self.model.api_key.trim().is_empty() {
            if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
                self.model.api_key = key;
            }
        }
        self
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.model.api_key.is_empty() {
            config.model.api_key = REDACTED.to_string();
        }
        config
    }

    pub fn to_toml_string(&self) -> TavernResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TavernError::Config(format!("Failed to render config: {e}")))
    }
}
