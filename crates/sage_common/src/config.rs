//! Daemon and runner configuration.
//!
//! Loaded from a TOML file when present, with defaults that work out of the
//! box. The upstream API key is never stored in the file; it is read from
//! the environment variable named by `model.api_key_env`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default config location, overridable with SAGE_CONFIG.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sage/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SageConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub wiki: WikiConfig,
    pub judge: JudgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server. Localhost only by default.
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the upstream messages API.
    pub api_base: String,
    /// Model used for answering chat requests.
    pub model: String,
    /// Per-response token ceiling.
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    /// Per-request timeout for Wikipedia calls, in seconds.
    pub timeout_secs: u64,
    /// Candidate titles fetched per search.
    pub search_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Model used for judge scoring in the evaluation runner.
    pub model: String,
    /// Per-request timeout for judge calls, in seconds.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7850".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.anthropic.com".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 4096,
            api_key_env: "SAGE_API_KEY".to_string(),
        }
    }
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            search_limit: 3,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_secs: 90,
        }
    }
}

impl Default for SageConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            wiki: WikiConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl SageConfig {
    /// Load from SAGE_CONFIG or the default path, falling back to defaults
    /// when the file is missing or malformed.
    pub fn load() -> Self {
        let path = std::env::var("SAGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!("invalid config at {}: {} (using defaults)", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}
