//! Configuration management for opsmate
//!
//! Loading and saving embedder-facing settings: language-model provider
//! credentials, the platform endpoint, and agent tunables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub mod paths;

pub use paths::{config_path, data_dir};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Credentials and endpoint for one language-model vendor
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// All supported vendors plus which one to use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_choice")]
    pub default: String,
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: default_provider_choice(),
            anthropic: ProviderConfig::default(),
            openai: ProviderConfig::default(),
        }
    }
}

fn default_provider_choice() -> String {
    "anthropic".to_string()
}

/// Endpoint and auth for the monitored data platform
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub access_token: String,
    /// Organization header value, when the platform is multi-tenant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Sandbox header value, when the platform separates environments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// Agent tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Most recent messages handed to the model per turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Model re-prompts after operation results, per user turn
    #[serde(default = "default_followup_rounds")]
    pub followup_rounds: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            history_window: default_history_window(),
            followup_rounds: default_followup_rounds(),
        }
    }
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_history_window() -> usize {
    40
}

fn default_followup_rounds() -> u32 {
    1
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
}

impl Config {
    /// Load from the default location, falling back to defaults when no
    /// file exists yet
    pub async fn load() -> Result<Self> {
        Self::load_from(&config_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&config_path()).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// The vendor config selected by `providers.default`
    pub fn active_provider(&self) -> &ProviderConfig {
        match self.providers.default.as_str() {
            "openai" => &self.providers.openai,
            _ => &self.providers.anthropic,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.active_provider().is_configured()
    }
}
