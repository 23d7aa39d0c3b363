//! Configuration loading
//!
//! Two files drive the bot:
//! - `inkpost.toml` — model access, agent limits, credential rotation keys
//! - `providers.json` — MCP provider definitions in the `mcpServers` shape

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Find a config file by walking up the directory tree, then checking the
/// global config directory (`~/.config/inkpost/`).
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("inkpost").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

// ============================================================================
// Provider configuration (providers.json)
// ============================================================================

/// Provider definitions (from providers.json)
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(rename = "mcpServers")]
    pub providers: HashMap<String, ProviderConfig>,
}

/// A single provider: either a child process speaking the streaming MCP
/// transport, or an HTTP endpoint answering plain JSON-RPC POST.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    Http(HttpProviderConfig),
    Spawn(SpawnProviderConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    /// Marker kept for compatibility with the `mcpServers` document shape.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnProviderConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProvidersConfig {
    /// Load from providers.json, walking up from cwd with a global fallback.
    pub fn load() -> Result<Option<Self>> {
        if let Some(config_path) = find_config_file("providers.json") {
            tracing::debug!("Loading provider config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }
        tracing::debug!("No providers.json found");
        Ok(None)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProvidersConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}

// ============================================================================
// App configuration (inkpost.toml)
// ============================================================================

/// Top-level app configuration (from inkpost.toml)
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentSectionConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
}

/// Model-access configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

/// Orchestration-loop limits
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSectionConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_provider_init_secs")]
    pub provider_init_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
}

/// Credential rotation for a rate-limited provider class.
///
/// `provider` names the connection to rebuild on rotation; `env` is the
/// variable in that provider's env map that carries the active key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub keys: Vec<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_provider_init_secs() -> u64 {
    // npx-based providers can be slow on first run while they fetch packages
    120
}

fn default_image_timeout_secs() -> u64 {
    20
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

impl Default for AgentSectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            provider_init_timeout_secs: default_provider_init_secs(),
            image_timeout_secs: default_image_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load from inkpost.toml, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file("inkpost.toml") {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }
        tracing::debug!("No inkpost.toml found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
