//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lifecycle::LifecycleMode;
use crate::lifecycle::eviction::MAX_EVICTION_DELAY;

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_port: u16,

    /// Model activated at startup and used when a request names none.
    /// Falls back to the first configured model (by name) when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// `true` keeps the resident model loaded until a swap; `false` evicts it
    /// `model_unload_delay_secs` after the last completed request
    pub keep_model_loaded: bool,
    pub model_unload_delay_secs: u64,

    /// Pause between releasing one model and constructing the next
    pub swap_settle_ms: u64,

    pub preload_default_model: bool,

    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            default_model: None,
            keep_model_loaded: true,
            model_unload_delay_secs: 0,
            swap_settle_ms: default_swap_settle_ms(),
            preload_default_model: true,
            models: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("SWAPGATE_API_PORT") {
            config.api_port = port.parse().context("Invalid SWAPGATE_API_PORT value")?;
        }
        if let Ok(model) = std::env::var("SWAPGATE_DEFAULT_MODEL") {
            config.default_model = Some(model);
        }
        if let Ok(delay) = std::env::var("SWAPGATE_UNLOAD_DELAY_SECS") {
            config.model_unload_delay_secs = delay
                .parse()
                .context("Invalid SWAPGATE_UNLOAD_DELAY_SECS value")?;
        }

        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).context("Failed to parse TOML config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.models.is_empty() {
            anyhow::bail!("Invalid configuration: 'models' section is missing or empty");
        }

        if self.model_unload_delay_secs > MAX_EVICTION_DELAY.as_secs() {
            anyhow::bail!(
                "model_unload_delay_secs must be <= {} (got {})",
                MAX_EVICTION_DELAY.as_secs(),
                self.model_unload_delay_secs
            );
        }

        for (name, model) in &self.models {
            if name.is_empty() {
                anyhow::bail!("Model name cannot be empty");
            }
            if name.contains('/') || name.contains('\\') || name.chars().any(char::is_whitespace)
            {
                anyhow::bail!(
                    "Model name '{}' cannot contain whitespace or path separators",
                    name
                );
            }
            if model.path.as_os_str().is_empty() {
                anyhow::bail!("Model '{}' has an empty path", name);
            }
            if model.n_context == 0 {
                anyhow::bail!("Model '{}' n_context must be > 0", name);
            }
        }

        if let Some(default) = &self.default_model
            && !self.models.contains_key(default)
        {
            anyhow::bail!("Default model '{}' is not a configured model", default);
        }

        Ok(())
    }

    /// The model to preload and fall back on
    pub fn resolved_default_model(&self) -> Option<String> {
        if let Some(default) = &self.default_model {
            return Some(default.clone());
        }

        let first = self.models.keys().next().cloned();
        if let Some(name) = &first {
            tracing::warn!(
                model = %name,
                "No default model specified, using the first configured model"
            );
        }
        first
    }

    /// Lifecycle mode the gateway starts in
    pub fn lifecycle_mode(&self) -> LifecycleMode {
        if self.keep_model_loaded {
            LifecycleMode::AlwaysLoaded
        } else {
            LifecycleMode::Dynamic(Duration::from_secs(self.model_unload_delay_secs))
        }
    }

    pub fn swap_settle(&self) -> Duration {
        Duration::from_millis(self.swap_settle_ms)
    }
}

/// Configuration for a single model
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelConfig {
    /// Backend type tag, e.g. "llama"
    #[serde(rename = "type")]
    pub backend: String,

    pub path: PathBuf,

    #[serde(default = "default_n_context")]
    pub n_context: u32,

    /// Layers offloaded to the GPU; negative offloads all of them
    #[serde(default)]
    pub n_gpu_layers: i32,

    /// Inference threads; 0 picks automatically
    #[serde(default)]
    pub n_threads: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_message_template: Option<String>,

    #[serde(default)]
    pub default_params: GenerationDefaults,
}

/// Per-model generation defaults; unset fields fall through to service defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GenerationDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

// Default functions
fn default_api_port() -> u16 {
    3000
}
fn default_swap_settle_ms() -> u64 {
    1000
}
fn default_n_context() -> u32 {
    2048
}
