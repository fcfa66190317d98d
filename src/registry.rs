//! Read-only registry of model descriptors

use crate::config::{GatewayConfig, GenerationDefaults, ModelConfig};
use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "{system_prompt}\n\n{conversation_history}";
pub const DEFAULT_SYSTEM_MESSAGE_TEMPLATE: &str = "System: {system_prompt}";
pub const DEFAULT_CONVERSATION_MESSAGE_TEMPLATE: &str = "{role}: {content}";

/// Inference backends the gateway can instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// GGUF models served through llama.cpp
    Llama,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llama => write!(f, "llama"),
        }
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama" => Ok(Self::Llama),
            other => Err(other.to_string()),
        }
    }
}

/// Prompt templates used to turn a conversation into backend input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptTemplates {
    pub prompt: String,
    pub system_message: String,
    pub conversation_message: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT_TEMPLATE.to_string(),
            system_message: DEFAULT_SYSTEM_MESSAGE_TEMPLATE.to_string(),
            conversation_message: DEFAULT_CONVERSATION_MESSAGE_TEMPLATE.to_string(),
        }
    }
}

/// Everything needed to construct one model
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub backend: BackendType,
    pub path: PathBuf,
    pub n_context: u32,
    pub n_gpu_layers: i32,
    pub n_threads: u32,
    pub templates: PromptTemplates,
    pub default_params: GenerationDefaults,
}

impl ModelDescriptor {
    /// Build a descriptor from its configuration entry
    pub fn from_config(id: &str, config: &ModelConfig) -> GatewayResult<Self> {
        let backend = config.backend.parse::<BackendType>().map_err(|backend| {
            GatewayError::UnsupportedBackendType {
                model: id.to_string(),
                backend,
            }
        })?;

        let defaults = PromptTemplates::default();

        Ok(Self {
            id: id.to_string(),
            backend,
            path: config.path.clone(),
            n_context: config.n_context,
            n_gpu_layers: config.n_gpu_layers,
            n_threads: config.n_threads,
            templates: PromptTemplates {
                prompt: config.prompt_template.clone().unwrap_or(defaults.prompt),
                system_message: config
                    .system_message_template
                    .clone()
                    .unwrap_or(defaults.system_message),
                conversation_message: config
                    .conversation_message_template
                    .clone()
                    .unwrap_or(defaults.conversation_message),
            },
            default_params: config.default_params.clone(),
        })
    }
}

/// Immutable mapping from model id to descriptor
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelDescriptor>>,
    default_model: Option<String>,
}

impl ModelRegistry {
    /// Create a registry from descriptors
    pub fn new(
        descriptors: impl IntoIterator<Item = ModelDescriptor>,
        default_model: Option<String>,
    ) -> GatewayResult<Self> {
        let models: BTreeMap<String, Arc<ModelDescriptor>> = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();

        if let Some(default) = &default_model
            && !models.contains_key(default)
        {
            return Err(GatewayError::Config {
                message: format!("default model '{}' is not registered", default),
            });
        }

        Ok(Self {
            models,
            default_model,
        })
    }

    /// Build the registry from validated configuration
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let descriptors = config
            .models
            .iter()
            .map(|(id, model)| ModelDescriptor::from_config(id, model))
            .collect::<GatewayResult<Vec<_>>>()?;

        let registry = Self::new(descriptors, config.resolved_default_model())?;

        tracing::info!(
            models = registry.len(),
            default_model = ?registry.default_model(),
            "Model registry initialized"
        );

        Ok(registry)
    }

    /// Look up a descriptor by model id
    pub fn lookup(&self, id: &str) -> GatewayResult<Arc<ModelDescriptor>> {
        self.models
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotFound {
                model: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// Registered model ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.values()
    }

    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
