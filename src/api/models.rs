//! API request and response models

use crate::backend::{ChatMessage, FinishReason};
use crate::config::GenerationDefaults;
use crate::error::GatewayError;
use crate::format::Usage;
use crate::lifecycle::LifecycleMode;
use crate::lifecycle::eviction::MAX_EVICTION_DELAY;
use crate::registry::BackendType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Body of `POST /v1/chat/completions`
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Falls back to the resident model, then the default model
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub params: GenerationDefaults,
}

/// Body of `POST /v1/raw_completion`
#[derive(Debug, Serialize, Deserialize)]
pub struct RawCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub params: GenerationDefaults,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RawOutput {
    pub model: String,
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RawCompletionResponse {
    pub raw_output: RawOutput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchModelRequest {
    #[serde(alias = "model_name")]
    pub model: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfoResponse {
    /// Resident model, if any
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub owned_by: String,
    pub backend: BackendType,
    pub resident: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub released: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    AlwaysLoaded,
    Dynamic,
    Disabled,
}

/// Body of `PUT /admin/lifecycle`
#[derive(Debug, Serialize, Deserialize)]
pub struct SetLifecycleRequest {
    pub mode: ModeName,
    /// Required for `dynamic`
    #[serde(default)]
    pub eviction_delay_secs: Option<u64>,
}

impl SetLifecycleRequest {
    pub fn into_mode(self) -> Result<LifecycleMode, GatewayError> {
        match (self.mode, self.eviction_delay_secs) {
            (ModeName::AlwaysLoaded, _) => Ok(LifecycleMode::AlwaysLoaded),
            (ModeName::Disabled, _) => Ok(LifecycleMode::Disabled),
            (ModeName::Dynamic, Some(secs)) if secs > MAX_EVICTION_DELAY.as_secs() => {
                Err(GatewayError::InvalidRequest {
                    message: format!(
                        "eviction_delay_secs must be <= {}",
                        MAX_EVICTION_DELAY.as_secs()
                    ),
                })
            }
            (ModeName::Dynamic, Some(secs)) => Ok(LifecycleMode::Dynamic(Duration::from_secs(secs))),
            (ModeName::Dynamic, None) => Err(GatewayError::InvalidRequest {
                message: "eviction_delay_secs is required for dynamic mode".to_string(),
            }),
        }
    }
}
