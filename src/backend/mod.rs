//! Model capability interface and backend instantiation

pub mod llama;
pub mod prompt;

use crate::config::GenerationDefaults;
use crate::registry::{BackendType, ModelDescriptor};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 50;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_TOP_K: u32 = 0;
pub const DEFAULT_STREAM: bool = true;

// ============================================================================
// Conversation and Generation Types
// ============================================================================

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Resolved sampling parameters for one inference call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
    pub stream: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            stream: DEFAULT_STREAM,
        }
    }
}

impl GenerationParams {
    /// Resolve request overrides against model defaults, then service defaults
    pub fn resolve(request: &GenerationDefaults, model: &GenerationDefaults) -> Self {
        let service = Self::default();
        Self {
            temperature: request
                .temperature
                .or(model.temperature)
                .unwrap_or(service.temperature),
            max_tokens: request
                .max_tokens
                .or(model.max_tokens)
                .unwrap_or(service.max_tokens),
            top_p: request.top_p.or(model.top_p).unwrap_or(service.top_p),
            top_k: request.top_k.or(model.top_k).unwrap_or(service.top_k),
            stream: request.stream.or(model.stream).unwrap_or(service.stream),
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
        }
    }
}

/// Complete output of a non-streaming inference call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCompletion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One piece of a streamed inference call. The last chunk carries a finish reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawChunk {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

/// Lazy, finite, non-restartable sequence of output chunks
pub type ChunkStream = BoxStream<'static, Result<RawChunk>>;

/// Result of `InferenceModel::run_inference`
pub enum InferenceOutput {
    Complete(RawCompletion),
    Stream(ChunkStream),
}

impl fmt::Debug for InferenceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(completion) => f.debug_tuple("Complete").field(completion).finish(),
            Self::Stream(_) => f.write_str("Stream(<chunks>)"),
        }
    }
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Capability every constructed model exposes
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Identifier of the descriptor this model was built from
    fn model_id(&self) -> &str;

    /// Render a conversation into backend input
    fn create_prompt(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Run inference; streams when `params.stream` is set
    async fn run_inference(&self, prompt: &str, params: &GenerationParams)
    -> Result<InferenceOutput>;

    /// Release native resources held for this model
    fn release(&self) -> Result<()>;
}

/// Constructs ready-to-use models from descriptors
#[async_trait]
pub trait ModelFactory: Send + Sync {
    async fn construct(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn InferenceModel>>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Factory dispatching on the descriptor's backend type
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFactory;

impl BackendFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelFactory for BackendFactory {
    async fn construct(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn InferenceModel>> {
        match descriptor.backend {
            BackendType::Llama => {
                let model = llama::LlamaModelHandle::load(descriptor).await?;
                Ok(Arc::new(model))
            }
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_resolution_precedence() {
        let request = GenerationDefaults {
            temperature: Some(0.1),
            ..Default::default()
        };
        let model = GenerationDefaults {
            temperature: Some(0.5),
            max_tokens: Some(512),
            stream: Some(false),
            ..Default::default()
        };

        let params = GenerationParams::resolve(&request, &model);
        assert_eq!(params.temperature, 0.1);
        assert_eq!(params.max_tokens, 512);
        assert!(!params.stream);
        assert_eq!(params.top_p, DEFAULT_TOP_P);
        assert_eq!(params.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn test_params_service_defaults() {
        let params =
            GenerationParams::resolve(&GenerationDefaults::default(), &GenerationDefaults::default());
        assert_eq!(params, GenerationParams::default());
        assert!(params.stream);
    }

    #[tokio::test]
    async fn test_mock_factory_records_calls() {
        let factory = mocks::MockFactory::new();
        let descriptor = crate::registry::ModelDescriptor::from_config(
            "m1",
            &crate::config::ModelConfig {
                backend: "llama".to_string(),
                path: "/m1.gguf".into(),
                n_context: 512,
                n_gpu_layers: 0,
                n_threads: 0,
                prompt_template: None,
                system_message_template: None,
                conversation_message_template: None,
                default_params: GenerationDefaults::default(),
            },
        )
        .unwrap();

        let model = factory.construct(&descriptor).await.unwrap();
        model.release().unwrap();

        assert_eq!(factory.log.events(), vec!["construct:m1", "release:m1"]);
    }
}
