//! Swapgate - single-resident-model inference gateway
//!
//! Serves OpenAI-compatible chat completions from a set of configured local
//! models while keeping at most one of them loaded. Requests for another model
//! swap it in; an optional idle timer evicts it again.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod metrics;
pub mod registry;

pub use backend::{BackendFactory, ChatMessage, GenerationParams, InferenceModel, ModelFactory};
pub use config::{GatewayConfig, ModelConfig};
pub use error::{GatewayError, GatewayResult};
pub use lifecycle::{LifecycleManager, LifecycleMode, LifecycleStatus, ResidentModel};
pub use registry::{BackendType, ModelDescriptor, ModelRegistry};
