//! OpenAI-compatible response shapes

use crate::backend::{FinishReason, RawChunk, RawCompletion};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// New `chatcmpl-` id with 24 hex digits
pub fn completion_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("chatcmpl-{:016x}{:08x}", nanos, seq)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

/// `chat.completion` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

impl ChatCompletion {
    pub fn from_raw(model: &str, raw: RawCompletion) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content: raw.text,
                },
                finish_reason: raw.finish_reason,
            }],
            usage: Usage::new(raw.prompt_tokens, raw.completion_tokens),
        }
    }
}

/// Incremental message content; empty on the closing chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

/// `chat.completion.chunk` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Formats the chunks of one stream under a shared id and creation time
#[derive(Debug, Clone)]
pub struct StreamFormatter {
    id: String,
    created: i64,
    model: String,
}

impl StreamFormatter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Format one raw chunk. Empty chunks without a finish reason yield nothing.
    pub fn chunk(&self, raw: &RawChunk) -> Option<ChatCompletionChunk> {
        if raw.text.is_empty() && raw.finish_reason.is_none() {
            return None;
        }

        let delta = if raw.text.is_empty() {
            Delta::default()
        } else {
            Delta {
                role: Some("assistant".to_string()),
                content: Some(raw.text.clone()),
            }
        };

        Some(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: raw.finish_reason,
            }],
        })
    }
}
