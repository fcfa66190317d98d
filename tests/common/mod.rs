//! Shared fixtures: a recording model factory and registry builders

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swapgate::backend::{
    ChatMessage, FinishReason, GenerationParams, InferenceModel, InferenceOutput, ModelFactory,
    RawChunk, RawCompletion,
};
use swapgate::config::{GenerationDefaults, ModelConfig};
use swapgate::{LifecycleManager, LifecycleMode, ModelDescriptor, ModelRegistry};

/// Ordered record of constructs and releases, plus a count of live models
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    /// Highest number of constructed, unreleased models seen at once
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn constructed(&self, id: &str) {
        self.events.lock().unwrap().push(format!("construct:{id}"));
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    fn released(&self, id: &str) {
        self.events.lock().unwrap().push(format!("release:{id}"));
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Model echoing its prompt; streams word by word
pub struct EchoModel {
    id: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl InferenceModel for EchoModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn create_prompt(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn run_inference(&self, prompt: &str, params: &GenerationParams) -> Result<InferenceOutput> {
        if prompt.contains("explode") {
            anyhow::bail!("backend exploded");
        }

        let words: Vec<String> = prompt.split_whitespace().map(str::to_string).collect();
        if params.stream {
            let mut chunks: Vec<Result<RawChunk>> = words
                .into_iter()
                .map(|w| {
                    Ok(RawChunk {
                        text: format!("{w} "),
                        finish_reason: None,
                    })
                })
                .collect();
            chunks.push(Ok(RawChunk {
                text: String::new(),
                finish_reason: Some(FinishReason::Stop),
            }));
            Ok(InferenceOutput::Stream(Box::pin(futures::stream::iter(chunks))))
        } else {
            let count = words.len() as u32;
            Ok(InferenceOutput::Complete(RawCompletion {
                text: format!("[{}] {}", self.id, words.join(" ")),
                finish_reason: FinishReason::Stop,
                prompt_tokens: count,
                completion_tokens: count + 1,
            }))
        }
    }

    fn release(&self) -> Result<()> {
        self.recorder.released(&self.id);
        Ok(())
    }
}

/// Factory that builds `EchoModel`s and fails for configured ids
#[derive(Default)]
pub struct RecordingFactory {
    pub recorder: Arc<Recorder>,
    failing: Mutex<Vec<String>>,
    load_delay: Duration,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every construction takes `delay`
    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            load_delay: delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().push(id.to_string());
    }
}

#[async_trait]
impl ModelFactory for RecordingFactory {
    async fn construct(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn InferenceModel>> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.failing.lock().unwrap().contains(&descriptor.id) {
            anyhow::bail!("cannot allocate weights for '{}'", descriptor.id);
        }
        self.recorder.constructed(&descriptor.id);
        Ok(Arc::new(EchoModel {
            id: descriptor.id.clone(),
            recorder: self.recorder.clone(),
        }))
    }
}

pub fn model_config(path: &str) -> ModelConfig {
    ModelConfig {
        backend: "llama".to_string(),
        path: path.into(),
        n_context: 2048,
        n_gpu_layers: 0,
        n_threads: 0,
        prompt_template: None,
        system_message_template: None,
        conversation_message_template: None,
        default_params: GenerationDefaults::default(),
    }
}

pub fn registry(ids: &[&str]) -> Arc<ModelRegistry> {
    let descriptors = ids.iter().map(|id| {
        ModelDescriptor::from_config(id, &model_config(&format!("/models/{id}.gguf"))).unwrap()
    });
    let default = ids.first().map(|id| id.to_string());
    Arc::new(ModelRegistry::new(descriptors, default).unwrap())
}

/// Manager over `ids` with no swap pause
pub fn manager(ids: &[&str], mode: LifecycleMode) -> (LifecycleManager, Arc<RecordingFactory>) {
    manager_with(ids, mode, RecordingFactory::new(), Duration::ZERO)
}

pub fn manager_with(
    ids: &[&str],
    mode: LifecycleMode,
    factory: RecordingFactory,
    swap_settle: Duration,
) -> (LifecycleManager, Arc<RecordingFactory>) {
    let factory = Arc::new(factory);
    let manager = LifecycleManager::new(registry(ids), factory.clone(), mode, swap_settle);
    (manager, factory)
}
