//! llama.cpp model variant.
//!
//! Prompt construction is always available. Native loading and generation
//! go through llama-cpp-2 and require the `llama` feature; without it,
//! construction fails with a descriptive error.

use super::prompt::build_prompt;
use super::{ChatMessage, GenerationParams, InferenceModel, InferenceOutput};
use crate::registry::{ModelDescriptor, PromptTemplates};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// A GGUF model served through llama.cpp
pub struct LlamaModelHandle {
    id: String,
    templates: PromptTemplates,
    released: AtomicBool,
    #[cfg(feature = "llama")]
    inner: std::sync::Mutex<Option<std::sync::Arc<native::LlamaInner>>>,
}

impl LlamaModelHandle {
    /// Create a handle with no native model attached
    pub fn new(descriptor: &ModelDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            templates: descriptor.templates.clone(),
            released: AtomicBool::new(false),
            #[cfg(feature = "llama")]
            inner: std::sync::Mutex::new(None),
        }
    }

    /// Load the model file described by `descriptor`
    #[cfg(feature = "llama")]
    pub async fn load(descriptor: &ModelDescriptor) -> Result<Self> {
        use anyhow::Context;

        ensure_model_file(descriptor)?;

        tracing::debug!(
            model = %descriptor.id,
            path = ?descriptor.path,
            n_context = descriptor.n_context,
            n_gpu_layers = descriptor.n_gpu_layers,
            "Initializing llama model"
        );

        let owned = descriptor.clone();
        let inner = tokio::task::spawn_blocking(move || native::LlamaInner::load(&owned))
            .await
            .context("llama loader task failed")??;

        let handle = Self::new(descriptor);
        *handle.lock_inner() = Some(std::sync::Arc::new(inner));
        Ok(handle)
    }

    /// Load the model file described by `descriptor`
    #[cfg(not(feature = "llama"))]
    pub async fn load(descriptor: &ModelDescriptor) -> Result<Self> {
        ensure_model_file(descriptor)?;
        anyhow::bail!(
            "model '{}' needs the llama backend, which is not compiled in (enable the `llama` feature)",
            descriptor.id
        )
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    #[cfg(feature = "llama")]
    fn lock_inner(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<std::sync::Arc<native::LlamaInner>>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[cfg(feature = "llama")]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<InferenceOutput> {
        use super::{RawChunk, RawCompletion};
        use anyhow::Context;
        use tokio_stream::wrappers::ReceiverStream;

        let inner = self
            .lock_inner()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model '{}' is not loaded", self.id))?;
        let prompt = prompt.to_string();
        let params = params.clone();

        if params.stream {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<RawChunk>>(32);
            tokio::task::spawn_blocking(move || {
                let result = inner.generate(&prompt, &params, |piece| {
                    tx.blocking_send(Ok(RawChunk {
                        text: piece.to_string(),
                        finish_reason: None,
                    }))
                    .is_ok()
                });
                let last = result.map(|summary| RawChunk {
                    text: String::new(),
                    finish_reason: Some(summary.finish_reason),
                });
                // Receiver may already be gone if the client disconnected
                let _ = tx.blocking_send(last);
            });
            return Ok(InferenceOutput::Stream(Box::pin(ReceiverStream::new(rx))));
        }

        let completion = tokio::task::spawn_blocking(move || {
            let mut text = String::new();
            let summary = inner.generate(&prompt, &params, |piece| {
                text.push_str(piece);
                true
            })?;
            Ok::<_, anyhow::Error>(RawCompletion {
                text,
                finish_reason: summary.finish_reason,
                prompt_tokens: summary.prompt_tokens,
                completion_tokens: summary.completion_tokens,
            })
        })
        .await
        .context("llama generation task failed")??;

        Ok(InferenceOutput::Complete(completion))
    }

    #[cfg(not(feature = "llama"))]
    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<InferenceOutput> {
        anyhow::bail!("model '{}' is not loaded", self.id)
    }
}

fn ensure_model_file(descriptor: &ModelDescriptor) -> Result<()> {
    if !descriptor.path.is_file() {
        anyhow::bail!(
            "model file for '{}' not found: {:?}",
            descriptor.id,
            descriptor.path
        );
    }
    Ok(())
}

#[async_trait]
impl InferenceModel for LlamaModelHandle {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn create_prompt(&self, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(model = %self.id, messages = messages.len(), "Creating prompt");
        Ok(build_prompt(&self.templates, messages))
    }

    async fn run_inference(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<InferenceOutput> {
        if self.is_released() {
            anyhow::bail!("model '{}' has been released", self.id);
        }
        tracing::debug!(
            model = %self.id,
            prompt_chars = prompt.len(),
            stream = params.stream,
            "Running inference"
        );
        self.generate(prompt, params).await
    }

    fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);

        // In-flight generations hold their own reference and finish normally
        #[cfg(feature = "llama")]
        self.lock_inner().take();

        tracing::debug!(model = %self.id, "Llama model released");
        Ok(())
    }
}

#[cfg(feature = "llama")]
mod native {
    use super::super::{FinishReason, GenerationParams};
    use crate::registry::ModelDescriptor;
    use anyhow::{Result, anyhow};
    use std::num::NonZeroU32;
    use std::sync::OnceLock;

    use llama_cpp_2::context::LlamaContext;
    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaModel};
    use llama_cpp_2::sampling::LlamaSampler;
    use llama_cpp_2::token::LlamaToken;

    // llama.cpp may only be initialised once per process
    static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

    fn backend() -> Result<&'static LlamaBackend> {
        if let Some(backend) = BACKEND.get() {
            return Ok(backend);
        }
        let backend = LlamaBackend::init().map_err(|e| anyhow!("backend init: {e}"))?;
        Ok(BACKEND.get_or_init(|| backend))
    }

    pub struct Summary {
        pub finish_reason: FinishReason,
        pub prompt_tokens: u32,
        pub completion_tokens: u32,
    }

    pub struct LlamaInner {
        model: LlamaModel,
        n_ctx: u32,
        n_threads: i32,
    }

    // SAFETY: LlamaModel is immutable after loading and llama-cpp-2 allows
    // sharing it across threads; every generation creates its own context.
    unsafe impl Send for LlamaInner {}
    unsafe impl Sync for LlamaInner {}

    impl LlamaInner {
        pub fn load(descriptor: &ModelDescriptor) -> Result<Self> {
            let backend = backend()?;
            // Negative layer counts offload everything
            let n_gpu_layers = u32::try_from(descriptor.n_gpu_layers).unwrap_or(u32::MAX);
            let model_params = LlamaModelParams::default().with_n_gpu_layers(n_gpu_layers);
            let model = LlamaModel::load_from_file(backend, &descriptor.path, &model_params)
                .map_err(|e| anyhow!("load: {e}"))?;

            Ok(Self {
                model,
                n_ctx: descriptor.n_context,
                n_threads: resolve_threads(descriptor.n_threads),
            })
        }

        /// Generate from `prompt`, handing each decoded piece to `on_piece`.
        /// Generation stops early when `on_piece` returns false.
        pub fn generate(
            &self,
            prompt: &str,
            params: &GenerationParams,
            mut on_piece: impl FnMut(&str) -> bool,
        ) -> Result<Summary> {
            let tokens = self
                .model
                .str_to_token(prompt, AddBos::Always)
                .map_err(|e| anyhow!("tokenize: {e}"))?;
            if tokens.is_empty() {
                anyhow::bail!("prompt produced no tokens");
            }
            if tokens.len() >= self.n_ctx as usize {
                anyhow::bail!(
                    "prompt of {} tokens exceeds context window of {}",
                    tokens.len(),
                    self.n_ctx
                );
            }

            let mut ctx = self.create_context()?;
            let mut batch = LlamaBatch::new(tokens.len(), 1);
            add_seq(&mut batch, &tokens)?;
            decode(&mut ctx, &mut batch)?;

            let mut sampler = build_sampler(params);
            sampler.accept_many(tokens.iter().copied());

            let mut decoder = encoding_rs::UTF_8.new_decoder();
            let mut pos = tokens.len() as i32;
            let mut generated = 0u32;
            let mut finish_reason = FinishReason::Length;

            while generated < params.max_tokens {
                let tok = sampler.sample(&ctx, -1);
                sampler.accept(tok);
                if self.model.is_eog_token(tok) {
                    finish_reason = FinishReason::Stop;
                    break;
                }
                generated += 1;

                let piece = self
                    .model
                    .token_to_piece(tok, &mut decoder, false, None)
                    .map_err(|e| anyhow!("detokenize: {e}"))?;
                if !on_piece(&piece) {
                    finish_reason = FinishReason::Stop;
                    break;
                }

                batch.clear();
                batch
                    .add(tok, pos, &[0], true)
                    .map_err(|e| anyhow!("batch: {e}"))?;
                decode(&mut ctx, &mut batch)?;
                pos += 1;
            }

            Ok(Summary {
                finish_reason,
                prompt_tokens: u32::try_from(tokens.len()).unwrap_or(u32::MAX),
                completion_tokens: generated,
            })
        }

        fn create_context(&self) -> Result<LlamaContext<'_>> {
            let params = LlamaContextParams::default()
                .with_n_ctx(NonZeroU32::new(self.n_ctx))
                .with_n_threads(self.n_threads)
                .with_n_threads_batch(self.n_threads);
            self.model
                .new_context(backend()?, params)
                .map_err(|e| anyhow!("context: {e}"))
        }
    }

    fn add_seq(batch: &mut LlamaBatch, tokens: &[LlamaToken]) -> Result<()> {
        // Logits only for the last prompt token
        let last = tokens.len() - 1;
        for (i, &tok) in tokens.iter().enumerate() {
            batch
                .add(tok, i as i32, &[0], i == last)
                .map_err(|e| anyhow!("batch: {e}"))?;
        }
        Ok(())
    }

    fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<()> {
        ctx.decode(batch).map_err(|e| anyhow!("decode: {e}"))
    }

    fn build_sampler(params: &GenerationParams) -> LlamaSampler {
        let mut chain = Vec::new();
        if params.top_k > 0 {
            chain.push(LlamaSampler::top_k(params.top_k as i32));
        }
        chain.push(LlamaSampler::top_p(params.top_p, 1));
        chain.push(LlamaSampler::temp(params.temperature));
        chain.push(LlamaSampler::dist(42));
        LlamaSampler::chain_simple(chain)
    }

    fn resolve_threads(n: u32) -> i32 {
        if n == 0 {
            let optimal = num_cpus::get().clamp(1, 16);
            i32::try_from(optimal).unwrap_or(4)
        } else {
            i32::try_from(n).unwrap_or(4)
        }
    }
}
