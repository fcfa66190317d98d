//! API request handlers

use super::models::{
    ChatCompletionRequest, HealthResponse, MessageResponse, ModelInfo, ModelList, RawCompletionRequest,
    RawCompletionResponse, RawOutput, ServiceInfoResponse, SetLifecycleRequest, SwitchModelRequest,
    UnloadResponse,
};
use super::routes::AppState;
use crate::backend::{ChatMessage, GenerationParams, InferenceOutput};
use crate::config::GenerationDefaults;
use crate::error::{GatewayError, GatewayResult};
use crate::format::{ChatCompletion, StreamFormatter, Usage};
use crate::lifecycle::{LifecycleStatus, ResidentModel};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;

/// GET /health - Gateway health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /service-info - Currently resident model
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfoResponse> {
    Json(ServiceInfoResponse {
        model: state.manager.resident_id().await,
    })
}

/// GET /v1/models - Configured models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let resident = state.manager.resident_id().await;

    let data = state
        .registry
        .descriptors()
        .map(|descriptor| ModelInfo {
            id: descriptor.id.clone(),
            object: "model".to_string(),
            owned_by: "swapgate".to_string(),
            backend: descriptor.backend,
            resident: resident.as_deref() == Some(descriptor.id.as_str()),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// POST /v1/chat/completions - Chat completion, streamed over SSE when requested
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    let resident = activate_for_request(&state, req.model, &req.messages).await?;
    let params = GenerationParams::resolve(&req.params, &resident.descriptor().default_params);
    let model_id = resident.id().to_string();

    let guard = state.manager.use_guard();
    let output = match generate(&resident, &req.messages, &params).await {
        Ok(output) => output,
        Err(e) => {
            crate::metrics::record_inference(&model_id, "chat", params.stream, false);
            guard.complete().await;
            return Err(e);
        }
    };

    match output {
        InferenceOutput::Complete(raw) => {
            crate::metrics::record_inference(&model_id, "chat", false, true);
            guard.complete().await;
            Ok(Json(ChatCompletion::from_raw(&model_id, raw)).into_response())
        }
        InferenceOutput::Stream(mut chunks) => {
            let formatter = StreamFormatter::new(model_id.clone());
            tracing::debug!(model = %model_id, stream_id = %formatter.id(), "Streaming completion");

            let events = async_stream::stream! {
                // Completes on normal end; dropped on client disconnect
                let guard = guard;
                let mut success = true;

                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(raw) => {
                            if let Some(chunk) = formatter.chunk(&raw) {
                                yield Event::default().json_data(chunk);
                            }
                        }
                        Err(e) => {
                            tracing::error!(model = %model_id, error = %e, "Stream aborted by backend");
                            success = false;
                            break;
                        }
                    }
                }

                crate::metrics::record_inference(&model_id, "chat", true, success);
                guard.complete().await;
                yield Ok(Event::default().data("[DONE]"));
            };

            Ok(Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
    }
}

/// POST /v1/raw_completion - Unformatted backend output
pub async fn raw_completion(
    State(state): State<AppState>,
    Json(req): Json<RawCompletionRequest>,
) -> Result<Json<RawCompletionResponse>, GatewayError> {
    let resident = activate_for_request(&state, req.model, &req.messages).await?;
    let overrides = GenerationDefaults {
        stream: Some(false),
        ..req.params
    };
    let params = GenerationParams::resolve(&overrides, &resident.descriptor().default_params);
    let model_id = resident.id().to_string();

    let guard = state.manager.use_guard();
    let result = generate(&resident, &req.messages, &params).await;
    crate::metrics::record_inference(&model_id, "raw", false, result.is_ok());
    guard.complete().await;

    let raw = match result? {
        InferenceOutput::Complete(raw) => raw,
        InferenceOutput::Stream(_) => {
            return Err(GatewayError::Inference {
                message: format!("model '{}' streamed a non-streaming request", model_id),
            });
        }
    };

    tracing::info!(model = %model_id, completion_tokens = raw.completion_tokens, "Raw completion successful");

    Ok(Json(RawCompletionResponse {
        raw_output: RawOutput {
            model: model_id,
            usage: Usage::new(raw.prompt_tokens, raw.completion_tokens),
            text: raw.text,
            finish_reason: raw.finish_reason,
        },
    }))
}

/// POST /switch_model - Make a model resident
pub async fn switch_model(
    State(state): State<AppState>,
    Json(req): Json<SwitchModelRequest>,
) -> Result<Json<MessageResponse>, GatewayError> {
    state.manager.activate(&req.model).await?;

    Ok(Json(MessageResponse {
        message: format!("Successfully switched to model: {}", req.model),
    }))
}

/// POST /admin/unload - Evict the resident model
pub async fn unload_model(State(state): State<AppState>) -> Json<UnloadResponse> {
    Json(UnloadResponse {
        released: state.manager.release().await,
    })
}

/// GET /admin/lifecycle - Lifecycle status
pub async fn get_lifecycle(State(state): State<AppState>) -> Json<LifecycleStatus> {
    Json(state.manager.status().await)
}

/// PUT /admin/lifecycle - Change the lifecycle mode
pub async fn set_lifecycle(
    State(state): State<AppState>,
    Json(req): Json<SetLifecycleRequest>,
) -> Result<Json<LifecycleStatus>, GatewayError> {
    let mode = req.into_mode()?;
    state.manager.set_mode(mode).await;
    Ok(Json(state.manager.status().await))
}

/// Pick the target model and make it resident.
///
/// An unnamed request goes to the resident model, then to the default model.
async fn activate_for_request(
    state: &AppState,
    requested: Option<String>,
    messages: &[ChatMessage],
) -> GatewayResult<ResidentModel> {
    if messages.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "messages must not be empty".to_string(),
        });
    }

    let model_id = match requested {
        Some(model) => model,
        None => match state.manager.resident_id().await {
            Some(resident) => resident,
            None => state
                .registry
                .default_model()
                .map(str::to_string)
                .ok_or_else(|| GatewayError::InvalidRequest {
                    message: "no model specified and no default model configured".to_string(),
                })?,
        },
    };

    state.manager.activate(&model_id).await
}

async fn generate(
    resident: &ResidentModel,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> GatewayResult<InferenceOutput> {
    let model = resident.model();

    let prompt = model
        .create_prompt(messages)
        .map_err(|e| GatewayError::Inference {
            message: format!("{e:#}"),
        })?;

    model
        .run_inference(&prompt, params)
        .await
        .map_err(|e| GatewayError::Inference {
            message: format!("{e:#}"),
        })
}
