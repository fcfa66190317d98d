//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

mod common;

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use swapgate::backend::ChatMessage;
use swapgate::backend::prompt::{HISTORY_WINDOW, build_prompt, render};
use swapgate::config::{GatewayConfig, GenerationDefaults, ModelConfig};
use swapgate::registry::PromptTemplates;
use swapgate::{GatewayError, LifecycleMode};

// =============================================================================
// Arbitrary Implementations
// =============================================================================

const MODELS: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug, Clone)]
enum Op {
    Activate(&'static str),
    ActivateUnknown,
    MarkUseCompleted,
    SetMode(LifecycleMode),
    Release,
    Wait(u64),
}

fn arb_mode() -> impl Strategy<Value = LifecycleMode> {
    prop_oneof![
        Just(LifecycleMode::AlwaysLoaded),
        Just(LifecycleMode::Disabled),
        (1u64..10).prop_map(|secs| LifecycleMode::Dynamic(Duration::from_secs(secs))),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::sample::select(MODELS.to_vec()).prop_map(Op::Activate),
        1 => Just(Op::ActivateUnknown),
        2 => Just(Op::MarkUseCompleted),
        1 => arb_mode().prop_map(Op::SetMode),
        1 => Just(Op::Release),
        2 => (0u64..15).prop_map(Op::Wait),
    ]
}

fn arb_message() -> impl Strategy<Value = ChatMessage> {
    (
        prop::sample::select(vec!["system", "user", "assistant", "tool"]),
        ".{0,40}",
    )
        .prop_map(|(role, content)| ChatMessage::new(role, content))
}

/// Generate minimal GatewayConfig for round-trip testing
fn arb_gateway_config() -> impl Strategy<Value = GatewayConfig> {
    (
        1024u16..60000,                               // api_port
        any::<bool>(),                                // keep_model_loaded
        0u64..3600,                                   // model_unload_delay_secs
        0u64..5000,                                   // swap_settle_ms
        prop::collection::btree_set("[a-z][a-z0-9_-]{0,15}", 1..5), // model names
        prop::option::of(1u32..4096),                 // max_tokens default
    )
        .prop_map(
            |(api_port, keep_model_loaded, delay, swap_settle_ms, names, max_tokens)| {
                let models: BTreeMap<String, ModelConfig> = names
                    .into_iter()
                    .map(|name| {
                        let config = ModelConfig {
                            backend: "llama".to_string(),
                            path: format!("/models/{name}.gguf").into(),
                            n_context: 4096,
                            n_gpu_layers: -1,
                            n_threads: 0,
                            prompt_template: None,
                            system_message_template: None,
                            conversation_message_template: Some("{role}> {content}".to_string()),
                            default_params: GenerationDefaults {
                                max_tokens,
                                ..Default::default()
                            },
                        };
                        (name, config)
                    })
                    .collect();

                GatewayConfig {
                    api_port,
                    default_model: models.keys().last().cloned(),
                    keep_model_loaded,
                    model_unload_delay_secs: delay,
                    swap_settle_ms,
                    preload_default_model: false,
                    models,
                }
            },
        )
}

// =============================================================================
// Lifecycle Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// At most one model is ever live, and the resident id always came from a
    /// successful activation
    #[test]
    fn prop_at_most_one_resident(ops in prop::collection::vec(arb_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let (manager, factory) = common::manager(&MODELS, LifecycleMode::AlwaysLoaded);
            let mut activated: HashSet<String> = HashSet::new();

            for op in ops {
                match op {
                    Op::Activate(id) => {
                        let disabled = manager.mode().await == LifecycleMode::Disabled;
                        match manager.activate(id).await {
                            Ok(resident) => {
                                prop_assert!(!disabled);
                                prop_assert_eq!(resident.id(), id);
                                activated.insert(id.to_string());
                            }
                            Err(e) => {
                                prop_assert!(disabled);
                                let is_disabled = matches!(e, GatewayError::ModelLoadingDisabled { .. });
                                prop_assert!(is_disabled);
                            }
                        }
                    }
                    Op::ActivateUnknown => {
                        let before = manager.resident_id().await;
                        let err = manager.activate("missing").await.unwrap_err();
                        let is_not_found = matches!(err, GatewayError::ModelNotFound { .. });
                        prop_assert!(is_not_found);
                        prop_assert_eq!(manager.resident_id().await, before);
                    }
                    Op::MarkUseCompleted => manager.mark_use_completed().await,
                    Op::SetMode(mode) => manager.set_mode(mode).await,
                    Op::Release => {
                        manager.release().await;
                    }
                    Op::Wait(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                }

                let resident = manager.resident_id().await;
                prop_assert!(factory.recorder.max_live() <= 1);
                prop_assert_eq!(factory.recorder.live(), usize::from(resident.is_some()));
                if let Some(id) = resident {
                    prop_assert!(activated.contains(&id));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Activating the resident model again never reconstructs it
    #[test]
    fn prop_repeated_activation_is_idempotent(id in prop::sample::select(MODELS.to_vec()), repeats in 2usize..10) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let (manager, factory) = common::manager(&MODELS, LifecycleMode::AlwaysLoaded);
            let first = manager.activate(id).await.unwrap();
            for _ in 1..repeats {
                let again = manager.activate(id).await.unwrap();
                prop_assert!(first.is_same_instance(&again));
            }
            prop_assert_eq!(factory.recorder.count(&format!("construct:{id}")), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// =============================================================================
// Prompt Rendering
// =============================================================================

proptest! {
    /// Rendering never re-expands substituted text
    #[test]
    fn prop_render_is_single_pass(role in ".{0,20}", content in ".{0,60}") {
        let rendered = render("{role}: {content}", &[("role", &role), ("content", &content)]);
        prop_assert_eq!(rendered, format!("{}: {}", role, content));
    }

    /// Templates without placeholders come back verbatim
    #[test]
    fn prop_render_without_placeholders_is_identity(template in "[^{}]{0,80}") {
        prop_assert_eq!(render(&template, &[("role", "x")]), template);
    }

    /// The history never holds more than the window of turns
    #[test]
    fn prop_history_is_bounded(messages in prop::collection::vec(arb_message(), 0..40)) {
        let templates = PromptTemplates {
            prompt: "{conversation_history}".to_string(),
            system_message: String::new(),
            conversation_message: "<turn>".to_string(),
        };

        let prompt = build_prompt(&templates, &messages);
        let window_start = messages.len().saturating_sub(HISTORY_WINDOW);
        let expected = messages[window_start..]
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .count();

        prop_assert_eq!(prompt.matches("<turn>").count(), expected);
        prop_assert!(expected <= HISTORY_WINDOW);
    }
}

// =============================================================================
// Config Round-Trip
// =============================================================================

proptest! {
    /// Serialized configs parse back to the same values
    #[test]
    fn prop_config_toml_roundtrip(config in arb_gateway_config()) {
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&toml_str).unwrap();

        prop_assert_eq!(parsed.api_port, config.api_port);
        prop_assert_eq!(&parsed.default_model, &config.default_model);
        prop_assert_eq!(parsed.keep_model_loaded, config.keep_model_loaded);
        prop_assert_eq!(parsed.model_unload_delay_secs, config.model_unload_delay_secs);
        prop_assert_eq!(parsed.swap_settle_ms, config.swap_settle_ms);
        prop_assert_eq!(&parsed.models, &config.models);
        prop_assert!(parsed.validate().is_ok());
    }
}
