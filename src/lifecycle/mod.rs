//! Resident model lifecycle
//!
//! The [`LifecycleManager`] owns the single resident model slot. Activation,
//! eviction, and mode changes are serialized behind one lock; inference runs on
//! a cloned [`ResidentModel`] outside of it.

pub mod eviction;

use crate::backend::{InferenceModel, ModelFactory};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{ModelDescriptor, ModelRegistry};
use chrono::{DateTime, Utc};
use eviction::EvictionScheduler;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Types
// ============================================================================

/// Policy governing when the resident model is evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMode {
    /// Keep the resident model until another model is activated
    AlwaysLoaded,
    /// Evict the resident model this long after its last completed use
    Dynamic(Duration),
    /// Refuse activation and hold no model
    Disabled,
}

impl LifecycleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlwaysLoaded => "always_loaded",
            Self::Dynamic(_) => "dynamic",
            Self::Disabled => "disabled",
        }
    }

    pub fn eviction_delay(&self) -> Option<Duration> {
        match self {
            Self::Dynamic(delay) => Some(*delay),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic(delay) => write!(f, "dynamic({}s)", delay.as_secs_f64()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why a resident model left the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Swap,
    Idle,
    Disabled,
    Manual,
    Shutdown,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Idle => "idle",
            Self::Disabled => "disabled",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Handle to the model occupying the resident slot.
///
/// Cloning is cheap. A clone stays usable for an inference that started before
/// the model was evicted; the backend decides what a released model does.
#[derive(Clone)]
pub struct ResidentModel {
    descriptor: Arc<ModelDescriptor>,
    model: Arc<dyn InferenceModel>,
    loaded_at: DateTime<Utc>,
}

impl ResidentModel {
    fn new(descriptor: Arc<ModelDescriptor>, model: Arc<dyn InferenceModel>) -> Self {
        Self {
            descriptor,
            model,
            loaded_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn model(&self) -> &Arc<dyn InferenceModel> {
        &self.model
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Whether both handles refer to the same constructed model
    pub fn is_same_instance(&self, other: &ResidentModel) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}

impl fmt::Debug for ResidentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResidentModel")
            .field("id", &self.descriptor.id)
            .field("backend", &self.descriptor.backend)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_delay_secs: Option<u64>,
    pub resident_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_remaining_secs: Option<f64>,
}

// ============================================================================
// Manager
// ============================================================================

struct ManagerState {
    resident: Option<ResidentModel>,
    mode: LifecycleMode,
    eviction: EvictionScheduler,
}

struct ManagerInner {
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn ModelFactory>,
    swap_settle: Duration,
    state: Mutex<ManagerState>,
}

/// Owns the resident model slot
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<ManagerInner>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        factory: Arc<dyn ModelFactory>,
        mode: LifecycleMode,
        swap_settle: Duration,
    ) -> Self {
        tracing::info!(
            mode = %mode,
            swap_settle_ms = swap_settle.as_millis() as u64,
            "Lifecycle manager created"
        );

        Self {
            inner: Arc::new(ManagerInner {
                registry,
                factory,
                swap_settle,
                state: Mutex::new(ManagerState {
                    resident: None,
                    mode,
                    eviction: EvictionScheduler::new(),
                }),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.inner.registry
    }

    /// Ensure `model_id` is the resident model and return it.
    ///
    /// The release and construct sequence runs on its own task, so a caller
    /// that stops waiting does not interrupt it. Activations are applied in
    /// lock order; the last one wins.
    pub async fn activate(&self, model_id: &str) -> GatewayResult<ResidentModel> {
        let descriptor = self.inner.registry.lookup(model_id)?;

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.activate(descriptor).await })
            .await
            .map_err(|e| GatewayError::ModelLoadFailed {
                model: model_id.to_string(),
                source: anyhow::anyhow!("activation task failed: {e}"),
            })?
    }

    /// The resident model, if any
    pub async fn resident(&self) -> Option<ResidentModel> {
        self.inner.state.lock().await.resident.clone()
    }

    pub async fn resident_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .resident
            .as_ref()
            .map(|r| r.id().to_string())
    }

    /// Record that an inference call finished, successfully or not
    pub async fn mark_use_completed(&self) {
        let mut state = self.inner.state.lock().await;
        let mode = state.mode;
        match mode {
            LifecycleMode::AlwaysLoaded => {}
            LifecycleMode::Dynamic(delay) => self.inner.arm_eviction(&mut state, delay),
            LifecycleMode::Disabled => {
                if let Some(resident) = state.resident.take() {
                    release_model(resident, EvictionReason::Disabled);
                }
            }
        }
    }

    /// Switch the lifecycle mode.
    ///
    /// Any pending eviction is cancelled. Entering `Dynamic` with a model
    /// resident arms eviction right away with the new delay, without waiting
    /// for the next completed use. Entering `Disabled` releases the resident
    /// model.
    pub async fn set_mode(&self, mode: LifecycleMode) {
        let mut state = self.inner.state.lock().await;
        let previous = std::mem::replace(&mut state.mode, mode);
        state.eviction.cancel();

        match mode {
            LifecycleMode::Disabled => {
                if let Some(resident) = state.resident.take() {
                    release_model(resident, EvictionReason::Disabled);
                }
            }
            LifecycleMode::AlwaysLoaded => {}
            LifecycleMode::Dynamic(delay) => self.inner.arm_eviction(&mut state, delay),
        }

        tracing::info!(from = %previous, to = %mode, "Lifecycle mode changed");
    }

    pub async fn mode(&self) -> LifecycleMode {
        self.inner.state.lock().await.mode
    }

    /// Time left before the resident model is evicted
    pub async fn eviction_time_remaining(&self) -> Option<Duration> {
        self.inner.state.lock().await.eviction.remaining()
    }

    /// Evict the resident model now. Returns the evicted model id.
    pub async fn release(&self) -> Option<String> {
        self.inner.release(EvictionReason::Manual).await
    }

    /// Evict the resident model before the process exits
    pub async fn shutdown(&self) -> Option<String> {
        self.inner.release(EvictionReason::Shutdown).await
    }

    pub async fn status(&self) -> LifecycleStatus {
        let state = self.inner.state.lock().await;
        LifecycleStatus {
            mode: state.mode.as_str(),
            eviction_delay_secs: state.mode.eviction_delay().map(|d| d.as_secs()),
            resident_model: state.resident.as_ref().map(|r| r.id().to_string()),
            loaded_at: state.resident.as_ref().map(ResidentModel::loaded_at),
            eviction_remaining_secs: state.eviction.remaining().map(|d| d.as_secs_f64()),
        }
    }

    /// Guard that marks use completed when it is dropped or completed
    pub fn use_guard(&self) -> UseGuard {
        UseGuard {
            manager: Some(self.clone()),
        }
    }
}

impl ManagerInner {
    async fn activate(&self, descriptor: Arc<ModelDescriptor>) -> GatewayResult<ResidentModel> {
        let mut state = self.state.lock().await;

        if state.mode == LifecycleMode::Disabled {
            return Err(GatewayError::ModelLoadingDisabled {
                model: descriptor.id.clone(),
            });
        }

        state.eviction.cancel();

        if let Some(resident) = &state.resident
            && resident.id() == descriptor.id
        {
            tracing::debug!(model = %descriptor.id, "Model already resident");
            return Ok(resident.clone());
        }

        if let Some(previous) = state.resident.take() {
            tracing::info!(from = %previous.id(), to = %descriptor.id, "Swapping resident model");
            crate::metrics::record_model_swap(previous.id(), &descriptor.id);
            release_model(previous, EvictionReason::Swap);

            if !self.swap_settle.is_zero() {
                tokio::time::sleep(self.swap_settle).await;
            }
        }

        tracing::info!(model = %descriptor.id, backend = %descriptor.backend, "Loading model");
        let started = Instant::now();

        match self.factory.construct(&descriptor).await {
            Ok(model) => {
                let elapsed = started.elapsed();
                let resident = ResidentModel::new(descriptor, model);
                crate::metrics::record_model_loaded(resident.id(), elapsed.as_secs_f64());
                crate::metrics::set_resident(resident.id(), true);
                tracing::info!(
                    model = %resident.id(),
                    load_ms = elapsed.as_millis() as u64,
                    "Model loaded"
                );
                state.resident = Some(resident.clone());
                Ok(resident)
            }
            Err(e) => {
                crate::metrics::record_model_load_failed(&descriptor.id);
                tracing::error!(model = %descriptor.id, error = %e, "Model load failed");
                Err(GatewayError::ModelLoadFailed {
                    model: descriptor.id.clone(),
                    source: e,
                })
            }
        }
    }

    fn arm_eviction(self: &Arc<Self>, state: &mut ManagerState, delay: Duration) {
        let Some(resident) = &state.resident else {
            return;
        };

        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        state
            .eviction
            .arm(resident.id().to_string(), delay, move |generation| async move {
                if let Some(inner) = weak.upgrade() {
                    inner.evict_expired(generation).await;
                }
            });
    }

    /// Eviction timer callback. A superseded arm or a swapped-out model is a no-op.
    async fn evict_expired(&self, generation: u64) {
        let mut state = self.state.lock().await;

        let Some(armed_for) = state.eviction.take_fired(generation) else {
            tracing::debug!(generation, "Ignoring stale eviction timer");
            return;
        };

        match state.resident.take() {
            Some(resident) if resident.id() == armed_for => {
                tracing::info!(model = %armed_for, "Evicting idle model");
                release_model(resident, EvictionReason::Idle);
            }
            other => {
                state.resident = other;
                tracing::debug!(model = %armed_for, "Resident model changed since arming");
            }
        }
    }

    async fn release(&self, reason: EvictionReason) -> Option<String> {
        let mut state = self.state.lock().await;
        state.eviction.cancel();
        let resident = state.resident.take()?;
        let id = resident.id().to_string();
        release_model(resident, reason);
        Some(id)
    }
}

/// Release a model that has already left the slot. Failures are logged only.
fn release_model(resident: ResidentModel, reason: EvictionReason) {
    let id = resident.id().to_string();

    match resident.model().release() {
        Ok(()) => tracing::info!(model = %id, reason = reason.as_str(), "Model released"),
        Err(e) => tracing::error!(
            model = %id,
            reason = reason.as_str(),
            error = %e,
            "Model release failed, slot cleared anyway"
        ),
    }

    crate::metrics::record_model_evicted(&id, reason.as_str());
    crate::metrics::set_resident(&id, false);
}

// ============================================================================
// Use Guard
// ============================================================================

/// Marks use completed exactly once.
///
/// Call [`UseGuard::complete`] on the normal path. Dropping an uncompleted
/// guard (for example when a client disconnects mid-stream) schedules the
/// same call on the runtime.
pub struct UseGuard {
    manager: Option<LifecycleManager>,
}

impl UseGuard {
    pub async fn complete(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.mark_use_completed().await;
        }
    }
}

impl Drop for UseGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(async move { manager.mark_use_completed().await });
        }
    }
}
