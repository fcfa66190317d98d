//! Deferred eviction of the resident model

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Longest delay an eviction can be armed with (30 days)
pub const MAX_EVICTION_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The currently armed eviction
#[derive(Debug)]
struct ArmedEviction {
    generation: u64,
    model_id: String,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Holds at most one pending eviction.
///
/// Arming always cancels the previous arm first. Every arm gets a fresh
/// generation number which the fired task hands back through
/// [`EvictionScheduler::take_fired`]; a generation that is no longer current
/// belongs to a superseded arm and must be ignored.
#[derive(Debug, Default)]
pub struct EvictionScheduler {
    armed: Option<ArmedEviction>,
    generation: u64,
}

impl EvictionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm eviction of `model_id` after `delay`, superseding any previous arm.
    ///
    /// `on_fire` runs on a spawned task once the delay elapses and receives
    /// the generation of this arm. Delays above [`MAX_EVICTION_DELAY`] are
    /// clamped to it.
    pub fn arm<F, Fut>(&mut self, model_id: String, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let delay = delay.min(MAX_EVICTION_DELAY);
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now);

        self.generation += 1;
        let generation = self.generation;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_fire(generation).await;
        });

        tracing::debug!(
            model = %model_id,
            generation,
            delay_ms = delay.as_millis() as u64,
            "Eviction armed"
        );

        self.armed = Some(ArmedEviction {
            generation,
            model_id,
            deadline,
            handle,
        });

        generation
    }

    /// Cancel the pending eviction. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                tracing::debug!(
                    model = %armed.model_id,
                    generation = armed.generation,
                    "Eviction cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Claim a fired arm.
    ///
    /// Returns the model id the arm was created for if `generation` is still
    /// the current arm, disarming it. The firing task calls this itself, so
    /// its handle is dropped rather than aborted.
    pub fn take_fired(&mut self, generation: u64) -> Option<String> {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed.take().map(|armed| armed.model_id)
            }
            _ => None,
        }
    }

    /// Time left until the pending eviction fires
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .map(|armed| armed.deadline.saturating_duration_since(Instant::now()))
    }

    /// Model id the pending eviction was armed for
    pub fn armed_for(&self) -> Option<&str> {
        self.armed.as_ref().map(|armed| armed.model_id.as_str())
    }

    /// Generation of the pending eviction
    pub fn current_generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|armed| armed.generation)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
        }
    }
}
