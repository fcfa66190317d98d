//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a successful model load
pub fn record_model_loaded(model: &str, duration_secs: f64) {
    metrics::counter!("swapgate_model_loads_total",
        "model" => model.to_string()
    )
    .increment(1);
    metrics::histogram!("swapgate_model_load_duration_seconds",
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Record a failed model load
pub fn record_model_load_failed(model: &str) {
    metrics::counter!("swapgate_model_load_failures_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record a model leaving the resident slot
pub fn record_model_evicted(model: &str, reason: &'static str) {
    metrics::counter!("swapgate_model_evictions_total",
        "model" => model.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a swap between two models
pub fn record_model_swap(from: &str, to: &str) {
    metrics::counter!("swapgate_model_swaps_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// 1 while `model` is resident, 0 otherwise
pub fn set_resident(model: &str, resident: bool) {
    metrics::gauge!("swapgate_resident_model",
        "model" => model.to_string()
    )
    .set(if resident { 1.0 } else { 0.0 });
}

/// Record a served inference request
pub fn record_inference(model: &str, endpoint: &'static str, stream: bool, success: bool) {
    metrics::counter!("swapgate_inference_requests_total",
        "model" => model.to_string(),
        "endpoint" => endpoint,
        "stream" => stream.to_string(),
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);
}
