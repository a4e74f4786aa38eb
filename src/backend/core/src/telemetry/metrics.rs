//! Prometheus metrics for identity resolution, voting and code allocation.
//!
//! The recorder is installed once by [`init_metrics`]. Helpers in this module are safe to
//! call before that (or in tests, where no recorder exists); the `metrics` facade turns
//! them into no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum_core::telemetry::metrics::{record_resolve, StoreTimer};
//!
//! record_resolve("merge");
//! let timer = StoreTimer::start("toggle_voter");
//! timer.finish(true);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

use crate::events::VoteChange;

/// Handle of the installed recorder, set by [`init_metrics`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for store latencies (in seconds)
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            latency_buckets: default_latency_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_latency_buckets() -> Vec<f64> {
    vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
}

/// Renders the installed recorder for the `/metrics` endpoint.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry backed by the globally installed recorder, if any.
    pub fn global() -> Self {
        Self {
            handle: PROMETHEUS_HANDLE.get().cloned(),
        }
    }

    /// A registry that renders nothing.
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }
}

/// Install the Prometheus recorder.
///
/// Calling this twice returns the registry of the first installation.
///
/// # Errors
///
/// Returns an error if the bucket layout is invalid or another recorder is installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(MetricsRegistry {
            handle: Some(handle.clone()),
        });
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.latency_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry { handle: Some(handle) })
}

fn register_metric_descriptions() {
    describe_counter!(
        "quorum_resolves_total",
        "Identity resolutions by reconciliation decision"
    );
    describe_counter!("quorum_votes_total", "Vote toggles by direction");
    describe_counter!(
        "quorum_code_collisions_total",
        "Event code collisions by detection stage"
    );
    describe_counter!("quorum_events_created_total", "Events created");
    describe_counter!("quorum_questions_total", "Questions asked");
    describe_counter!("quorum_errors_total", "Errors by code and category");
    describe_histogram!(
        "quorum_store_latency_seconds",
        "Store operation latency in seconds"
    );
}

pub fn record_resolve(decision: &'static str) {
    counter!("quorum_resolves_total", "decision" => decision).increment(1);
}

pub fn record_vote(change: VoteChange) {
    counter!("quorum_votes_total", "change" => change.as_str()).increment(1);
}

/// `stage` is `precheck` for collisions seen by the existence check and `insert` for
/// ones rejected by the uniqueness constraint.
pub fn record_code_collision(stage: &'static str) {
    counter!("quorum_code_collisions_total", "stage" => stage).increment(1);
}

pub fn record_event_created(vanity: bool) {
    let kind = if vanity { "vanity" } else { "generated" };
    counter!("quorum_events_created_total", "code" => kind).increment(1);
}

pub fn record_question() {
    counter!("quorum_questions_total").increment(1);
}

/// Times one store operation.
pub struct StoreTimer {
    start: Instant,
    operation: &'static str,
}

impl StoreTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record the elapsed time, labelled by outcome.
    pub fn finish(self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        histogram!(
            "quorum_store_latency_seconds",
            "operation" => self.operation,
            "outcome" => outcome,
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.latency_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let registry = init_metrics(
            &MetricsConfig {
                enabled: false,
                ..Default::default()
            },
            "quorum-test",
        )
        .unwrap();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_helpers_without_recorder() {
        record_resolve("no_op");
        record_vote(VoteChange::Cast);
        record_code_collision("insert");
        StoreTimer::start("rerank").finish(true);
    }
}
