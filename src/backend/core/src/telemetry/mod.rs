//! Telemetry: logging, span export and metrics.
//!
//! - **Logging**: structured JSON/pretty logging with participant-key redaction
//! - **Tracing**: optional OTLP span export through `tracing-opentelemetry`
//! - **Metrics**: Prometheus counters and histograms
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let handle = init_telemetry(&TelemetryConfig::default())?;
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, LogEventBuilder, LogFormat, LoggingConfig, RedactionConfig, SensitiveFieldRedactor};
pub use self::metrics::{init_metrics, MetricsConfig, MetricsRegistry};

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace as sdktrace, Resource};
use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// development, staging or production
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// OTLP gRPC endpoint. Span export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            otlp_endpoint: None,
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "quorum".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

/// Set up metrics, span export and logging, in that order.
///
/// Must run inside a Tokio runtime when `otlp_endpoint` is set.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    let tracer = match &config.otlp_endpoint {
        Some(endpoint) => Some(init_otlp(endpoint, &config.service_name)?),
        None => None,
    };
    let exporting = tracer.is_some();

    init_logging(&config.logging, &config.environment, tracer)?;

    Ok(TelemetryHandle { metrics, exporting })
}

fn init_otlp(endpoint: &str, service_name: &str) -> anyhow::Result<sdktrace::Tracer> {
    let resource = Resource::new(vec![
        opentelemetry::KeyValue::new("service.name", service_name.to_string()),
        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    opentelemetry::global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    Ok(tracer)
}

/// Keeps telemetry state alive for the life of the process.
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
    exporting: bool,
}

impl TelemetryHandle {
    /// Flush pending spans.
    pub fn shutdown(self) {
        if self.exporting {
            opentelemetry::global::shutdown_tracer_provider();
        }
        tracing::info!("Telemetry shutdown complete");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain events
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured events emitted by the core. Logged through [`LogEventBuilder`] so
/// participant keys never reach the output unmasked.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    IdentityCreated {
        identity_id: String,
        device_key: String,
    },
    IdentitiesMerged {
        survivor: String,
        loser: String,
    },
    VotesMigrated {
        survivor: String,
        loser: String,
        events: usize,
    },
    EventCreated {
        event_id: String,
        code: String,
        vanity: bool,
    },
    CodeCollision {
        code: String,
        stage: &'static str,
        draws: u32,
    },
    QuestionAsked {
        event_id: String,
        question_id: String,
    },
    VoteToggled {
        event_id: String,
        question_id: String,
        change: &'static str,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IdentityCreated { .. } => "identity_created",
            Self::IdentitiesMerged { .. } => "identities_merged",
            Self::VotesMigrated { .. } => "votes_migrated",
            Self::EventCreated { .. } => "event_created",
            Self::CodeCollision { .. } => "code_collision",
            Self::QuestionAsked { .. } => "question_asked",
            Self::VoteToggled { .. } => "vote_toggled",
        }
    }

    /// Build the log record without emitting it.
    pub fn to_log(&self) -> LogEventBuilder {
        let builder = match self {
            Self::IdentityCreated { identity_id, device_key } => LogEventBuilder::info("Identity created")
                .field("identity_id", identity_id)
                .field("device_key", device_key),
            Self::IdentitiesMerged { survivor, loser } => LogEventBuilder::info("Identities merged")
                .field("survivor", survivor)
                .field("loser", loser),
            Self::VotesMigrated { survivor, loser, events } => LogEventBuilder::info("Votes migrated")
                .field("survivor", survivor)
                .field("loser", loser)
                .field("events", events),
            Self::EventCreated { event_id, code, vanity } => LogEventBuilder::info("Event created")
                .field("event_id", event_id)
                .field("code", code)
                .field("vanity", vanity),
            Self::CodeCollision { code, stage, draws } => LogEventBuilder::warn("Event code collision")
                .field("code", code)
                .field("stage", stage)
                .field("draws", draws),
            Self::QuestionAsked { event_id, question_id } => LogEventBuilder::debug("Question asked")
                .field("event_id", event_id)
                .field("question_id", question_id),
            Self::VoteToggled {
                event_id,
                question_id,
                change,
            } => LogEventBuilder::debug("Vote toggled")
                .field("event_id", event_id)
                .field("question_id", question_id)
                .field("change", change),
        };
        builder.field("event", self.name())
    }

    pub fn log(&self) {
        self.to_log().emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "quorum");
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_identity_created_masks_device_key() {
        let event = DomainEvent::IdentityCreated {
            identity_id: "id-1".to_string(),
            device_key: "device-secret".to_string(),
        };
        let log = event.to_log();
        assert_eq!(log.fields()["device_key"], "[REDACTED]");
        assert_eq!(log.fields()["identity_id"], "id-1");
        assert_eq!(log.fields()["event"], "identity_created");
    }
}
