//! Structured logging with JSON/pretty formats and key redaction.
//!
//! Device keys, session keys and account ids are bearer-like: anyone holding a session key
//! can act as that participant. They are masked whenever they pass through
//! [`LogEventBuilder`].

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global redactor instance.
static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default = "default_include_location")]
    pub include_location: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Log span close events with their durations
    #[serde(default = "default_span_close")]
    pub span_close: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: default_include_location(),
            include_target: default_include_target(),
            span_close: default_span_close(),
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    /// Field names to match (case-insensitive substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against string values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Redactor for sensitive fields in log output.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    field_names: Vec<String>,
    value_patterns: Vec<regex::Regex>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    /// Build a redactor. Invalid value patterns are skipped with a warning.
    pub fn new(config: &RedactionConfig) -> Self {
        let field_names = config
            .patterns
            .iter()
            .flat_map(|p| p.field_names.iter().map(|f| f.to_lowercase()))
            .collect();

        let value_patterns = config
            .patterns
            .iter()
            .filter_map(|p| {
                let raw = p.value_pattern.as_ref()?;
                match regex::Regex::new(raw) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        tracing::warn!(pattern = %p.name, error = %e, "Ignoring invalid redaction pattern");
                        None
                    }
                }
            })
            .collect();

        Self {
            field_names,
            value_patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f.as_str()))
    }

    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }
        self.value_patterns
            .iter()
            .fold(value.to_string(), |acc, regex| {
                regex.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Redact by field name first, then by value pattern.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_location() -> bool {
    false
}

fn default_include_target() -> bool {
    true
}

fn default_span_close() -> bool {
    false
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "participant_keys".to_string(),
            field_names: vec![
                "device_key".to_string(),
                "session_key".to_string(),
                "x-device-key".to_string(),
                "x-session-key".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            name: "accounts".to_string(),
            field_names: vec!["account".to_string(), "x-account-id".to_string()],
            value_pattern: None,
        },
        RedactionPattern {
            name: "credentials".to_string(),
            field_names: vec![
                "password".to_string(),
                "secret".to_string(),
                "token".to_string(),
                "authorization".to_string(),
            ],
            value_pattern: Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+".to_string()),
        },
        RedactionPattern {
            name: "database_urls".to_string(),
            field_names: vec![],
            value_pattern: Some(r"postgres(?:ql)?://[^\s@]+@".to_string()),
        },
    ]
}

/// Install the global subscriber.
///
/// `tracer` adds an OpenTelemetry layer when span export is configured. In development,
/// a JSON format request falls back to pretty output.
pub fn init_logging(
    config: &LoggingConfig,
    environment: &str,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let format = if environment == "development" && config.format == LogFormat::Json {
        &LogFormat::Pretty
    } else {
        &config.format
    };

    let span_events = if config.span_close {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let otel = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
    let registry = tracing_subscriber::registry().with(filter).with(otel);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_span_events(span_events)
                    .with_target(config.include_target),
            )
            .try_init()?,
    }

    Ok(())
}

/// Structured log event with redacted fields.
#[derive(Debug)]
pub struct LogEventBuilder {
    level: tracing::Level,
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl LogEventBuilder {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(tracing::Level::INFO, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(tracing::Level::WARN, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(tracing::Level::ERROR, message)
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(tracing::Level::DEBUG, message)
    }

    fn new(level: tracing::Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl serde::Serialize) -> Self {
        let key = key.into();
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);

        let redactor = SensitiveFieldRedactor::global();
        let value = if redactor.should_redact_field(&key) {
            serde_json::Value::String(redactor.replacement().to_string())
        } else if let serde_json::Value::String(s) = &value {
            serde_json::Value::String(redactor.redact_value(s))
        } else {
            value
        };

        self.fields.insert(key, value);
        self
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.fields
    }

    pub fn emit(self) {
        let fields = serde_json::Value::Object(self.fields).to_string();
        match self.level {
            tracing::Level::ERROR => tracing::error!(fields = %fields, "{}", self.message),
            tracing::Level::WARN => tracing::warn!(fields = %fields, "{}", self.message),
            tracing::Level::INFO => tracing::info!(fields = %fields, "{}", self.message),
            tracing::Level::DEBUG => tracing::debug!(fields = %fields, "{}", self.message),
            tracing::Level::TRACE => tracing::trace!(fields = %fields, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_keys_are_redacted() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());

        assert!(redactor.should_redact_field("device_key"));
        assert!(redactor.should_redact_field("SESSION_KEY"));
        assert!(redactor.should_redact_field("account_id"));
        assert!(redactor.should_redact_field("x-session-key"));
        assert!(!redactor.should_redact_field("identity_id"));
        assert!(!redactor.should_redact_field("event_code"));
    }

    #[test]
    fn test_value_patterns() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());

        let url = "connecting to postgres://quorum:hunter2@db:5432/quorum";
        assert_eq!(
            redactor.redact_value(url),
            "connecting to [REDACTED]db:5432/quorum"
        );
        assert_eq!(redactor.redact_value("hello world"), "hello world");
    }

    #[test]
    fn test_disabled_redaction_passes_through() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(redactor.redact("session_key", "abc"), "abc");
    }

    #[test]
    fn test_log_event_builder_masks_keys() {
        let event = LogEventBuilder::info("Identity created")
            .field("identity_id", "8c1f")
            .field("device_key", "dev-123");

        assert_eq!(event.fields()["identity_id"], "8c1f");
        assert_eq!(event.fields()["device_key"], "[REDACTED]");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.redaction.enabled);
    }
}
