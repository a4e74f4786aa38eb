//! Error handling for Quorum Core.
//!
//! This module provides:
//! - A single error type with stable, machine-readable codes
//! - HTTP status code mapping for API responses
//! - User-facing messages kept apart from internal detail
//! - Severity-driven logging with tracing integration
//! - An error counter for every constructed error
//!
//! # Usage
//!
//! ```rust,ignore
//! use quorum_core::error::{QuorumError, Result};
//!
//! fn load(code: &EventCode) -> Result<Event> {
//!     store.find(code)?.ok_or_else(|| QuorumError::event_not_found(code))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Quorum operations.
pub type Result<T> = std::result::Result<T, QuorumError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity Errors (1000-1099)
    IdentityConflict,
    IdentityNotFound,

    // Event Errors (1100-1199)
    EventNotFound,
    QuestionNotFound,
    DuplicateCode,
    CodeSpaceExhausted,

    // Store Errors (2000-2099)
    StoreError,
    StoreUnavailable,
    StoreTimeout,
    RecordNotFound,
    DuplicateRecord,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,
    MissingRequiredField,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::IdentityConflict => 1000,
            Self::IdentityNotFound => 1001,

            Self::EventNotFound => 1100,
            Self::QuestionNotFound => 1101,
            Self::DuplicateCode => 1102,
            Self::CodeSpaceExhausted => 1103,

            Self::StoreError => 2000,
            Self::StoreUnavailable => 2001,
            Self::StoreTimeout => 2002,
            Self::RecordNotFound => 2003,
            Self::DuplicateRecord => 2004,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,
            Self::MissingRequiredField => 4102,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::IdentityNotFound
            | Self::EventNotFound
            | Self::QuestionNotFound
            | Self::RecordNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::IdentityConflict | Self::DuplicateCode | Self::DuplicateRecord => {
                StatusCode::CONFLICT
            }

            // Unprocessable Entity (422)
            Self::ValidationError | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            // Bad Request (400)
            Self::MissingRequiredField => StatusCode::BAD_REQUEST,

            // Service Unavailable (503)
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            // Gateway Timeout (504)
            Self::StoreTimeout => StatusCode::GATEWAY_TIMEOUT,

            // Internal Server Error (500)
            Self::CodeSpaceExhausted
            | Self::StoreError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is a transient store failure.
    ///
    /// The core never retries these itself; the flag is informational for callers.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::StoreTimeout)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "identity",
            1100..=1199 => "event",
            2000..=2099 => "store",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown event)
    Low,
    /// Operational issues (timeouts, conflicts)
    Medium,
    /// System errors (store failures)
    High,
    /// Conditions that must page someone
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::IdentityNotFound
            | ErrorCode::EventNotFound
            | ErrorCode::QuestionNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateCode
            | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::IdentityConflict | ErrorCode::StoreTimeout => Self::Medium,

            ErrorCode::StoreError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::CodeSpaceExhausted
            | ErrorCode::StoreUnavailable
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (event, question, identity)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Quorum Core.
#[derive(Error, Debug)]
pub struct QuorumError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for QuorumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl QuorumError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a generic not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a missing field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("Missing required field: {}", field),
        )
        .with_context("field", field)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is a transient store failure.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// True for the not-found family (event, question, identity, record).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::EventNotFound
                | ErrorCode::QuestionNotFound
                | ErrorCode::IdentityNotFound
                | ErrorCode::RecordNotFound
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "quorum_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&QuorumError> for ErrorResponse {
    fn from(error: &QuorumError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty() && error.details.entity_id.is_none() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for QuorumError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for QuorumError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                    return Self::with_internal(
                        ErrorCode::DuplicateRecord,
                        "A record with this identifier already exists",
                        format!("Constraint violation: {}", constraint),
                    )
                    .with_context("constraint", constraint)
                    .with_source(error);
                }
                (ErrorCode::StoreError, "A store error occurred")
            }
            sqlx::Error::PoolTimedOut => (ErrorCode::StoreTimeout, "The store did not respond in time"),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                (ErrorCode::StoreUnavailable, "Unable to reach the store")
            }
            _ => (ErrorCode::StoreError, "A store error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for QuorumError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for QuorumError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::StoreTimeout,
            "The store did not respond in time",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for QuorumError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::StoreTimeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::StoreUnavailable, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for QuorumError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<QuorumError>() {
            Ok(quorum_error) => quorum_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for QuorumError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl QuorumError {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Two identities carrying different accounts cannot be reconciled.
    pub fn identity_conflict(linked: impl fmt::Display, requested: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::IdentityConflict,
            "This session is already bound to a different account",
            format!("linked account {} conflicts with {}", linked, requested),
        )
        .with_details(
            ErrorDetails::new().with_suggestion("Sign out to start a new session before switching accounts"),
        )
    }

    /// Create an identity not found error.
    pub fn identity_not_found(identity_id: uuid::Uuid) -> Self {
        Self::new(
            ErrorCode::IdentityNotFound,
            format!("Identity not found: {}", identity_id),
        )
        .with_details(ErrorDetails::new().with_entity("identity", identity_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an event not found error keyed by id or code.
    pub fn event_not_found(key: impl fmt::Display) -> Self {
        let key = key.to_string();
        Self::new(ErrorCode::EventNotFound, format!("Event not found: {}", key))
            .with_details(ErrorDetails::new().with_entity("event", key))
    }

    /// Create a question not found error.
    pub fn question_not_found(question_id: uuid::Uuid) -> Self {
        Self::new(
            ErrorCode::QuestionNotFound,
            format!("Question not found: {}", question_id),
        )
        .with_details(ErrorDetails::new().with_entity("question", question_id.to_string()))
    }

    /// An explicitly requested event code is already in use.
    pub fn duplicate_code(code: impl fmt::Display) -> Self {
        let code = code.to_string();
        Self::new(
            ErrorCode::DuplicateCode,
            format!("Event code already taken: {}", code),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("event_code", &code)
                .with_suggestion("Choose another code or omit it to get a generated one"),
        )
    }

    /// The allocator ran out of attempts. Operators must be alerted.
    pub fn code_space_exhausted(attempts: u32, code_length: usize) -> Self {
        Self::with_internal(
            ErrorCode::CodeSpaceExhausted,
            "Could not allocate an event code",
            format!(
                "{} consecutive collisions at code length {}",
                attempts, code_length
            ),
        )
        .with_context("attempts", attempts)
        .with_context("code_length", code_length)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::EventNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::IdentityConflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::DuplicateCode.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::StoreTimeout.http_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::CodeSpaceExhausted.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::StoreTimeout.is_retryable());
        assert!(ErrorCode::StoreUnavailable.is_retryable());
        assert!(!ErrorCode::CodeSpaceExhausted.is_retryable());
        assert!(!ErrorCode::IdentityConflict.is_retryable());
        assert!(!ErrorCode::EventNotFound.is_retryable());
    }

    #[test]
    fn test_code_space_exhausted_is_critical() {
        let error = QuorumError::code_space_exhausted(10, 8);
        assert_eq!(error.code(), ErrorCode::CodeSpaceExhausted);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(error.details().context.contains_key("attempts"));
    }

    #[test]
    fn test_not_found_family() {
        let id = uuid::Uuid::new_v4();
        assert!(QuorumError::event_not_found("abc").is_not_found());
        assert!(QuorumError::question_not_found(id).is_not_found());
        assert!(QuorumError::identity_not_found(id).is_not_found());
        assert!(!QuorumError::duplicate_code("abc").is_not_found());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = QuorumError::duplicate_code("launch");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("DUPLICATE_CODE"));
        assert!(json.contains("launch"));
        assert!(json.contains("1102"));
    }

    #[test]
    fn test_error_display() {
        let error = QuorumError::identity_conflict("acct-1", "acct-2");
        let display = format!("{}", error);
        assert!(display.contains("IdentityConflict"));
        assert!(display.contains("acct-1"));
    }
}
