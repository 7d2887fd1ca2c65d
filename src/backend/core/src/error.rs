//! Error handling for Raptor Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - User-facing messages kept apart from internal diagnostics
//! - Structured details (entity, context map, suggestions)
//! - Severity-aware logging and error metrics
//!
//! Dispatch-path failures are always returned to the caller. Aggregation-path
//! failures for individual child jobs are reported in-band by the aggregator and
//! never reach this type, except when the target job itself cannot be found.
//!
//! # Usage
//!
//! ```rust,ignore
//! use raptor_core::error::{ErrorCode, RaptorError, Result};
//!
//! fn load() -> Result<String> {
//!     let text = std::fs::read_to_string("request.json")?;
//!     if text.trim().is_empty() {
//!         return Err(RaptorError::new(ErrorCode::ValidationError, "Request file is empty"));
//!     }
//!     Ok(text)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::jobs::JobId;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Raptor operations.
pub type Result<T> = std::result::Result<T, RaptorError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Dispatch Errors (1000-1099)
    ValidationError,
    DecompositionFailed,
    BrokerUnavailable,
    PartialBatchFailure,
    ShutdownFailed,

    // Ledger Errors (2000-2099)
    JobNotFound,
    BlobNotFound,
    LedgerError,
    LedgerConnectionFailed,

    // Broker Errors (2100-2199)
    BrokerError,
    BrokerConnectionFailed,
    LaneProvisioningFailed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::DecompositionFailed => 1001,
            Self::BrokerUnavailable => 1002,
            Self::PartialBatchFailure => 1003,
            Self::ShutdownFailed => 1004,

            Self::JobNotFound => 2000,
            Self::BlobNotFound => 2001,
            Self::LedgerError => 2002,
            Self::LedgerConnectionFailed => 2003,

            Self::BrokerError => 2100,
            Self::BrokerConnectionFailed => 2101,
            Self::LaneProvisioningFailed => 2102,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category name.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ValidationError
            | Self::DecompositionFailed
            | Self::BrokerUnavailable
            | Self::PartialBatchFailure
            | Self::ShutdownFailed => "dispatch",

            Self::JobNotFound
            | Self::BlobNotFound
            | Self::LedgerError
            | Self::LedgerConnectionFailed => "ledger",

            Self::BrokerError | Self::BrokerConnectionFailed | Self::LaneProvisioningFailed => {
                "broker"
            }

            Self::SerializationError | Self::DeserializationError | Self::InvalidJson => {
                "serialization"
            }

            Self::ConfigurationError | Self::MissingConfiguration | Self::InvalidConfiguration => {
                "configuration"
            }

            Self::InternalError => "internal",
        }
    }

    /// Whether the same call may succeed if retried later.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable
                | Self::BrokerConnectionFailed
                | Self::LedgerConnectionFailed
                | Self::LedgerError
                | Self::BrokerError
        )
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

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad request, unknown job)
    Low,
    /// Operational issues (broker briefly unreachable)
    Medium,
    /// System errors (ledger failures, partial batches)
    High,
    /// Errors requiring immediate operator attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::DecompositionFailed
            | ErrorCode::JobNotFound
            | ErrorCode::BlobNotFound
            | ErrorCode::InvalidJson => Self::Low,

            ErrorCode::BrokerUnavailable
            | ErrorCode::BrokerError
            | ErrorCode::ShutdownFailed => Self::Medium,

            ErrorCode::PartialBatchFailure
            | ErrorCode::LedgerError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::LedgerConnectionFailed
            | ErrorCode::BrokerConnectionFailed
            | ErrorCode::LaneProvisioningFailed
            | ErrorCode::InternalError => Self::Critical,
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

    /// Related entity ID (job, exchange, blob)
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

/// The main error type for Raptor Core.
#[derive(Error, Debug)]
pub struct RaptorError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-facing error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for RaptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl RaptorError {
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

    /// Create an error with an internal diagnostic message.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a payload validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the structured details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Set the internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add a context entry.
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

    /// Get the user-facing message.
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

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Child jobs that were already published when a batch failed part-way.
    ///
    /// Empty for every error other than [`ErrorCode::PartialBatchFailure`].
    pub fn dispatched_job_ids(&self) -> Vec<JobId> {
        self.details
            .context
            .get("dispatched_job_ids")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
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
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "raptor_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Serializable Projection
// ═══════════════════════════════════════════════════════════════════════════════

/// Error document for machine consumers; the CLI prints it for JSON and YAML
/// output.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-facing message
    pub message: String,

    pub severity: ErrorSeverity,

    /// Whether retrying the same call may succeed
    pub retryable: bool,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&RaptorError> for ErrorResponse {
    fn from(error: &RaptorError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                severity: error.severity(),
                retryable: error.is_retryable(),
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
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for RaptorError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::LedgerConnectionFailed, "Unable to connect to Redis")
        } else if error.is_timeout() {
            (ErrorCode::LedgerError, "Redis operation timed out")
        } else {
            (ErrorCode::LedgerError, "A Redis error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for RaptorError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for RaptorError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::MissingConfiguration, "File not found"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::BrokerConnectionFailed, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for RaptorError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<RaptorError>() {
            Ok(raptor_error) => raptor_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for RaptorError {
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

impl RaptorError {
    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// The wire payload for a job failed schema validation.
    pub fn invalid_payload(job_id: &JobId, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ValidationError,
            format!("Invalid schema: JobID <{}>", job_id),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("job", job_id.as_str()))
    }

    /// The request could not be split into sequence jobs.
    pub fn decomposition(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecompositionFailed, reason.into())
    }

    /// An exchange was missing or unreachable at publish time.
    pub fn broker_unavailable(exchange: impl Into<String>, reason: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self::with_internal(
            ErrorCode::BrokerUnavailable,
            format!("{} does not exist or is unreachable", exchange),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("exchange", &exchange))
    }

    /// A child of a sequence batch failed to dispatch after earlier siblings
    /// were already published.
    pub fn partial_batch_failure(
        parent_job_id: &JobId,
        failed_job_id: &JobId,
        dispatched: &[JobId],
        cause: RaptorError,
    ) -> Self {
        Self::with_internal(
            ErrorCode::PartialBatchFailure,
            format!(
                "Failed to queue sequence batch for parent job {}",
                parent_job_id
            ),
            cause.to_string(),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("job", parent_job_id.as_str())
                .with_context("failed_job_id", failed_job_id)
                .with_context("dispatched_job_ids", dispatched)
                .with_suggestion(
                    "Already dispatched children are live; check their status before resubmitting",
                ),
        )
        .with_source(cause)
    }

    /// Exchange teardown finished with one or more failures.
    pub fn shutdown_failed(failures: Vec<String>) -> Self {
        Self::with_internal(
            ErrorCode::ShutdownFailed,
            "Producer failed to stop broker services",
            failures.join("; "),
        )
        .with_context("failures", failures)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// No metadata record exists for the job.
    pub fn job_not_found(job_id: &JobId) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
            .with_details(ErrorDetails::new().with_entity("job", job_id.as_str()))
    }

    /// No blob exists for the id.
    pub fn blob_not_found(kind: &str, blob_id: &str) -> Self {
        Self::new(
            ErrorCode::BlobNotFound,
            format!("No {} data found for ID: {}", kind, blob_id),
        )
        .with_details(ErrorDetails::new().with_entity(kind, blob_id))
    }

    /// A generic ledger failure.
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::LedgerError, "Job ledger operation failed", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Broker Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Lane provisioning failed at bootstrap.
    pub fn lane_provisioning(exchange: impl Into<String>, reason: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self::with_internal(
            ErrorCode::LaneProvisioningFailed,
            format!("Failed to initialize {}", exchange),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("exchange", &exchange))
    }

    /// A generic broker failure.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::BrokerError, "Broker operation failed", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
