//! Telemetry: structured logging and metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use raptor_core::telemetry::{init_logging, register_metrics, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default(), "production").expect("Failed to initialize logging");
//! register_metrics();
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig,
    SensitiveFieldRedactor, SpanEventConfig,
};
pub use metrics::register_metrics;
