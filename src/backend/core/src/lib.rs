#![allow(clippy::result_large_err)]
//! # Raptor Core
//!
//! Job orchestration for PRA model quantification.
//!
//! ## Architecture
//!
//! - **Decompose**: Splits a whole-model request into one request per event-tree sequence
//! - **Dispatch**: Records jobs in the ledger and publishes them to the broker lanes
//! - **Aggregate**: Reads job records back and merges per-sequence results
//! - **Broker**: Lane topology over an in-memory or Redis-emulated message broker
//! - **Ledger**: Job metadata and payload blobs, in memory or in Redis
//! - **Telemetry**: Structured logging with credential redaction, and metrics
//!
//! ```text
//!  QuantRequest ──▶ decompose ──▶ JobDispatcher ──▶ BrokerSession ──▶ workers
//!                                      │                               │
//!                                      ▼                               ▼
//!                                  JobLedger ◀──────────────────── results
//!                                      │
//!                                      ▼
//!                               ResultAggregator
//! ```

pub mod aggregate;
pub mod broker;
pub mod config;
pub mod decompose;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod request;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorResponse, ErrorSeverity, RaptorError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregate::{
        AggregatedOutput, ChildJobOutput, ChildStats, FailedJob, JobOutputResponse, JobStatsView,
        JobStatusView, ResultAggregator,
    };
    pub use crate::broker::{Broker, BrokerSession, InMemoryBroker, Lane, PublishOptions, RedisBroker};
    pub use crate::config::{Config, DispatchConfig, LaneConfig, LanesConfig};
    pub use crate::decompose::{all_sequence_names, extract_sequence_requests, SequenceBatch};
    pub use crate::dispatch::JobDispatcher;
    pub use crate::error::{ErrorCode, ErrorDetails, ErrorResponse, ErrorSeverity, RaptorError, Result};
    pub use crate::jobs::{JobId, JobMetadata, JobMetadataPatch, JobStats, JobStatus};
    pub use crate::ledger::{InMemoryLedger, JobLedger, RedisLedger};
    pub use crate::request::{EventTree, Model, QuantRequest, Sequence};
}
