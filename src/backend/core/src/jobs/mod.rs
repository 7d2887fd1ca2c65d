//! Job records shared by the dispatcher, the ledger and the aggregator.
//!
//! # Lifecycle
//!
//! ```text
//!   dispatcher                      workers
//!  ────────────                ─────────────────────────────
//!   processing ──────────────▶ running ──▶ completed | partial | failed
//!        │
//!        └──▶ orphaned   (message never published)
//! ```

pub mod job;
pub mod metadata;

pub use job::{JobId, JobStatus};
pub use metadata::{now_millis, JobMetadata, JobMetadataPatch, JobStats};
