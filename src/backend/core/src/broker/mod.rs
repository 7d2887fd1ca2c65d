//! Message broker seam and the three dispatch lanes.
//!
//! A lane is an exchange plus routing key bound to a durable work queue, with a
//! dead-letter exchange/queue pair behind it. [`BrokerSession`] provisions all
//! lanes once and is then shared by the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{LaneConfig, LanesConfig};
use crate::error::{RaptorError, Result};

pub mod memory;
pub mod redis;
pub mod session;

pub use self::memory::{InMemoryBroker, PublishedMessage};
pub use self::redis::RedisBroker;
pub use self::session::BrokerSession;

// ═══════════════════════════════════════════════════════════════════════════════
// Lanes
// ═══════════════════════════════════════════════════════════════════════════════

/// A dispatch lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lane {
    /// Whole-model quantification
    Quant,
    /// One job per sequence, fixed truncation
    DistributedSequences,
    /// One job per sequence, adaptive truncation
    AdaptiveSequences,
}

impl Lane {
    pub const fn all() -> [Lane; 3] {
        [Self::Quant, Self::DistributedSequences, Self::AdaptiveSequences]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quant => "quant",
            Self::DistributedSequences => "distributed-sequences",
            Self::AdaptiveSequences => "adaptive-sequences",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Quant => "Quantify the whole model in a single job",
            Self::DistributedSequences => "Quantify each event-tree sequence as its own job",
            Self::AdaptiveSequences => {
                "Quantify each event-tree sequence as its own job with adaptive truncation"
            }
        }
    }

    /// This lane's topology within `lanes`.
    pub fn config<'a>(&self, lanes: &'a LanesConfig) -> &'a LaneConfig {
        match self {
            Self::Quant => &lanes.quant,
            Self::DistributedSequences => &lanes.distributed_sequences,
            Self::AdaptiveSequences => &lanes.adaptive_sequences,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = RaptorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .into_iter()
            .find(|lane| lane.as_str() == s)
            .ok_or_else(|| RaptorError::validation(format!("Unknown lane: {}", s)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Broker Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-message publish flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Survive a broker restart
    pub persistent: bool,
}

impl PublishOptions {
    pub fn persistent() -> Self {
        Self { persistent: true }
    }
}

/// Operations the dispatcher needs from a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare the lane's exchanges and queues and bind them. Idempotent.
    async fn setup_queue(&self, lane: &LaneConfig) -> Result<()>;

    /// Fail if `exchange` does not exist.
    async fn check_exchange(&self, exchange: &str) -> Result<()>;

    /// Publish one message. Unroutable messages are dropped.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> Result<()>;

    async fn delete_exchange(&self, exchange: &str) -> Result<()>;

    /// Number of messages waiting in `queue`.
    async fn queue_depth(&self, queue: &str) -> Result<u64>;

    async fn close_channel(&self) -> Result<()>;

    async fn close_connection(&self) -> Result<()>;

    /// Health check.
    async fn ping(&self) -> Result<()>;
}
