//! Configuration management.

use serde::{Deserialize, Serialize};

use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Message broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Job ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Dispatcher behaviour
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Redis connection URL backing the broker
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key namespace for exchanges, bindings and queues
    #[serde(default = "default_broker_namespace")]
    pub namespace: String,

    /// Per-lane topology
    #[serde(default)]
    pub lanes: LanesConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_broker_namespace(),
            lanes: LanesConfig::default(),
        }
    }
}

/// Topology for the three dispatch lanes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LanesConfig {
    #[serde(default = "default_quant_lane")]
    pub quant: LaneConfig,

    #[serde(default = "default_distributed_sequences_lane")]
    pub distributed_sequences: LaneConfig,

    #[serde(default = "default_adaptive_sequences_lane")]
    pub adaptive_sequences: LaneConfig,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            quant: default_quant_lane(),
            distributed_sequences: default_distributed_sequences_lane(),
            adaptive_sequences: default_adaptive_sequences_lane(),
        }
    }
}

/// A work queue bound to an exchange, with its dead-letter pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LaneConfig {
    /// Queue name
    pub name: String,

    /// Whether the queue survives broker restarts
    #[serde(default = "default_true")]
    pub durable: bool,

    /// Message time-to-live in milliseconds
    #[serde(default = "default_message_ttl")]
    pub message_ttl: u64,

    /// Maximum queue length; oldest messages are dropped past this
    #[serde(default = "default_max_length")]
    pub max_length: u64,

    /// Consumer prefetch count
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,

    pub exchange: ExchangeConfig,

    pub dead_letter: DeadLetterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub name: String,

    /// Exchange type (direct, topic, fanout)
    #[serde(default = "default_exchange_type", rename = "type")]
    pub kind: String,

    #[serde(default = "default_true")]
    pub durable: bool,

    pub binding_key: String,

    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeadLetterConfig {
    /// Dead-letter queue name
    pub name: String,

    #[serde(default = "default_true")]
    pub durable: bool,

    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Redis connection URL backing the ledger
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every ledger key
    #[serde(default = "default_ledger_prefix")]
    pub key_prefix: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_ledger_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Mark children that were never published as orphaned when a batch fails
    #[serde(default = "default_true")]
    pub mark_orphans: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mark_orphans: default_true(),
        }
    }
}

impl LaneConfig {
    /// Conventional topology for a lane called `base`.
    pub fn named(base: &str) -> Self {
        Self {
            name: format!("{base}-queue"),
            durable: true,
            message_ttl: default_message_ttl(),
            max_length: default_max_length(),
            prefetch: default_prefetch(),
            exchange: ExchangeConfig {
                name: format!("{base}-exchange"),
                kind: default_exchange_type(),
                durable: true,
                binding_key: base.to_string(),
                routing_key: base.to_string(),
            },
            dead_letter: DeadLetterConfig {
                name: format!("{base}-dead-letter-queue"),
                durable: true,
                exchange: ExchangeConfig {
                    name: format!("{base}-dead-letter-exchange"),
                    kind: default_exchange_type(),
                    durable: true,
                    binding_key: format!("{base}-dead-letter"),
                    routing_key: format!("{base}-dead-letter"),
                },
            },
        }
    }
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_broker_namespace() -> String { "raptor:broker".to_string() }
fn default_ledger_prefix() -> String { "raptor:ledger".to_string() }
fn default_exchange_type() -> String { "direct".to_string() }
fn default_message_ttl() -> u64 { 86_400_000 }
fn default_max_length() -> u64 { 10_000 }
fn default_prefetch() -> u16 { 1 }
fn default_true() -> bool { true }
fn default_quant_lane() -> LaneConfig { LaneConfig::named("quant") }
fn default_distributed_sequences_lane() -> LaneConfig { LaneConfig::named("distributed-sequences") }
fn default_adaptive_sequences_lane() -> LaneConfig { LaneConfig::named("adaptive-sequences") }

const ENV_PREFIX: &str = "RAPTOR";

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
