//! Connections to the Redis-backed broker and ledger.

use anyhow::{Context, Result};
use std::sync::Arc;

use raptor_core::aggregate::ResultAggregator;
use raptor_core::broker::{BrokerSession, RedisBroker};
use raptor_core::config::Config;
use raptor_core::dispatch::JobDispatcher;
use raptor_core::ledger::{JobLedger, RedisLedger};
use raptor_core::telemetry::SensitiveFieldRedactor;

pub async fn ledger(config: &Config) -> Result<Arc<dyn JobLedger>> {
    let ledger = RedisLedger::connect(&config.ledger.url, config.ledger.key_prefix.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to ledger at {}",
                SensitiveFieldRedactor::global().redact_url(&config.ledger.url)
            )
        })?;
    Ok(Arc::new(ledger))
}

pub async fn broker(config: &Config) -> Result<Arc<RedisBroker>> {
    let broker = RedisBroker::connect(&config.broker.url, config.broker.namespace.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to broker at {}",
                SensitiveFieldRedactor::global().redact_url(&config.broker.url)
            )
        })?;
    Ok(Arc::new(broker))
}

/// Open a broker session, provisioning every lane.
pub async fn session(config: &Config) -> Result<BrokerSession> {
    let broker = broker(config).await?;
    Ok(BrokerSession::open(broker, config.broker.lanes.clone()).await?)
}

pub async fn dispatcher(config: &Config) -> Result<JobDispatcher> {
    let session = session(config).await?;
    let ledger = ledger(config).await?;
    Ok(JobDispatcher::new(session, ledger, config.dispatch.clone()))
}

pub async fn aggregator(config: &Config) -> Result<ResultAggregator> {
    Ok(ResultAggregator::new(ledger(config).await?))
}
