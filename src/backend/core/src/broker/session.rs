//! A provisioned broker handle shared by the dispatcher.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Broker, Lane, PublishOptions};
use crate::config::{LaneConfig, LanesConfig};
use crate::error::{RaptorError, Result};
use crate::telemetry::metrics;

/// A broker whose three lanes have been provisioned.
pub struct BrokerSession {
    broker: Arc<dyn Broker>,
    lanes: LanesConfig,
}

impl BrokerSession {
    /// Provision every lane on `broker`.
    ///
    /// # Errors
    ///
    /// Any provisioning failure is returned as `LaneProvisioningFailed`; the
    /// caller should treat it as fatal.
    pub async fn open(broker: Arc<dyn Broker>, lanes: LanesConfig) -> Result<Self> {
        for lane in Lane::all() {
            let config = lane.config(&lanes);
            broker.setup_queue(config).await.map_err(|e| {
                error!(lane = %lane, exchange = %config.exchange.name, error = %e, "Failed to provision lane");
                RaptorError::lane_provisioning(&config.exchange.name, e.to_string()).with_source(e)
            })?;
            debug!(lane = %lane, queue = %config.name, "Lane provisioned");
        }

        info!("Broker session opened");
        Ok(Self { broker, lanes })
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn lanes(&self) -> &LanesConfig {
        &self.lanes
    }

    pub fn lane_config(&self, lane: Lane) -> &LaneConfig {
        lane.config(&self.lanes)
    }

    /// Publish a persistent message to `lane`.
    ///
    /// # Errors
    ///
    /// `BrokerUnavailable` if the lane's exchange is missing or the publish is
    /// rejected.
    pub async fn publish(&self, lane: Lane, body: &[u8]) -> Result<()> {
        let exchange = &self.lane_config(lane).exchange;

        let outcome = match self.broker.check_exchange(&exchange.name).await {
            Ok(()) => {
                self.broker
                    .publish(&exchange.name, &exchange.routing_key, body, PublishOptions::persistent())
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                metrics::record_job_dispatched(lane.as_str());
                Ok(())
            }
            Err(e) => {
                metrics::record_publish_failure(lane.as_str());
                warn!(lane = %lane, exchange = %exchange.name, error = %e, "Publish failed");
                Err(RaptorError::broker_unavailable(&exchange.name, e.to_string()).with_source(e))
            }
        }
    }

    /// Delete every lane exchange, then close the channel and the connection.
    ///
    /// Each step runs even if an earlier one failed.
    ///
    /// # Errors
    ///
    /// `ShutdownFailed` listing every step that failed.
    pub async fn shutdown(&self) -> Result<()> {
        let mut failures = Vec::new();

        for lane in Lane::all() {
            let exchange = &self.lane_config(lane).exchange.name;
            if let Err(e) = self.broker.delete_exchange(exchange).await {
                error!(exchange = %exchange, error = %e, "Failed to delete exchange");
                failures.push(format!("Failed to delete {}: {}", exchange, e));
            }
        }

        failures.extend(self.close().await);

        if failures.is_empty() {
            info!("Broker session shut down");
            Ok(())
        } else {
            Err(RaptorError::shutdown_failed(failures))
        }
    }

    /// Close the channel and the connection, leaving the exchanges in place.
    pub async fn disconnect(&self) -> Result<()> {
        let failures = self.close().await;
        if failures.is_empty() {
            debug!("Broker session disconnected");
            Ok(())
        } else {
            Err(RaptorError::shutdown_failed(failures))
        }
    }

    async fn close(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if let Err(e) = self.broker.close_channel().await {
            failures.push(format!("Failed to close channel: {}", e));
        }
        if let Err(e) = self.broker.close_connection().await {
            failures.push(format!("Failed to close connection: {}", e));
        }
        failures
    }
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession")
            .field("lanes", &self.lanes)
            .finish_non_exhaustive()
    }
}
