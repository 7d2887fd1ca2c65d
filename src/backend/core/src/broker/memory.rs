//! In-process broker for tests and local development.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{Broker, PublishOptions};
use crate::config::{ExchangeConfig, LaneConfig};
use crate::error::{RaptorError, Result};

/// A message as it was handed to [`Broker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
}

impl PublishedMessage {
    /// Decode the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Default)]
struct Exchange {
    /// binding key -> queue
    bindings: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<PublishedMessage>,
    max_length: u64,
}

#[derive(Debug)]
struct State {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    published: Vec<PublishedMessage>,
    fail_publishes_after: Option<usize>,
    failing_deletes: HashSet<String>,
    fail_setup: bool,
    channel_open: bool,
    connection_open: bool,
}

/// Broker that keeps exchanges and queues in memory and records every publish.
///
/// Failures can be injected to exercise the dispatcher's error paths.
#[derive(Debug)]
pub struct InMemoryBroker {
    state: RwLock<State>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                exchanges: HashMap::new(),
                queues: HashMap::new(),
                published: Vec::new(),
                fail_publishes_after: None,
                failing_deletes: HashSet::new(),
                fail_setup: false,
                channel_open: true,
                connection_open: true,
            }),
        }
    }

    /// Every successfully published message, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.read().published.clone()
    }

    /// Messages currently waiting in `queue`.
    pub fn queued_messages(&self, queue: &str) -> Vec<PublishedMessage> {
        self.state
            .read()
            .queues
            .get(queue)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.read().exchanges.contains_key(name)
    }

    pub fn exchange_count(&self) -> usize {
        self.state.read().exchanges.len()
    }

    /// Drop an exchange as if it had been deleted out of band.
    pub fn remove_exchange(&self, name: &str) {
        self.state.write().exchanges.remove(name);
    }

    /// Reject every publish once `count` messages have been published.
    pub fn fail_publishes_after(&self, count: usize) {
        self.state.write().fail_publishes_after = Some(count);
    }

    /// Make `delete_exchange(name)` fail.
    pub fn fail_exchange_deletion(&self, name: &str) {
        self.state.write().failing_deletes.insert(name.to_string());
    }

    /// Make `setup_queue` fail.
    pub fn fail_setup(&self) {
        self.state.write().fail_setup = true;
    }

    /// Whether both the channel and the connection have been closed.
    pub fn is_closed(&self) -> bool {
        let state = self.state.read();
        !state.channel_open && !state.connection_open
    }

    fn declare(state: &mut State, exchange: &ExchangeConfig, queue: &str, max_length: u64) {
        state
            .exchanges
            .entry(exchange.name.clone())
            .or_default()
            .bindings
            .insert(exchange.binding_key.clone(), queue.to_string());
        state.queues.entry(queue.to_string()).or_default().max_length = max_length;
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn setup_queue(&self, lane: &LaneConfig) -> Result<()> {
        let mut state = self.state.write();
        if state.fail_setup {
            return Err(RaptorError::broker("injected setup failure"));
        }
        Self::declare(&mut state, &lane.exchange, &lane.name, lane.max_length);
        Self::declare(&mut state, &lane.dead_letter.exchange, &lane.dead_letter.name, 0);
        Ok(())
    }

    async fn check_exchange(&self, exchange: &str) -> Result<()> {
        if self.has_exchange(exchange) {
            Ok(())
        } else {
            Err(RaptorError::broker(format!("exchange {} not found", exchange)))
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> Result<()> {
        let mut state = self.state.write();
        if !state.channel_open {
            return Err(RaptorError::broker("channel is closed"));
        }
        if let Some(limit) = state.fail_publishes_after {
            if state.published.len() >= limit {
                return Err(RaptorError::broker("injected publish failure"));
            }
        }

        let queue_name = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| RaptorError::broker(format!("exchange {} not found", exchange)))?
            .bindings
            .get(routing_key)
            .cloned();

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            persistent: options.persistent,
        };

        if let Some(name) = queue_name {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.messages.push_back(message.clone());
                if queue.max_length > 0 {
                    while queue.messages.len() as u64 > queue.max_length {
                        queue.messages.pop_front();
                    }
                }
            }
        }

        state.published.push(message);
        Ok(())
    }

    async fn delete_exchange(&self, exchange: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.failing_deletes.contains(exchange) {
            return Err(RaptorError::broker(format!(
                "injected failure deleting {}",
                exchange
            )));
        }
        state.exchanges.remove(exchange);
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        Ok(self
            .state
            .read()
            .queues
            .get(queue)
            .map(|q| q.messages.len() as u64)
            .unwrap_or(0))
    }

    async fn close_channel(&self) -> Result<()> {
        self.state.write().channel_open = false;
        Ok(())
    }

    async fn close_connection(&self) -> Result<()> {
        self.state.write().connection_open = false;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.state.read().connection_open {
            Ok(())
        } else {
            Err(RaptorError::broker("connection is closed"))
        }
    }
}
