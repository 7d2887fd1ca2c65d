//! Redis-backed broker.
//!
//! Exchanges, bindings and queues are emulated with plain Redis structures
//! under a namespace:
//!
//! | key                           | type | contents                         |
//! |-------------------------------|------|----------------------------------|
//! | `{ns}:exchanges`              | hash | exchange name -> declaration     |
//! | `{ns}:bindings:{exchange}`    | hash | binding key -> queue name        |
//! | `{ns}:queues`                 | hash | queue name -> declaration        |
//! | `{ns}:queue-maxlen`           | hash | queue name -> max length         |
//! | `{ns}:queue:{queue}`          | list | message envelopes, oldest first  |
//!
//! Routing, enqueue and max-length trimming run in one Lua script so a publish
//! is atomic with respect to concurrent publishers and exchange deletion.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

use super::{Broker, PublishOptions};
use crate::config::{ExchangeConfig, LaneConfig};
use crate::error::{ErrorCode, RaptorError, Result};
use crate::jobs::now_millis;
use crate::telemetry::SensitiveFieldRedactor;

const PUBLISH_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return redis.error_reply('NOEXCHANGE ' .. ARGV[1])
end
local queue = redis.call('HGET', KEYS[2], ARGV[2])
if not queue then
  return 0
end
local list = ARGV[4] .. queue
local len = redis.call('RPUSH', list, ARGV[3])
local max = tonumber(redis.call('HGET', KEYS[3], queue))
if max and max > 0 and len > max then
  redis.call('LTRIM', list, len - max, -1)
end
return 1
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeDeclaration<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    durable: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueDeclaration<'a> {
    durable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefetch: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dead_letter_exchange: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dead_letter_routing_key: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    persistent: bool,
    published_at: i64,
    body: &'a str,
}

/// Broker emulated on Redis hashes and lists.
pub struct RedisBroker {
    namespace: String,
    connection: RwLock<Option<MultiplexedConnection>>,
    channel_open: AtomicBool,
    publish_script: redis::Script,
}

impl RedisBroker {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let redacted = SensitiveFieldRedactor::global().redact_url(url);

        let client = redis::Client::open(url).map_err(|e| {
            RaptorError::with_internal(
                ErrorCode::InvalidConfiguration,
                "Invalid broker URL",
                format!("{}: {}", redacted, e),
            )
        })?;
        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            RaptorError::with_internal(
                ErrorCode::BrokerConnectionFailed,
                "Failed to connect to broker",
                format!("{}: {}", redacted, e),
            )
        })?;

        info!(url = %redacted, "Connected to broker");
        Ok(Self::from_connection(connection, namespace))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            connection: RwLock::new(Some(connection)),
            channel_open: AtomicBool::new(true),
            publish_script: redis::Script::new(PUBLISH_SCRIPT),
        }
    }

    fn exchanges_key(&self) -> String {
        format!("{}:exchanges", self.namespace)
    }

    fn bindings_key(&self, exchange: &str) -> String {
        format!("{}:bindings:{}", self.namespace, exchange)
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.namespace)
    }

    fn maxlen_key(&self) -> String {
        format!("{}:queue-maxlen", self.namespace)
    }

    fn queue_prefix(&self) -> String {
        format!("{}:queue:", self.namespace)
    }

    fn get_conn(&self) -> Result<MultiplexedConnection> {
        if !self.channel_open.load(Ordering::Acquire) {
            return Err(RaptorError::broker("channel is closed"));
        }
        self.connection.read().clone().ok_or_else(|| {
            RaptorError::with_internal(
                ErrorCode::BrokerConnectionFailed,
                "Broker connection is closed",
                self.namespace.clone(),
            )
        })
    }

    fn declare_exchange(pipe: &mut redis::Pipeline, key: &str, exchange: &ExchangeConfig) -> Result<()> {
        let declaration = serde_json::to_string(&ExchangeDeclaration {
            kind: &exchange.kind,
            durable: exchange.durable,
        })?;
        pipe.cmd("HSET").arg(key).arg(&exchange.name).arg(declaration).ignore();
        Ok(())
    }
}

fn redis_failure(action: &'static str) -> impl FnOnce(redis::RedisError) -> RaptorError {
    move |e| {
        let code = if e.is_connection_dropped() || e.is_connection_refusal() {
            ErrorCode::BrokerConnectionFailed
        } else {
            ErrorCode::BrokerError
        };
        RaptorError::with_internal(code, action, e.to_string())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    #[instrument(skip(self, lane), fields(queue = %lane.name, exchange = %lane.exchange.name))]
    async fn setup_queue(&self, lane: &LaneConfig) -> Result<()> {
        let mut conn = self.get_conn()?;
        let dead_letter = &lane.dead_letter;

        let queue = serde_json::to_string(&QueueDeclaration {
            durable: lane.durable,
            message_ttl: Some(lane.message_ttl),
            prefetch: Some(lane.prefetch),
            dead_letter_exchange: Some(&dead_letter.exchange.name),
            dead_letter_routing_key: Some(&dead_letter.exchange.routing_key),
        })?;
        let dead_letter_queue = serde_json::to_string(&QueueDeclaration {
            durable: dead_letter.durable,
            message_ttl: None,
            prefetch: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        })?;

        let exchanges = self.exchanges_key();
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::declare_exchange(&mut pipe, &exchanges, &lane.exchange)?;
        Self::declare_exchange(&mut pipe, &exchanges, &dead_letter.exchange)?;
        pipe.cmd("HSET")
            .arg(self.bindings_key(&lane.exchange.name))
            .arg(&lane.exchange.binding_key)
            .arg(&lane.name)
            .ignore()
            .cmd("HSET")
            .arg(self.bindings_key(&dead_letter.exchange.name))
            .arg(&dead_letter.exchange.binding_key)
            .arg(&dead_letter.name)
            .ignore()
            .cmd("HSET")
            .arg(self.queues_key())
            .arg(&lane.name)
            .arg(queue)
            .arg(&dead_letter.name)
            .arg(dead_letter_queue)
            .ignore()
            .cmd("HSET")
            .arg(self.maxlen_key())
            .arg(&lane.name)
            .arg(lane.max_length)
            .ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_failure("Failed to declare lane"))?;

        debug!("Lane declared");
        Ok(())
    }

    async fn check_exchange(&self, exchange: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        let exists: bool = redis::cmd("HEXISTS")
            .arg(self.exchanges_key())
            .arg(exchange)
            .query_async(&mut conn)
            .await
            .map_err(redis_failure("Failed to check exchange"))?;

        if exists {
            Ok(())
        } else {
            Err(RaptorError::broker(format!("exchange {} not found", exchange)))
        }
    }

    #[instrument(skip(self, body, options), fields(bytes = body.len()))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;

        let body = std::str::from_utf8(body)
            .map_err(|e| RaptorError::broker(format!("message body is not UTF-8: {}", e)))?;
        let envelope = serde_json::to_string(&Envelope {
            exchange,
            routing_key,
            persistent: options.persistent,
            published_at: now_millis(),
            body,
        })?;

        let routed: i64 = self
            .publish_script
            .key(self.exchanges_key())
            .key(self.bindings_key(exchange))
            .key(self.maxlen_key())
            .arg(exchange)
            .arg(routing_key)
            .arg(envelope)
            .arg(self.queue_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_failure("Failed to publish message"))?;

        if routed == 0 {
            warn!("Message was unroutable and has been dropped");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_exchange(&self, exchange: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(self.exchanges_key())
            .arg(exchange)
            .ignore()
            .cmd("DEL")
            .arg(self.bindings_key(exchange))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_failure("Failed to delete exchange"))?;

        debug!("Exchange deleted");
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        let mut conn = self.get_conn()?;
        redis::cmd("LLEN")
            .arg(format!("{}{}", self.queue_prefix(), queue))
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(redis_failure("Failed to read queue length"))
    }

    async fn close_channel(&self) -> Result<()> {
        self.channel_open.store(false, Ordering::Release);
        Ok(())
    }

    async fn close_connection(&self) -> Result<()> {
        // Dropping the last handle closes the multiplexed connection.
        self.connection.write().take();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(redis_failure("Broker ping failed"))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("namespace", &self.namespace)
            .field("channel_open", &self.channel_open.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
