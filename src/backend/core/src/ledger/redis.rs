//! Redis-backed ledger.
//!
//! Each record is a hash at `{prefix}:job:{id}` whose fields are the camelCase
//! metadata names and whose values are JSON-encoded, so a worker can update one
//! field with a single `HSET`. Job ids are indexed in the `{prefix}:jobs` set.
//! Blobs live at `{prefix}:input:{id}` and `{prefix}:output:{id}`.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{sort_by_dispatch, JobLedger};
use crate::error::{ErrorCode, RaptorError, Result};
use crate::jobs::{JobId, JobMetadata, JobMetadataPatch};
use crate::telemetry::SensitiveFieldRedactor;

const UPDATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
for i = 1, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
return 1
"#;

/// Ledger stored in Redis.
pub struct RedisLedger {
    connection: MultiplexedConnection,
    key_prefix: String,
    update_script: redis::Script,
}

impl RedisLedger {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let redacted = SensitiveFieldRedactor::global().redact_url(url);

        let client = redis::Client::open(url).map_err(|e| {
            RaptorError::with_internal(
                ErrorCode::InvalidConfiguration,
                "Invalid ledger URL",
                format!("{}: {}", redacted, e),
            )
        })?;
        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            RaptorError::with_internal(
                ErrorCode::LedgerConnectionFailed,
                "Failed to connect to job ledger",
                format!("{}: {}", redacted, e),
            )
        })?;

        info!(url = %redacted, "Connected to job ledger");
        Ok(Self::from_connection(connection, key_prefix))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
            update_script: redis::Script::new(UPDATE_SCRIPT),
        }
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, job_id)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs", self.key_prefix)
    }

    fn blob_key(&self, kind: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, kind, id)
    }

    async fn store_blob(&self, kind: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(self.blob_key(kind, &id))
            .arg(data)
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!(kind, blob_id = %id, bytes = data.len(), "Blob stored");
        Ok(id)
    }

    async fn get_blob(&self, kind: &str, id: &str) -> Result<Vec<u8>> {
        let mut conn = self.connection.clone();
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.blob_key(kind, id))
            .query_async(&mut conn)
            .await?;
        data.ok_or_else(|| RaptorError::blob_not_found(kind, id))
    }

    async fn read_record(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> Result<Option<JobMetadata>> {
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.job_key(job_id))
            .query_async(conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        decode_record(fields).map(Some)
    }
}

/// Encode patch fields as `(name, JSON text)` pairs for `HSET`.
fn encode_fields(fields: &JobMetadataPatch) -> Result<Vec<(String, String)>> {
    fields
        .fields()?
        .into_iter()
        .map(|(name, value)| Ok((name, serde_json::to_string(&value)?)))
        .collect()
}

/// Fields that always hold text.
const TEXT_FIELDS: [&str; 6] = ["jobId", "inputId", "outputId", "status", "error", "parentJobId"];

/// Rebuild a record from its hash.
///
/// Values that are not valid JSON are taken as plain strings, which tolerates
/// workers that write raw ids or statuses. A text field whose value parses as
/// some other JSON type (`20240101`, `true`, `null`) keeps its raw text.
fn decode_record(fields: HashMap<String, String>) -> Result<JobMetadata> {
    let object: Map<String, Value> = fields
        .into_iter()
        .map(|(name, raw)| {
            let value = match serde_json::from_str(&raw) {
                Ok(Value::String(text)) => Value::String(text),
                Ok(_) if TEXT_FIELDS.contains(&name.as_str()) => Value::String(raw),
                Ok(other) => other,
                Err(_) => Value::String(raw),
            };
            (name, value)
        })
        .collect();
    Ok(serde_json::from_value(Value::Object(object))?)
}

#[async_trait]
impl JobLedger for RedisLedger {
    async fn store_input_data(&self, data: &[u8]) -> Result<String> {
        self.store_blob("input", data).await
    }

    async fn get_input_data(&self, input_id: &str) -> Result<Vec<u8>> {
        self.get_blob("input", input_id).await
    }

    async fn store_output_data(&self, data: &[u8]) -> Result<String> {
        self.store_blob("output", data).await
    }

    async fn get_output_data(&self, output_id: &str) -> Result<Vec<u8>> {
        self.get_blob("output", output_id).await
    }

    #[instrument(skip(self, job_id, fields), fields(job_id = %job_id))]
    async fn create_job_metadata(
        &self,
        job_id: &JobId,
        input_id: &str,
        fields: JobMetadataPatch,
    ) -> Result<()> {
        let mut record = JobMetadata::new(job_id.clone(), input_id);
        record.apply(fields);
        let encoded: Vec<(String, String)> = match serde_json::to_value(&record)? {
            Value::Object(map) => map
                .into_iter()
                .map(|(name, value)| Ok((name, serde_json::to_string(&value)?)))
                .collect::<Result<_>>()?,
            _ => return Err(RaptorError::internal("job metadata did not serialize to an object")),
        };

        let key = self.job_key(job_id);
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg(encoded)
            .ignore()
            .cmd("SADD")
            .arg(self.index_key())
            .arg(job_id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!("Job metadata created");
        Ok(())
    }

    #[instrument(skip(self, job_id, fields), fields(job_id = %job_id))]
    async fn update_job_metadata(&self, job_id: &JobId, fields: JobMetadataPatch) -> Result<()> {
        let encoded = encode_fields(&fields)?;
        if encoded.is_empty() {
            return Ok(());
        }

        let mut invocation = self.update_script.key(self.job_key(job_id));
        for (name, value) in encoded {
            invocation.arg(name).arg(value);
        }

        let mut conn = self.connection.clone();
        let updated: i64 = invocation.invoke_async(&mut conn).await?;
        if updated == 0 {
            return Err(RaptorError::job_not_found(job_id));
        }

        debug!("Job metadata updated");
        Ok(())
    }

    async fn get_job_metadata(&self, job_id: &JobId) -> Result<JobMetadata> {
        let mut conn = self.connection.clone();
        self.read_record(&mut conn, job_id)
            .await?
            .ok_or_else(|| RaptorError::job_not_found(job_id))
    }

    async fn get_all_job_metadata(&self) -> Result<Vec<JobMetadata>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.index_key())
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids.into_iter().map(JobId::from) {
            match self.read_record(&mut conn, &id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(job_id = %id, "Indexed job has no record"),
                Err(e) => warn!(job_id = %id, error = %e, "Skipping unreadable job metadata"),
            }
        }

        sort_by_dispatch(&mut records);
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLedger")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use serde_json::json;

    #[test]
    fn test_decode_tolerates_raw_strings() {
        let fields = HashMap::from([
            ("jobId".to_string(), "\"p\"".to_string()),
            ("inputId".to_string(), "in-1".to_string()),
            ("status".to_string(), "completed".to_string()),
            ("sentAt".to_string(), "1700000000000".to_string()),
            ("childJobs".to_string(), "[\"p-SEQ1\"]".to_string()),
        ]);

        let record = decode_record(fields).unwrap();
        assert_eq!(record.job_id, JobId::from("p"));
        assert_eq!(record.input_id, "in-1");
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.sent_at, Some(1_700_000_000_000));
        assert_eq!(record.child_jobs, Some(vec![JobId::from("p-SEQ1")]));
    }

    fn record_with(extra: &[(&str, &str)]) -> Result<JobMetadata> {
        let mut fields = HashMap::from([
            ("jobId".to_string(), "\"j\"".to_string()),
            ("inputId".to_string(), "\"in\"".to_string()),
            ("status".to_string(), "\"completed\"".to_string()),
        ]);
        for (name, raw) in extra {
            fields.insert(name.to_string(), raw.to_string());
        }
        decode_record(fields)
    }

    #[test]
    fn test_decode_numeric_raw_text_fields() {
        let record = record_with(&[("outputId", "20240101"), ("error", "404")]).unwrap();
        assert_eq!(record.output_id.as_deref(), Some("20240101"));
        assert_eq!(record.error.as_deref(), Some("404"));
    }

    #[test]
    fn test_decode_boolean_and_null_raw_text_fields() {
        let record = record_with(&[("error", "null"), ("parentJobId", "true")]).unwrap();
        assert_eq!(record.error.as_deref(), Some("null"));
        assert_eq!(record.parent_job_id, Some(JobId::from("true")));

        let record = record_with(&[("jobId", "42"), ("inputId", "false")]).unwrap();
        assert_eq!(record.job_id, JobId::from("42"));
        assert_eq!(record.input_id, "false");
    }

    #[test]
    fn test_decode_keeps_typed_fields_typed() {
        let record = record_with(&[("receivedAt", "2000"), ("stats", r#"{"probability": 0.5}"#)]).unwrap();
        assert_eq!(record.received_at, Some(2_000));
        assert_eq!(record.stats.unwrap().probability, Some(0.5));
    }

    #[test]
    fn test_encode_fields_as_json_text() {
        let patch = JobMetadataPatch::new()
            .status(JobStatus::Orphaned)
            .child_jobs(vec![JobId::from("a")]);
        let mut encoded = encode_fields(&patch).unwrap();
        encoded.sort();

        assert_eq!(
            encoded,
            vec![
                ("childJobs".to_string(), json!(["a"]).to_string()),
                ("status".to_string(), "\"orphaned\"".to_string()),
            ]
        );
    }
}
