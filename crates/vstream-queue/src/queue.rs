//! Job queue using Redis Streams.

use std::collections::HashSet;
use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// How long an idempotency key blocks re-submission.
const DEDUP_TTL_SECS: u64 = 3600;
/// How long attempt counters outlive their message.
const ATTEMPTS_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries allowed before a job is dead-lettered
    pub max_attempts: u32,
    /// Idle time after which a delivered job is handed to another consumer
    pub lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vstream:jobs".to_string(),
            consumer_group: "vstream:workers".to_string(),
            dlq_stream_name: "vstream:dlq".to_string(),
            max_attempts: 1,
            lease: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            lease: std::env::var("QUEUE_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease),
        }
    }
}

fn dedup_key(idempotency_key: &str) -> String {
    format!("vstream:dedup:{}", idempotency_key)
}

fn attempts_key(message_id: &str) -> String {
    format!("vstream:attempts:{}", message_id)
}

/// Pending ids that may be claimed, leaving out jobs still running here.
fn claimable_ids(pending: impl IntoIterator<Item = String>, running: &HashSet<String>) -> Vec<String> {
    pending
        .into_iter()
        .filter(|id| !running.contains(id))
        .collect()
}

/// Decode the `job` field of a stream entry.
fn parse_entry(entry: &StreamId) -> Option<QueueResult<QueueJob>> {
    match entry.map.get("job") {
        Some(redis::Value::BulkString(payload)) => {
            Some(serde_json::from_slice(payload).map_err(QueueError::from))
        }
        Some(redis::Value::SimpleString(payload)) => {
            Some(serde_json::from_str(payload).map_err(QueueError::from))
        }
        _ => None,
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job, rejecting it if its idempotency key was seen recently.
    pub async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(dedup_key(&idempotency_key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = %job.job_id(),
            message_id = %message_id,
            "Enqueued job"
        );

        Ok(message_id)
    }

    /// Forget a job's idempotency key so it can be submitted again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(dedup_key(&job.idempotency_key())).await?;
        Ok(())
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(attempts_key(message_id)).await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(job_id = %job.job_id(), "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read up to `count` new jobs for `consumer_name`, blocking at most `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = result
            .map(|reply| reply.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        self.decode_entries(entries, "Consumed").await
    }

    /// Take over jobs whose lease expired.
    ///
    /// Ids in `running` belong to jobs this consumer is still executing and are
    /// never claimed, even when their lease looks expired.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
        running: &HashSet<String>,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let min_idle_ms = self.config.lease.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count + running.len())
            .query_async(&mut conn)
            .await?;

        let mut ids = claimable_ids(pending.ids.into_iter().map(|p| p.id), running);
        ids.truncate(count);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&ids);

        let result: StreamClaimReply = cmd.query_async(&mut conn).await?;

        self.decode_entries(result.ids, "Claimed pending").await
    }

    /// Reset the idle time of jobs this consumer is still running, so their
    /// lease never expires while they make progress.
    pub async fn refresh_leases(&self, consumer_name: &str, message_ids: &[String]) -> QueueResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_ids)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Refreshed {} job leases", message_ids.len());
        Ok(())
    }

    async fn decode_entries(
        &self,
        entries: Vec<StreamId>,
        action: &str,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut jobs = Vec::new();

        for entry in entries {
            match parse_entry(&entry) {
                Some(Ok(job)) => {
                    debug!(job_id = %job.job_id(), "{} job from stream", action);
                    jobs.push((entry.id, job));
                }
                Some(Err(e)) => {
                    warn!("Failed to parse job payload {}: {}", entry.id, e);
                    self.ack(&entry.id).await.ok();
                }
                None => {
                    warn!("Stream entry {} has no job payload", entry.id);
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        Ok(jobs)
    }

    /// Get the delivery attempts recorded for a message.
    pub async fn attempts(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: Option<u32> = conn.get(attempts_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Record one more failed attempt for a message.
    pub async fn increment_attempts(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = attempts_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, ATTEMPTS_TTL_SECS).await?;
        Ok(count)
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "vstream:jobs");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.lease, Duration::from_secs(600));
    }

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(dedup_key("transcode:a"), "vstream:dedup:transcode:a");
        assert_eq!(attempts_key("1-0"), "vstream:attempts:1-0");
    }

    #[test]
    fn test_parse_entry() {
        let payload = r#"{"type":"transcode","job_id":"j1","input_path":"/in/v.mp4","input_dir":"/in","output_dir":"/out","original_filename":"v.mp4","created_at":"2024-01-01T00:00:00Z"}"#;
        let mut map = HashMap::new();
        map.insert(
            "job".to_string(),
            redis::Value::BulkString(payload.as_bytes().to_vec()),
        );
        let entry = StreamId {
            id: "1-0".to_string(),
            map,
        };

        let job = parse_entry(&entry).unwrap().unwrap();
        assert_eq!(job.job_id().as_str(), "j1");

        let empty = StreamId {
            id: "2-0".to_string(),
            map: HashMap::new(),
        };
        assert!(parse_entry(&empty).is_none());
    }

    #[test]
    fn test_claimable_ids_skip_running_jobs() {
        let running: HashSet<String> = ["2-0".to_string()].into_iter().collect();
        let pending = vec!["1-0".to_string(), "2-0".to_string(), "3-0".to_string()];

        assert_eq!(claimable_ids(pending, &running), vec!["1-0", "3-0"]);
        assert!(claimable_ids(vec!["2-0".to_string()], &running).is_empty());
    }

    #[test]
    fn test_parse_entry_rejects_garbage() {
        let mut map = HashMap::new();
        map.insert(
            "job".to_string(),
            redis::Value::BulkString(b"{not json".to_vec()),
        );
        let entry = StreamId {
            id: "1-0".to_string(),
            map,
        };
        assert!(matches!(parse_entry(&entry), Some(Err(QueueError::Json(_)))));
    }
}
