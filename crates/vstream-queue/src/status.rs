//! Per-job status records stored as Redis hashes.
//!
//! Each job owns one hash at `vstream:status:<job_id>`. Writers only touch the
//! fields they change, and a write is applied only when the record's current
//! status may move to the written one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::debug;
use vstream_models::{JobId, JobStatus, RungUrl, StatusRecord};

use crate::error::{QueueError, QueueResult};

/// Key prefix of status hashes.
pub const STATUS_KEY_PREFIX: &str = "vstream:status:";

const FIELD_STATUS: &str = "status";
const FIELD_PROGRESS: &str = "progress";
const FIELD_ERROR: &str = "error";
const FIELD_MASTER_URL: &str = "masterUrl";
const FIELD_URLS: &str = "urls";
const FIELD_CREATED_AT: &str = "createdAt";

/// Readable, writable store of [`StatusRecord`]s keyed by job id.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write a complete record, replacing any previous one.
    async fn create(&self, job_id: &JobId, record: &StatusRecord) -> QueueResult<()>;

    /// Move to a non-terminal milestone, updating progress alongside.
    ///
    /// This and the other writes below fail with
    /// [`QueueError::RejectedTransition`] when the record is missing or its
    /// current status cannot move to the written one.
    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()>;

    /// Mark completed with the master URL and per-rung URLs in one write.
    async fn complete(&self, job_id: &JobId, master_url: &str, urls: &[RungUrl])
        -> QueueResult<()>;

    /// Mark failed. Progress is left at its last milestone.
    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Read the current record, if any.
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<StatusRecord>>;
}

pub fn status_key(job_id: &JobId) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, job_id)
}

/// Hash fields of a full record.
fn record_fields(record: &StatusRecord) -> QueueResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        (FIELD_STATUS, record.status.as_str().to_string()),
        (FIELD_PROGRESS, record.progress.to_string()),
        (FIELD_ERROR, record.error.clone()),
        (FIELD_URLS, serde_json::to_string(&record.urls)?),
        (FIELD_CREATED_AT, record.created_at.to_rfc3339()),
    ];
    if let Some(master_url) = &record.master_url {
        fields.push((FIELD_MASTER_URL, master_url.clone()));
    }
    Ok(fields)
}

/// Rebuild a record from its hash. An empty hash means no record.
fn record_from_fields(fields: HashMap<String, String>) -> QueueResult<Option<StatusRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| fields.get(name).map(String::as_str);

    let status = field(FIELD_STATUS)
        .and_then(JobStatus::parse)
        .ok_or_else(|| QueueError::invalid_record("missing or unknown status"))?;

    let progress = match field(FIELD_PROGRESS) {
        Some(p) => p
            .parse::<u8>()
            .map_err(|_| QueueError::invalid_record(format!("bad progress: {}", p)))?,
        None => 0,
    };

    let urls = match field(FIELD_URLS) {
        Some(u) if !u.is_empty() => serde_json::from_str(u)?,
        _ => Vec::new(),
    };

    let created_at = field(FIELD_CREATED_AT)
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|c| c.with_timezone(&Utc))
        .ok_or_else(|| QueueError::invalid_record("missing or malformed createdAt"))?;

    Ok(Some(StatusRecord {
        status,
        progress,
        error: field(FIELD_ERROR).unwrap_or_default().to_string(),
        master_url: field(FIELD_MASTER_URL)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
        urls,
        created_at,
    }))
}

/// Statuses a record may hold for a write of `next` to be accepted.
fn allowed_sources(next: JobStatus) -> Vec<JobStatus> {
    JobStatus::PIPELINE
        .iter()
        .chain(std::iter::once(&JobStatus::Error))
        .copied()
        .filter(|current| current.can_transition_to(next))
        .collect()
}

/// Check-and-set of a status write.
///
/// KEYS[1] is the hash, ARGV[1] the comma-separated statuses the write may
/// start from, ARGV[2] is `1` when `masterUrl` must be dropped, and the rest are
/// field/value pairs. Returns nil when applied, otherwise the current status
/// (empty when there is no record).
const GUARDED_WRITE: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return ''
end
local allowed = false
for status in string.gmatch(ARGV[1], '[^,]+') do
  if status == current then
    allowed = true
  end
end
if not allowed then
  return current
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
if ARGV[2] == '1' then
  redis.call('HDEL', KEYS[1], 'masterUrl')
end
return false
"#;

/// [`StatusStore`] backed by Redis hashes.
///
/// Every write after `create` is checked against the current status inside
/// Redis, so a stale or duplicate writer can never move a record backwards or
/// out of a terminal state.
#[derive(Clone)]
pub struct RedisStatusStore {
    client: redis::Client,
    guarded_write: redis::Script,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            guarded_write: redis::Script::new(GUARDED_WRITE),
        })
    }

    async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        fields: &[(&str, String)],
        clear_master_url: bool,
    ) -> QueueResult<()> {
        let sources = allowed_sources(next)
            .iter()
            .map(JobStatus::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut invocation = self.guarded_write.key(status_key(job_id));
        invocation
            .arg(sources)
            .arg(if clear_master_url { "1" } else { "0" });
        for (name, value) in fields {
            invocation.arg(*name).arg(value);
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let rejected: Option<String> = invocation.invoke_async(&mut conn).await?;

        match rejected {
            None => Ok(()),
            Some(current) => {
                let from = (!current.is_empty()).then_some(current.as_str());
                debug!(job_id = %job_id, from = ?from, to = %next, "Rejected status write");
                Err(QueueError::rejected_transition(from, next.as_str()))
            }
        }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn create(&self, job_id: &JobId, record: &StatusRecord) -> QueueResult<()> {
        let key = status_key(job_id);
        let fields = record_fields(record)?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job_id, "Created status record");
        Ok(())
    }

    async fn set_status(&self, job_id: &JobId, status: JobStatus) -> QueueResult<()> {
        let mut fields = vec![(FIELD_STATUS, status.as_str().to_string())];
        if let Some(progress) = status.progress() {
            fields.push((FIELD_PROGRESS, progress.to_string()));
        }
        self.transition(job_id, status, &fields, false).await
    }

    async fn complete(
        &self,
        job_id: &JobId,
        master_url: &str,
        urls: &[RungUrl],
    ) -> QueueResult<()> {
        let fields = [
            (FIELD_STATUS, JobStatus::Completed.as_str().to_string()),
            (FIELD_PROGRESS, "100".to_string()),
            (FIELD_ERROR, String::new()),
            (FIELD_MASTER_URL, master_url.to_string()),
            (FIELD_URLS, serde_json::to_string(urls)?),
        ];
        self.transition(job_id, JobStatus::Completed, &fields, false)
            .await
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let fields = [
            (FIELD_STATUS, JobStatus::Error.as_str().to_string()),
            (FIELD_ERROR, error.to_string()),
            (FIELD_URLS, "[]".to_string()),
        ];
        self.transition(job_id, JobStatus::Error, &fields, true).await
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<StatusRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(status_key(job_id)).await?;
        record_from_fields(fields)
    }
}
