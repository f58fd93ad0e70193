use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Job priority. Each level maps to its own named queue; prioritization
/// comes from worker-count allocation, not queue reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Store key of the list backing this priority level.
    pub fn queue_key(&self) -> String {
        format!("jobs:{}", self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job, tracked in the in-memory status map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Retrying,
    Failed,
}

/// One unit of background work, as it travels through the queue store.
///
/// `final_error` and `failed_at` are only populated on the copy written to
/// the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// In-memory lifecycle record for a job, keyed by id. Never persisted in
/// the queue payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusRecord {
    pub job: Job,
    pub status: JobStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub final_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl JobStatusRecord {
    pub(crate) fn queued(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::Queued,
            queued_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_retry_at: None,
            last_error: None,
            final_error: None,
            processing_time_ms: None,
        }
    }
}

/// Acknowledgement returned to producers. Enqueue never waits on execution;
/// outcomes surface through [`JobQueue::job_status`](crate::JobQueue::job_status)
/// or the logs.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueuedJob {
    pub job_id: String,
    pub status: JobStatus,
}

/// A handler for one job type, invoked with the (possibly middleware-
/// transformed) payload.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, data: serde_json::Value, job: &Job) -> Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, data: serde_json::Value, _job: &Job) -> Result<()> {
        (self)(data).await
    }
}

/// A stage in the global middleware chain. Stages run in registration order
/// on every job; each receives the current payload and returns the next.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, job: &Job, data: serde_json::Value) -> Result<serde_json::Value>;
}
