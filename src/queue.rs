use crate::breaker::BreakerRegistry;
use crate::config::{JobConfig, JobOptions};
use crate::error::Result;
use crate::job::{
    EnqueuedJob, Job, JobHandler, JobStatus, JobStatusRecord, Middleware, Priority,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Priority-queue job engine: enqueue/dequeue orchestration, weighted
/// worker pools, retry with capped exponential backoff, per-job-type
/// circuit breaking, dead-letter handling, and graceful shutdown.
///
/// Cheap to clone (all state behind one `Arc`). Construct once at process
/// start, call [`start`](Self::start), and hand clones to producers.
#[derive(Clone)]
pub struct JobQueue {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) config: JobConfig,
    pub(crate) handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    pub(crate) middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    pub(crate) statuses: DashMap<String, JobStatusRecord>,
    pub(crate) breakers: BreakerRegistry,
    pub(crate) metrics: Metrics,
    pub(crate) shutting_down: AtomicBool,
}

impl JobQueue {
    pub fn new<S: QueueStore + 'static>(store: S, config: JobConfig) -> Self {
        let breakers = BreakerRegistry::new(config.breaker.clone());
        Self {
            inner: Arc::new(Inner {
                store: Arc::new(store),
                config,
                handlers: RwLock::new(HashMap::new()),
                middleware: RwLock::new(Vec::new()),
                statuses: DashMap::new(),
                breakers,
                metrics: Metrics::default(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Verify store connectivity and spawn the background loops: the
    /// priority worker pools, the dead-letter drainer, the cleanup worker,
    /// and the metrics collector.
    pub async fn start(&self) -> Result<()> {
        self.inner.store.ping().await?;
        tracing::info!("job queue store connected");

        for priority in self.inner.config.priority_queues.clone() {
            self.inner.metrics.set_queue_length(priority, 0);
            let workers = self.inner.config.workers_for(priority);
            for _ in 0..workers {
                let queue = self.clone();
                tokio::spawn(async move { queue.worker_loop(priority).await });
            }
            tracing::info!(priority = %priority, workers, "started workers");
        }

        let queue = self.clone();
        tokio::spawn(async move { queue.dead_letter_loop().await });
        let queue = self.clone();
        tokio::spawn(async move { queue.cleanup_loop().await });
        let queue = self.clone();
        tokio::spawn(async move { queue.metrics_loop().await });

        tracing::info!("job queue started");
        Ok(())
    }

    /// Enqueue a job for background processing. Returns as soon as the job
    /// is recorded; the outcome surfaces via [`job_status`](Self::job_status)
    /// or the logs, never through this call.
    ///
    /// A `delay` defers the write to the store; the job becomes visible to
    /// workers only once the delay elapses.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<EnqueuedJob> {
        let config = &self.inner.config;
        let job = Job {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            data,
            priority: options.priority.unwrap_or(Priority::Normal),
            retries: 0,
            max_retries: options.max_retries.unwrap_or(config.default_retries),
            timeout: options.timeout.unwrap_or(config.default_timeout),
            delay: options.delay.unwrap_or(Duration::ZERO),
            created_at: Utc::now(),
            final_error: None,
            failed_at: None,
        };

        self.inner
            .statuses
            .insert(job.id.clone(), JobStatusRecord::queued(job.clone()));

        if job.delay.is_zero() {
            self.push_job(&job).await?;
        } else {
            let queue = self.clone();
            let delayed = job.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delayed.delay).await;
                if let Err(e) = queue.push_job(&delayed).await {
                    tracing::error!(job_id = %delayed.id, error = %e, "delayed enqueue failed");
                }
            });
        }

        tracing::debug!(job_id = %job.id, priority = %job.priority, "job enqueued");
        Ok(EnqueuedJob {
            job_id: job.id,
            status: JobStatus::Queued,
        })
    }

    /// Execute a handler out of band: no queue persistence, and no retry
    /// unless explicitly requested through `options` (`max_retries` defaults
    /// to 0 here). Failures are logged and recorded in the status map,
    /// never returned to the caller.
    pub fn fire_and_forget<H>(
        &self,
        handler: H,
        data: serde_json::Value,
        options: JobOptions,
    ) -> EnqueuedJob
    where
        H: JobHandler + 'static,
    {
        let config = &self.inner.config;
        let job = Job {
            id: Uuid::new_v4().to_string(),
            job_type: "fire-and-forget".to_string(),
            data,
            priority: options.priority.unwrap_or(Priority::Normal),
            retries: 0,
            max_retries: options.max_retries.unwrap_or(0),
            timeout: options.timeout.unwrap_or(config.default_timeout),
            delay: Duration::ZERO,
            created_at: Utc::now(),
            final_error: None,
            failed_at: None,
        };

        self.inner
            .statuses
            .insert(job.id.clone(), JobStatusRecord::queued(job.clone()));

        let job_id = job.id.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        let queue = self.clone();
        tokio::spawn(async move { queue.run_detached(job, handler).await });

        EnqueuedJob {
            job_id,
            status: JobStatus::Queued,
        }
    }

    /// Serialize and write a job to its priority queue, bumping the
    /// optimistic queue-length gauge.
    pub(crate) async fn push_job(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        self.inner
            .store
            .push_head(&job.priority.queue_key(), payload)
            .await?;
        self.inner.metrics.incr_queue_length(job.priority);
        Ok(())
    }

    /// Pop one job from the tail of the named priority queue; `None` when
    /// the queue is empty. Callers poll with backoff.
    pub(crate) async fn dequeue(&self, priority: Priority) -> Result<Option<Job>> {
        let Some(payload) = self.inner.store.pop_tail(&priority.queue_key()).await? else {
            return Ok(None);
        };
        self.inner.metrics.decr_queue_length(priority);
        let job = serde_json::from_str(&payload)?;
        Ok(Some(job))
    }

    /// Register the handler for a job type. One handler per type; the last
    /// registration wins.
    pub async fn register_handler<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        self.inner
            .handlers
            .write()
            .await
            .insert(job_type.clone(), Arc::new(handler));
        tracing::info!(job_type = %job_type, "registered job handler");
    }

    /// Append a middleware stage to the global chain applied to every job.
    pub async fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.inner.middleware.write().await.push(Arc::new(middleware));
    }

    /// Current lifecycle record for a job, or `None` once the cleanup
    /// worker has evicted it.
    pub fn job_status(&self, job_id: &str) -> Option<JobStatusRecord> {
        self.inner.statuses.get(job_id).map(|r| r.clone())
    }

    pub async fn health(&self) -> Health {
        let store_ok = self.inner.store.ping().await.is_ok();
        Health {
            status: if store_ok { "healthy" } else { "unhealthy" },
            timestamp: Utc::now(),
            store: if store_ok { "connected" } else { "disconnected" },
            active_jobs: self.inner.statuses.len(),
            circuit_breakers: self.inner.breakers.len(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// Stop producing new work and wait for in-flight jobs, bounded by
    /// `shutdown_timeout`. Poll loops exit after their current iteration.
    ///
    /// If jobs are still processing when the deadline fires, the process is
    /// force-exited with status 1.
    pub async fn shutdown(&self) {
        tracing::info!("job queue shutting down");
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let drain = async {
            loop {
                let processing = self
                    .inner
                    .statuses
                    .iter()
                    .filter(|r| r.status == JobStatus::Processing)
                    .count();
                if processing == 0 {
                    break;
                }
                tracing::info!(processing, "waiting for in-flight jobs");
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        };

        if tokio::time::timeout(self.inner.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            tracing::warn!("shutdown timeout reached, forcing exit");
            std::process::exit(1);
        }

        if let Err(e) = self.inner.store.close().await {
            tracing::error!(error = %e, "failed to close store");
        }
        tracing::info!("job queue shutdown complete");
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }
}

/// Service health report.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub store: &'static str,
    pub active_jobs: usize,
    pub circuit_breakers: usize,
    pub metrics: MetricsSnapshot,
}
