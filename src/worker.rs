use crate::error::{JobError, Result};
use crate::job::{Job, JobHandler, JobStatus, JobStatusRecord, Priority};
use crate::queue::JobQueue;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

impl JobQueue {
    /// Long-lived poll loop for one priority queue: dequeue, execute
    /// in-loop, sleep when idle, back off longer on poll errors. Only exits
    /// on shutdown.
    pub(crate) async fn worker_loop(&self, priority: Priority) {
        while !self.is_shutting_down() {
            match self.dequeue(priority).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => tokio::time::sleep(self.inner.config.poll_interval).await,
                Err(e) => {
                    tracing::error!(priority = %priority, error = %e, "worker poll error");
                    tokio::time::sleep(self.inner.config.error_backoff).await;
                }
            }
        }
        tracing::debug!(priority = %priority, "worker stopped");
    }

    /// One execution attempt: mark processing, gate on the circuit breaker
    /// (an open breaker fails the attempt without touching the handler),
    /// then run the handler and settle the outcome.
    pub(crate) async fn process_job(&self, job: Job) {
        let started = Instant::now();
        self.mark_processing(&job);

        if self.inner.breakers.is_open(&job.job_type) {
            let error = JobError::CircuitOpen(job.job_type.clone());
            self.handle_job_failure(job, error, started).await;
            return;
        }

        match self.execute_job(&job).await {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.inner.metrics.record_processed(elapsed_ms);
                self.inner.breakers.record_success(&job.job_type);
                self.mark_completed(&job.id, elapsed_ms);
                tracing::debug!(job_id = %job.id, elapsed_ms, "job completed");
            }
            Err(e) => self.handle_job_failure(job, e, started).await,
        }
    }

    /// Handler lookup, middleware fold, then the handler raced against the
    /// job's timeout.
    pub(crate) async fn execute_job(&self, job: &Job) -> Result<()> {
        let handler = {
            let handlers = self.inner.handlers.read().await;
            handlers
                .get(&job.job_type)
                .cloned()
                .ok_or_else(|| JobError::NoHandler(job.job_type.clone()))?
        };
        self.execute_with(&handler, job).await
    }

    /// Shared execution path for queued and fire-and-forget jobs. A timed
    /// out handler future is dropped at the race; there is no cooperative
    /// cancellation signal.
    pub(crate) async fn execute_with(&self, handler: &Arc<dyn JobHandler>, job: &Job) -> Result<()> {
        let mut data = job.data.clone();
        let chain = self.inner.middleware.read().await.clone();
        for stage in chain {
            data = stage.call(job, data).await?;
        }

        match tokio::time::timeout(job.timeout, handler.handle(data, job)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(job.timeout.as_millis() as u64)),
        }
    }

    /// Retry policy: update the breaker, then either schedule a delayed
    /// re-enqueue (capped exponential backoff with additive jitter) or copy
    /// the job into the dead-letter queue.
    pub(crate) async fn handle_job_failure(&self, mut job: Job, error: JobError, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.inner.breakers.record_failure(&job.job_type, &error);

        if job.retries < job.max_retries {
            job.retries += 1;
            let delay = self.inner.config.retry_delay_for(job.retries);
            tracing::warn!(
                job_id = %job.id,
                attempt = job.retries,
                max_retries = job.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retrying"
            );
            self.inner.metrics.record_retried();
            self.mark_retrying(&job, &error);

            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = queue.push_job(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to re-enqueue job");
                }
            });
        } else {
            tracing::error!(
                job_id = %job.id,
                retries = job.retries,
                error = %error,
                "job failed permanently"
            );
            if let Err(e) = self.push_dead_letter(&job, &error).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to write dead letter");
            }
            self.inner.metrics.record_failed();
            self.mark_failed(&job.id, &error, elapsed_ms);
        }
    }

    async fn push_dead_letter(&self, job: &Job, error: &JobError) -> Result<()> {
        let mut dead = job.clone();
        dead.final_error = Some(error.to_string());
        dead.failed_at = Some(Utc::now());
        let payload = serde_json::to_string(&dead)?;
        self.inner
            .store
            .push_head(&self.inner.config.dead_letter_queue, payload)
            .await
    }

    /// Out-of-band execution for fire-and-forget jobs: retries happen
    /// in-task, failures are logged and recorded, never propagated, and
    /// nothing touches the queue store or the breaker registry.
    pub(crate) async fn run_detached(&self, mut job: Job, handler: Arc<dyn JobHandler>) {
        loop {
            let started = Instant::now();
            self.mark_processing(&job);

            match self.execute_with(&handler, &job).await {
                Ok(()) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.inner.metrics.record_processed(elapsed_ms);
                    self.mark_completed(&job.id, elapsed_ms);
                    tracing::debug!(job_id = %job.id, "fire-and-forget job completed");
                    return;
                }
                Err(e) if job.retries < job.max_retries => {
                    job.retries += 1;
                    let delay = self.inner.config.retry_delay_for(job.retries);
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.retries,
                        error = %e,
                        "fire-and-forget job failed, retrying"
                    );
                    self.inner.metrics.record_retried();
                    self.mark_retrying(&job, &e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "fire-and-forget job failed");
                    self.inner.metrics.record_failed();
                    self.mark_failed(&job.id, &e, started.elapsed().as_millis() as u64);
                    return;
                }
            }
        }
    }

    /// Drains the dead-letter queue on a fixed interval and logs the failure
    /// context for manual follow-up. Terminal sink; nothing is re-queued.
    pub(crate) async fn dead_letter_loop(&self) {
        tracing::info!("dead letter processor started");
        while !self.is_shutting_down() {
            tokio::time::sleep(self.inner.config.dead_letter_poll_interval).await;
            loop {
                match self
                    .inner
                    .store
                    .pop_tail(&self.inner.config.dead_letter_queue)
                    .await
                {
                    Ok(Some(payload)) => match serde_json::from_str::<Job>(&payload) {
                        Ok(job) => tracing::error!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            retries = job.retries,
                            error = job.final_error.as_deref().unwrap_or("unknown"),
                            "dead letter job"
                        ),
                        Err(e) => tracing::error!(error = %e, "unreadable dead letter payload"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "dead letter processor error");
                        tokio::time::sleep(self.inner.config.error_backoff).await;
                        break;
                    }
                }
            }
        }
    }

    /// Evicts completed status records past the retention window and
    /// breaker entries past the recovery window.
    pub(crate) async fn cleanup_loop(&self) {
        tracing::info!("cleanup worker started");
        while !self.is_shutting_down() {
            tokio::time::sleep(self.inner.config.cleanup_interval).await;

            let retention = chrono::Duration::from_std(self.inner.config.completed_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
            let cutoff = Utc::now() - retention;

            // producers insert concurrently, so count evictions in the
            // closure instead of diffing lengths
            let mut jobs = 0usize;
            self.inner.statuses.retain(|_, record| {
                let keep = match record.completed_at {
                    Some(done) => done >= cutoff,
                    None => true,
                };
                if !keep {
                    jobs += 1;
                }
                keep
            });
            let breakers = self.inner.breakers.evict_recovered();
            if jobs > 0 || breakers > 0 {
                tracing::debug!(jobs, breakers, "cleanup pass evicted entries");
            }
        }
    }

    /// Periodically overwrites the optimistic queue-length gauges with
    /// authoritative lengths from the store, and logs a metrics snapshot.
    pub(crate) async fn metrics_loop(&self) {
        while !self.is_shutting_down() {
            tokio::time::sleep(self.inner.config.metrics_interval).await;

            for priority in &self.inner.config.priority_queues {
                match self.inner.store.len(&priority.queue_key()).await {
                    Ok(len) => self.inner.metrics.set_queue_length(*priority, len),
                    Err(e) => {
                        tracing::error!(priority = %priority, error = %e, "failed to collect queue length")
                    }
                }
            }
            tracing::info!(metrics = ?self.inner.metrics.snapshot(), "job queue metrics");
        }
    }

    fn mark_processing(&self, job: &Job) {
        let mut record = self
            .inner
            .statuses
            .entry(job.id.clone())
            .or_insert_with(|| JobStatusRecord::queued(job.clone()));
        record.status = JobStatus::Processing;
        record.started_at = Some(Utc::now());
    }

    fn mark_completed(&self, job_id: &str, elapsed_ms: u64) {
        if let Some(mut record) = self.inner.statuses.get_mut(job_id) {
            record.status = JobStatus::Completed;
            record.completed_at = Some(Utc::now());
            record.processing_time_ms = Some(elapsed_ms);
        }
    }

    fn mark_retrying(&self, job: &Job, error: &JobError) {
        if let Some(mut record) = self.inner.statuses.get_mut(&job.id) {
            record.status = JobStatus::Retrying;
            record.last_error = Some(error.to_string());
            record.last_retry_at = Some(Utc::now());
            record.job.retries = job.retries;
        }
    }

    fn mark_failed(&self, job_id: &str, error: &JobError, elapsed_ms: u64) {
        if let Some(mut record) = self.inner.statuses.get_mut(job_id) {
            record.status = JobStatus::Failed;
            record.failed_at = Some(Utc::now());
            record.final_error = Some(error.to_string());
            record.processing_time_ms = Some(elapsed_ms);
        }
    }
}
