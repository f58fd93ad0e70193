use async_trait::async_trait;
use auth_jobs::{
    InMemoryStore, Job, JobConfig, JobError, JobHandler, JobOptions, JobQueue, JobStatus,
    Middleware, Priority, QueueStore, Result,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Production intervals are far too slow for tests; background loops that a
/// test does not exercise get pushed out of the way entirely.
fn fast_config() -> JobConfig {
    let mut config = JobConfig::default()
        .retry_delay(Duration::from_millis(20))
        .max_retry_delay(Duration::from_millis(100))
        .poll_interval(Duration::from_millis(10));
    config.error_backoff = Duration::from_millis(50);
    config.dead_letter_poll_interval = Duration::from_secs(3600);
    config.cleanup_interval = Duration::from_secs(3600);
    config.metrics_interval = Duration::from_secs(3600);
    config.shutdown_timeout = Duration::from_secs(5);
    config
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn status_of(queue: &JobQueue, job_id: &str) -> Option<JobStatus> {
    queue.job_status(job_id).map(|r| r.status)
}

#[derive(Clone)]
struct Succeeds {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for Succeeds {
    async fn handle(&self, _data: Value, _job: &Job) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn handle(&self, _data: Value, _job: &Job) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(JobError::Validation("always fails".to_string()))
    }
}

#[derive(Clone)]
struct FailsOnce {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobHandler for FailsOnce {
    async fn handle(&self, _data: Value, _job: &Job) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(JobError::Handler("first attempt fails".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct Sleeper {
    duration: Duration,
    completions: Arc<Mutex<Vec<(Priority, Instant)>>>,
}

#[async_trait]
impl JobHandler for Sleeper {
    async fn handle(&self, _data: Value, job: &Job) -> Result<()> {
        tokio::time::sleep(self.duration).await;
        self.completions
            .lock()
            .unwrap()
            .push((job.priority, Instant::now()));
        Ok(())
    }
}

#[tokio::test]
async fn enqueued_job_completes() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store, fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    queue
        .register_handler("email_verification", Succeeds { calls: calls.clone() })
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("email_verification", json!({"user_id": 1}), JobOptions::new())
        .await
        .unwrap();
    assert_eq!(ack.status, JobStatus::Queued);

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let record = queue.job_status(&ack.job_id).unwrap();
    assert!(record.completed_at.is_some());
    assert!(record.processing_time_ms.is_some());

    let health = queue.health().await;
    assert_eq!(health.metrics.jobs_processed, 1);
    assert_eq!(health.metrics.jobs_failed, 0);
}

#[tokio::test]
async fn zero_retries_goes_straight_to_dead_letter() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    queue
        .register_handler("doomed", AlwaysFails { calls: calls.clone() })
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("doomed", json!({}), JobOptions::new().max_retries(0))
        .await
        .unwrap();

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Failed),
        Duration::from_secs(2),
    )
    .await;

    // one attempt, never rescheduled
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let payload = store.pop_tail("dead-letter-queue").await.unwrap().unwrap();
    let dead: Job = serde_json::from_str(&payload).unwrap();
    assert_eq!(dead.id, ack.job_id);
    assert_eq!(dead.retries, 0);
    assert!(dead.final_error.is_some());
}

#[tokio::test]
async fn retries_exhaust_into_dead_letter() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    queue
        .register_handler("doomed", AlwaysFails { calls: calls.clone() })
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("doomed", json!({}), JobOptions::new().max_retries(2))
        .await
        .unwrap();

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Failed),
        Duration::from_secs(5),
    )
    .await;

    // max_retries = 2 means at most 3 attempts total
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let payload = store.pop_tail("dead-letter-queue").await.unwrap().unwrap();
    let dead: Job = serde_json::from_str(&payload).unwrap();
    assert_eq!(dead.id, ack.job_id);
    assert_eq!(dead.retries, 2);

    // exactly one dead letter for this job
    assert_eq!(store.pop_tail("dead-letter-queue").await.unwrap(), None);

    let health = queue.health().await;
    assert_eq!(health.metrics.jobs_retried, 2);
    assert_eq!(health.metrics.jobs_failed, 1);
}

#[tokio::test]
async fn high_priority_pool_drains_first() {
    let store = InMemoryStore::new();
    let config = fast_config().workers(3, 2, 1);
    let queue = JobQueue::new(store, config);

    let completions = Arc::new(Mutex::new(Vec::new()));
    queue
        .register_handler(
            "sleepy",
            Sleeper {
                duration: Duration::from_millis(100),
                completions: completions.clone(),
            },
        )
        .await;
    queue.start().await.unwrap();

    for _ in 0..5 {
        queue
            .enqueue("sleepy", json!({}), JobOptions::new().priority(Priority::High))
            .await
            .unwrap();
    }
    for _ in 0..5 {
        queue
            .enqueue("sleepy", json!({}), JobOptions::new().priority(Priority::Low))
            .await
            .unwrap();
    }

    wait_for(|| completions.lock().unwrap().len() == 10, Duration::from_secs(5)).await;

    let completions = completions.lock().unwrap();
    let last_high = completions
        .iter()
        .filter(|(p, _)| *p == Priority::High)
        .map(|(_, t)| *t)
        .max()
        .unwrap();
    let last_low = completions
        .iter()
        .filter(|(p, _)| *p == Priority::Low)
        .map(|(_, t)| *t)
        .max()
        .unwrap();
    assert!(
        last_high < last_low,
        "high priority jobs should all finish before low priority jobs do"
    );
}

#[tokio::test]
async fn open_breaker_short_circuits_without_calling_handler() {
    let store = InMemoryStore::new();
    let mut config = fast_config().breaker(
        auth_jobs::CircuitBreakerConfig::default()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(60)),
    );
    // keep the scheduled retry pending while we assert
    config.retry_delay = Duration::from_secs(60);
    config.max_retry_delay = Duration::from_secs(60);
    let queue = JobQueue::new(store, config);

    let calls = Arc::new(AtomicU32::new(0));
    queue
        .register_handler("y", AlwaysFails { calls: calls.clone() })
        .await;
    queue.start().await.unwrap();

    let first = queue
        .enqueue("y", json!({}), JobOptions::new().max_retries(0))
        .await
        .unwrap();
    let second = queue
        .enqueue("y", json!({}), JobOptions::new().max_retries(0))
        .await
        .unwrap();

    wait_for(
        || {
            status_of(&queue, &first.job_id) == Some(JobStatus::Failed)
                && status_of(&queue, &second.job_id) == Some(JobStatus::Failed)
        },
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // breaker is open now: the next attempt is failed synthetically and
    // queued for retry without the handler running
    let third = queue
        .enqueue("y", json!({}), JobOptions::new().max_retries(1))
        .await
        .unwrap();

    wait_for(
        || status_of(&queue, &third.job_id) == Some(JobStatus::Retrying),
        Duration::from_secs(2),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let record = queue.job_status(&third.job_id).unwrap();
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .contains("circuit breaker is open"));
}

#[tokio::test]
async fn delayed_enqueue_defers_store_write() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    // engine not started: nothing consumes the queue

    let ack = queue
        .enqueue(
            "later",
            json!({}),
            JobOptions::new().delay(Duration::from_millis(150)),
        )
        .await
        .unwrap();

    assert_eq!(store.len("jobs:normal").await.unwrap(), 0);
    assert_eq!(status_of(&queue, &ack.job_id), Some(JobStatus::Queued));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.len("jobs:normal").await.unwrap(), 1);
}

#[tokio::test]
async fn timeout_fails_the_attempt() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store, fast_config());
    queue
        .register_handler(
            "slow",
            Sleeper {
                duration: Duration::from_millis(500),
                completions: Arc::new(Mutex::new(Vec::new())),
            },
        )
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue(
            "slow",
            json!({}),
            JobOptions::new()
                .max_retries(0)
                .timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Failed),
        Duration::from_secs(2),
    )
    .await;

    let record = queue.job_status(&ack.job_id).unwrap();
    assert!(record.final_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn missing_handler_goes_to_dead_letter() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("unregistered", json!({}), JobOptions::new().max_retries(0))
        .await
        .unwrap();

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Failed),
        Duration::from_secs(2),
    )
    .await;

    let record = queue.job_status(&ack.job_id).unwrap();
    assert!(record
        .final_error
        .as_deref()
        .unwrap()
        .contains("no handler registered"));
    assert!(store.pop_tail("dead-letter-queue").await.unwrap().is_some());
}

#[tokio::test]
async fn fire_and_forget_runs_out_of_band() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    queue.start().await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let ack = queue.fire_and_forget(
        Succeeds { calls: calls.clone() },
        json!({"warm": "cache"}),
        JobOptions::new(),
    );

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // never touched the store
    assert_eq!(store.len("jobs:normal").await.unwrap(), 0);
}

#[tokio::test]
async fn fire_and_forget_failure_is_contained() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    queue.start().await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let ack = queue.fire_and_forget(
        AlwaysFails { calls: calls.clone() },
        json!({}),
        JobOptions::new(),
    );

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Failed),
        Duration::from_secs(2),
    )
    .await;

    // no retry by default and no dead letter for out-of-band jobs
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.pop_tail("dead-letter-queue").await.unwrap(), None);
}

#[tokio::test]
async fn fire_and_forget_retries_in_task() {
    let store = InMemoryStore::new();
    let queue = JobQueue::new(store.clone(), fast_config());
    queue.start().await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let ack = queue.fire_and_forget(
        FailsOnce { calls: calls.clone() },
        json!({}),
        JobOptions::new().max_retries(1),
    );

    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // the retry happens in-task: the store never sees the job
    assert_eq!(store.len("jobs:normal").await.unwrap(), 0);
    let record = queue.job_status(&ack.job_id).unwrap();
    assert_eq!(record.job.retries, 1);
    assert!(record.last_error.as_deref().unwrap().contains("first attempt"));
}

#[tokio::test]
async fn job_status_is_idempotent_once_completed() {
    let queue = JobQueue::new(InMemoryStore::new(), fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    queue.register_handler("once", Succeeds { calls }).await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("once", json!({}), JobOptions::new())
        .await
        .unwrap();
    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;

    let first = queue.job_status(&ack.job_id).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = queue.job_status(&ack.job_id).unwrap();
    assert_eq!(first, second);
}

struct InjectStage;

#[async_trait]
impl Middleware for InjectStage {
    async fn call(&self, _job: &Job, mut data: Value) -> Result<Value> {
        if let Some(obj) = data.as_object_mut() {
            obj.insert("injected".to_string(), json!(true));
        }
        Ok(data)
    }
}

#[derive(Clone)]
struct Recorder {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl JobHandler for Recorder {
    async fn handle(&self, data: Value, _job: &Job) -> Result<()> {
        self.seen.lock().unwrap().push(data);
        Ok(())
    }
}

#[tokio::test]
async fn middleware_transforms_payload_before_handler() {
    let queue = JobQueue::new(InMemoryStore::new(), fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    queue.use_middleware(InjectStage).await;
    queue
        .register_handler("observed", Recorder { seen: seen.clone() })
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("observed", json!({"original": 1}), JobOptions::new())
        .await
        .unwrap();
    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["original"], json!(1));
    assert_eq!(seen[0]["injected"], json!(true));
}

#[tokio::test]
async fn cleanup_evicts_old_completed_records() {
    let mut config = fast_config();
    config.cleanup_interval = Duration::from_millis(50);
    config.completed_retention = Duration::from_millis(50);
    let queue = JobQueue::new(InMemoryStore::new(), config);

    let calls = Arc::new(AtomicU32::new(0));
    queue.register_handler("transient", Succeeds { calls }).await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("transient", json!({}), JobOptions::new())
        .await
        .unwrap();
    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;

    wait_for(|| queue.job_status(&ack.job_id).is_none(), Duration::from_secs(2)).await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_jobs() {
    let queue = JobQueue::new(InMemoryStore::new(), fast_config());
    let completions = Arc::new(Mutex::new(Vec::new()));
    queue
        .register_handler(
            "slow",
            Sleeper {
                duration: Duration::from_millis(300),
                completions: completions.clone(),
            },
        )
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("slow", json!({}), JobOptions::new())
        .await
        .unwrap();
    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Processing),
        Duration::from_secs(2),
    )
    .await;

    queue.shutdown().await;
    assert_eq!(status_of(&queue, &ack.job_id), Some(JobStatus::Completed));

    // workers are gone: new work stays queued
    let stale = queue
        .enqueue("slow", json!({}), JobOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(status_of(&queue, &stale.job_id), Some(JobStatus::Queued));
}

#[tokio::test]
async fn closure_handlers_are_supported() {
    let queue = JobQueue::new(InMemoryStore::new(), fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    queue
        .register_handler("counted", move |_data: Value| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        })
        .await;
    queue.start().await.unwrap();

    let ack = queue
        .enqueue("counted", json!({}), JobOptions::new())
        .await
        .unwrap();
    wait_for(
        || status_of(&queue, &ack.job_id) == Some(JobStatus::Completed),
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_reports_store_and_counts() {
    let queue = JobQueue::new(InMemoryStore::new(), fast_config());
    queue.start().await.unwrap();

    let health = queue.health().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.store, "connected");
    assert_eq!(health.active_jobs, 0);
    assert_eq!(health.circuit_breakers, 0);
}
