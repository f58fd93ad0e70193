use crate::job::Priority;
use rand::Rng;
use std::time::Duration;

/// Per-job-type circuit breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive qualifying failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker short-circuits before allowing a trial run.
    pub recovery_timeout: Duration,
    /// Error kinds that count toward the threshold. Anything else is an
    /// application error and resets the breaker.
    pub expected_error_kinds: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            expected_error_kinds: vec!["validation".to_string(), "timeout".to_string()],
        }
    }
}

impl CircuitBreakerConfig {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn expected_error_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_error_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }
}

/// Engine configuration. Defaults carry the production values; tests shrink
/// the intervals.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub default_retries: u32,
    pub default_timeout: Duration,
    /// Base delay for the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Cap on the exponential backoff, before jitter.
    pub max_retry_delay: Duration,
    pub dead_letter_queue: String,
    pub priority_queues: Vec<Priority>,
    pub high_workers: usize,
    pub normal_workers: usize,
    pub low_workers: usize,
    /// Worker sleep when its queue is empty.
    pub poll_interval: Duration,
    /// Worker sleep after a store/poll error.
    pub error_backoff: Duration,
    pub dead_letter_poll_interval: Duration,
    pub cleanup_interval: Duration,
    /// How long completed status records are kept before eviction.
    pub completed_retention: Duration,
    pub metrics_interval: Duration,
    /// Bound on waiting for in-flight jobs during shutdown.
    pub shutdown_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            default_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
            dead_letter_queue: "dead-letter-queue".to_string(),
            priority_queues: vec![Priority::High, Priority::Normal, Priority::Low],
            high_workers: 3,
            normal_workers: 2,
            low_workers: 1,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            dead_letter_poll_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(300),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            metrics_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl JobConfig {
    pub fn default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn dead_letter_queue(mut self, name: impl Into<String>) -> Self {
        self.dead_letter_queue = name.into();
        self
    }

    pub fn workers(mut self, high: usize, normal: usize, low: usize) -> Self {
        self.high_workers = high;
        self.normal_workers = normal;
        self.low_workers = low;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn workers_for(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high_workers,
            Priority::Normal => self.normal_workers,
            Priority::Low => self.low_workers,
        }
    }

    /// Backoff for retry attempt `attempt` (1-indexed): capped exponential
    /// growth plus additive jitter in `[0, 0.1)` of the delay, so the result
    /// lands in `[delay, 1.1 * delay)`.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.as_millis() as u64;
        let cap = self.max_retry_delay.as_millis() as u64;
        let delay = base
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(cap);
        let jitter = (rand::thread_rng().gen_range(0.0..0.1) * delay as f64) as u64;
        Duration::from_millis(delay + jitter)
    }
}

/// Per-enqueue overrides for a single job.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Profile for cache population jobs.
    pub fn cache_operation() -> Self {
        Self::new()
            .max_retries(2)
            .timeout(Duration::from_secs(15))
            .priority(Priority::Normal)
    }

    /// Profile for outbound email jobs.
    pub fn email_operation() -> Self {
        Self::new()
            .max_retries(3)
            .timeout(Duration::from_secs(30))
            .priority(Priority::High)
    }

    /// Profile for maintenance/cleanup jobs.
    pub fn cleanup_operation() -> Self {
        Self::new()
            .max_retries(1)
            .timeout(Duration::from_secs(120))
            .priority(Priority::Low)
    }
}
