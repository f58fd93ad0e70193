use crate::config::CircuitBreakerConfig;
use crate::error::JobError;
use dashmap::DashMap;
use std::time::Instant;

/// Circuit breaker state for one job type.
///
/// - `Closed`: normal operation, failures are counted
/// - `Open`: executions short-circuit without invoking the handler
/// - `HalfOpen`: recovery timeout elapsed, one trial execution allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
        }
    }
}

/// Per-job-type failure tracking. An absent entry behaves as closed.
#[derive(Debug)]
pub(crate) struct BreakerRegistry {
    entries: DashMap<String, BreakerEntry>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Whether execution for this job type must be short-circuited. The
    /// open -> half-open transition happens lazily here; there is no
    /// background timer.
    pub fn is_open(&self, job_type: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(job_type) else {
            return false;
        };
        if entry.state != BreakerState::Open {
            return false;
        }
        let recovered = entry
            .last_failure_time
            .map(|t| t.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if recovered {
            tracing::info!(job_type, "circuit breaker half-open, allowing trial");
            entry.state = BreakerState::HalfOpen;
            return false;
        }
        true
    }

    /// Record a failed attempt. Only allow-listed error kinds count toward
    /// the threshold; any other error resets the entry. Synthetic
    /// circuit-open failures leave the entry untouched so an open breaker
    /// keeps fast-failing until it recovers.
    pub fn record_failure(&self, job_type: &str, error: &JobError) {
        if matches!(error, JobError::CircuitOpen(_)) {
            return;
        }
        let mut entry = self.entries.entry(job_type.to_string()).or_default();
        if self.config.expected_error_kinds.iter().any(|k| k == error.kind()) {
            entry.failure_count += 1;
            entry.last_failure_time = Some(Instant::now());
            if entry.failure_count >= self.config.failure_threshold {
                if entry.state != BreakerState::Open {
                    tracing::warn!(
                        job_type,
                        failures = entry.failure_count,
                        "circuit breaker opened"
                    );
                }
                entry.state = BreakerState::Open;
            }
        } else {
            entry.failure_count = 0;
            entry.state = BreakerState::Closed;
        }
    }

    /// A successful attempt closes the breaker and clears its history.
    pub fn record_success(&self, job_type: &str) {
        if let Some(mut entry) = self.entries.get_mut(job_type) {
            entry.failure_count = 0;
            entry.state = BreakerState::Closed;
            entry.last_failure_time = None;
        }
    }

    /// Evict entries whose last failure is past the recovery window,
    /// treated as fully recovered and forgotten. Returns the eviction count.
    pub fn evict_recovered(&self) -> usize {
        let recovery = self.config.recovery_timeout;
        // counted inside the closure: the map is concurrently written, so
        // a before/after length diff is not reliable
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = match entry.last_failure_time {
                Some(t) => t.elapsed() <= recovery,
                None => false,
            };
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn state(&self, job_type: &str) -> BreakerState {
        self.entries
            .get(job_type)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }
}
