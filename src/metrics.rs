use crate::job::Priority;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, written by workers and sampled by the metrics
/// collector. Queue lengths are optimistic estimates between collector
/// passes; the collector overwrites them with authoritative store lengths.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    total_processing_ms: AtomicU64,
    queue_lengths: DashMap<Priority, u64>,
}

impl Metrics {
    pub fn record_processed(&self, elapsed_ms: u64) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_length(&self, priority: Priority, len: u64) {
        self.queue_lengths.insert(priority, len);
    }

    pub fn incr_queue_length(&self, priority: Priority) {
        *self.queue_lengths.entry(priority).or_insert(0) += 1;
    }

    pub fn decr_queue_length(&self, priority: Priority) {
        if let Some(mut len) = self.queue_lengths.get_mut(&priority) {
            *len = len.saturating_sub(1);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.jobs_processed.load(Ordering::Relaxed);
        let total_ms = self.total_processing_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            jobs_processed: processed,
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            average_processing_ms: if processed == 0 {
                0.0
            } else {
                total_ms as f64 / processed as f64
            },
            queue_lengths: self
                .queue_lengths
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
        }
    }
}

/// Point-in-time metrics view, serialized into health reports and the
/// periodic metrics log line.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub average_processing_ms: f64,
    pub queue_lengths: HashMap<Priority, u64>,
}
