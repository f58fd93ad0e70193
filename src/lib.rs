//! Background job processing engine
//!
//! A priority-queue based, at-least-once job dispatcher: producers enqueue
//! typed jobs, weighted worker pools execute registered handlers under a
//! timeout, failures retry with capped exponential backoff and jitter, a
//! per-job-type circuit breaker fast-fails repeatedly broken handlers, and
//! jobs that exhaust their retry budget land in a dead-letter queue.
//!
//! ```rust,no_run
//! use auth_jobs::{InMemoryStore, JobConfig, JobOptions, JobQueue, Result};
//! use serde_json::json;
//!
//! async fn send_verification(data: serde_json::Value) -> Result<()> {
//!     println!("sending verification email: {data}");
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let queue = JobQueue::new(InMemoryStore::new(), JobConfig::default());
//!
//!     queue.register_handler("email_verification", send_verification).await;
//!
//!     queue.start().await?;
//!
//!     let ack = queue
//!         .enqueue("email_verification", json!({"user_id": 42}), JobOptions::email_operation())
//!         .await?;
//!     println!("queued {}", ack.job_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod store;

mod breaker;
mod worker;

pub use config::{CircuitBreakerConfig, JobConfig, JobOptions};
pub use error::{JobError, Result};
pub use job::{EnqueuedJob, Job, JobHandler, JobStatus, JobStatusRecord, Middleware, Priority};
pub use metrics::MetricsSnapshot;
pub use queue::{Health, JobQueue};
pub use store::memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use store::redis::RedisStore;
pub use store::QueueStore;
