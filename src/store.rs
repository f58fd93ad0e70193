use crate::error::Result;
use async_trait::async_trait;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

/// Minimal contract over an external list-backed key space.
///
/// `pop_tail` must be atomic: two workers polling the same queue must never
/// receive the same payload. Given that, no extra coordination is needed
/// across workers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Push a serialized job to the head of the named queue.
    async fn push_head(&self, queue: &str, payload: String) -> Result<()>;

    /// Pop one payload from the tail of the named queue; `None` when empty.
    async fn pop_tail(&self, queue: &str) -> Result<Option<String>>;

    /// Current length of the named queue.
    async fn len(&self, queue: &str) -> Result<u64>;

    /// Connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
