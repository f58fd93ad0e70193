use super::QueueStore;
use crate::error::{JobError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory queue store (not persistent, for testing/dev).
///
/// Clones share the same underlying queues, so a test can keep a handle to
/// inspect what the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    queues: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<String>>>> {
        self.queues
            .lock()
            .map_err(|_| JobError::Store("lock poisoned".to_string()))
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn push_head(&self, queue: &str, payload: String) -> Result<()> {
        let mut queues = self.queues()?;
        queues.entry(queue.to_string()).or_default().push_front(payload);
        Ok(())
    }

    async fn pop_tail(&self, queue: &str) -> Result<Option<String>> {
        let mut queues = self.queues()?;
        Ok(queues.get_mut(queue).and_then(|q| q.pop_back()))
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let queues = self.queues()?;
        Ok(queues.get(queue).map(|q| q.len() as u64).unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
