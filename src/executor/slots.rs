//! Queue classes and per-queue process slots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::engine::EngineConfig;
use crate::error::ExecutionError;

/// Where a stage's process is allowed to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueueClass {
    #[default]
    General,
    /// A named GPU queue, e.g. `gpu000_q1`.
    Gpu(String),
}

impl QueueClass {
    pub fn gpu(name: impl Into<String>) -> Self {
        Self::Gpu(name.into())
    }

    /// Queue name with the configured prefix applied.
    pub fn queue_name(&self, prefix: &str) -> String {
        match self {
            Self::General => format!("{}general", prefix),
            Self::Gpu(name) => format!("{}{}", prefix, name),
        }
    }
}

/// Bounds concurrent processes per queue name, across runs.
///
/// Queues without a configured limit are unbounded.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSlots {
    queues: HashMap<String, Arc<Semaphore>>,
}

impl ExecutionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let queues = config
            .queue_slots
            .iter()
            .map(|(queue, slots)| (queue.clone(), Arc::new(Semaphore::new(*slots))))
            .collect();
        Self { queues }
    }

    pub fn with_limit(mut self, queue: impl Into<String>, slots: usize) -> Self {
        self.queues.insert(queue.into(), Arc::new(Semaphore::new(slots)));
        self
    }

    /// Waits for a slot on `queue`. Returns `None` for unbounded queues.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::QueueClosed` if the queue's semaphore was
    /// closed.
    pub async fn acquire(&self, queue: &str) -> Result<Option<OwnedSemaphorePermit>, ExecutionError> {
        let Some(semaphore) = self.queues.get(queue) else {
            return Ok(None);
        };
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::QueueClosed {
                queue: queue.to_string(),
            })?;
        Ok(Some(permit))
    }

    /// Stops handing out slots on `queue`; waiting and later acquires fail.
    pub fn close(&self, queue: &str) {
        if let Some(semaphore) = self.queues.get(queue) {
            semaphore.close();
        }
    }

    pub fn available(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|s| s.available_permits())
    }
}
