//! Background job tracking for fire-and-forget tasks.
//!
//! A task with a nonzero `async` budget launches its action in a
//! detached tokio task and immediately reports `{started: 1}` with a
//! job id. The runner (when `poll > 0`) or a later status check looks
//! the job up here.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

/// State of a launched background job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Finished(Value),
    NotFound,
}

#[derive(Debug, Default)]
struct Slots {
    jobs: IndexMap<Uuid, Option<Value>>,
}

/// Shared registry of background jobs.
#[derive(Debug, Default)]
pub struct JobStore {
    slots: Arc<Mutex<Slots>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `future` as a detached job and returns its id.
    pub fn launch<F>(&self, future: F) -> Uuid
    where
        F: std::future::Future<Output = Value> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.slots.lock().jobs.insert(id, None);
        let slots = Arc::clone(&self.slots);
        tokio::spawn(async move {
            let result = future.await;
            slots.lock().jobs.insert(id, Some(result));
        });
        id
    }

    /// Current status of a job.
    pub fn status(&self, id: Uuid) -> JobStatus {
        match self.slots.lock().jobs.get(&id) {
            Some(Some(result)) => JobStatus::Finished(result.clone()),
            Some(None) => JobStatus::Running,
            None => JobStatus::NotFound,
        }
    }

    /// Removes a finished job, returning its result.
    pub fn reap(&self, id: Uuid) -> Option<Value> {
        let mut slots = self.slots.lock();
        match slots.jobs.get(&id) {
            Some(Some(_)) => slots.jobs.shift_remove(&id).flatten(),
            _ => None,
        }
    }
}
