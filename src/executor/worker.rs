//! Worker handles.
//!
//! Each queued task runs in its own tokio task. The handle tracks
//! whether the worker finished cleanly (it posted its one result) so
//! the queue manager can tell a completed worker apart from one that
//! died without reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::executor::channel::ResultSender;
use crate::executor::task_runner::TaskRunner;

/// Handle to one in-flight worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub worker_id: usize,
    pub host: String,
    handle: JoinHandle<()>,
    clean_exit: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Spawns a worker that runs the task and posts exactly one final
    /// result on the channel.
    pub fn spawn(worker_id: usize, runner: TaskRunner, sender: ResultSender) -> Self {
        let host = runner.host().to_string();
        let clean_exit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&clean_exit);
        let handle = tokio::spawn(async move {
            let result = runner.run().await;
            if sender.post_result(result).is_ok() {
                flag.store(true, Ordering::Release);
            }
        });
        Self {
            worker_id,
            host,
            handle,
            clean_exit,
        }
    }

    /// True while the worker is still running.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// True if the worker stopped without posting its result.
    pub fn is_dead(&self) -> bool {
        self.handle.is_finished() && !self.clean_exit.load(Ordering::Acquire)
    }

    /// Forcibly terminates the worker.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the worker to finish. Abort-cancellation is not an
    /// error here.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(crate::error::Error::Internal(format!(
                "worker {} panicked: {e}",
                self.worker_id
            ))),
        }
    }
}
