//! Execution strategies.
//!
//! A strategy decides which (host, task) pairs to queue and when to
//! wait; the task queue manager owns the mechanics. Two strategies
//! ship by default: `linear` walks the task list in lockstep across
//! all hosts, `free` lets every host run ahead independently.

mod free;
mod linear;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::callback::EngineEvent;
use crate::error::Result;
use crate::executor::play_iterator::PlayIterator;
use crate::executor::queue_manager::{
    TaskQueueManager, RUN_FAILED_HOSTS, RUN_OK, RUN_UNREACHABLE_HOSTS,
};
use crate::playbook::Task;

pub use free::FreeStrategy;
pub use linear::LinearStrategy;

/// Drives one play over the task queue manager.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the play to completion and returns its `RUN_*` status bits.
    async fn run(
        &self,
        iterator: &mut PlayIterator,
        tqm: &mut TaskQueueManager,
    ) -> Result<u32>;

    /// Called once after `run`, even when `run` errored.
    fn cleanup(&self) {}
}

/// Named strategy lookup.
pub struct StrategyRegistry {
    strategies: IndexMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: IndexMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LinearStrategy));
        registry.register(Arc::new(FreeStrategy));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Executes a meta task inline on the controlling task. Meta tasks
/// never reach a worker.
pub(crate) async fn execute_meta(
    iterator: &mut PlayIterator,
    tqm: &mut TaskQueueManager,
    host_name: &str,
    task: &Task,
) -> Result<()> {
    let host = match tqm.inventory().get_host(host_name).cloned() {
        Some(host) => host,
        None => return Ok(()),
    };
    if let Some(condition) = &task.when {
        let vars = tqm.task_vars(iterator.play(), &host);
        if !tqm.templar().evaluate_conditional(condition, &vars)? {
            return Ok(());
        }
    }
    let verb = task.meta_verb().unwrap_or("noop");
    debug!(host = host_name, verb, "executing meta task");
    match verb {
        "noop" => {}
        "end_play" => iterator.end_play = true,
        "end_host" => iterator.end_host(host_name),
        "clear_host_errors" => {
            iterator.clear_host_errors();
            tqm.clear_failed_hosts();
        }
        "flush_handlers" => run_handlers(iterator, tqm).await?,
        other => warn!(verb = other, "ignoring unknown meta verb"),
    }
    Ok(())
}

/// Queues every notified handler and waits for the flush to drain.
/// Notifications are consumed; a handler fires at most once per host
/// per flush.
pub(crate) async fn run_handlers(
    iterator: &mut PlayIterator,
    tqm: &mut TaskQueueManager,
) -> Result<()> {
    let play = Arc::clone(iterator.play());
    let mut announced: HashSet<Uuid> = HashSet::new();
    for host_name in iterator.hosts() {
        let topics = iterator.take_notifications(&host_name);
        if topics.is_empty() {
            continue;
        }
        let host = match tqm.inventory().get_host(&host_name).cloned() {
            Some(host) => host,
            None => continue,
        };
        let mut queued: HashSet<Uuid> = HashSet::new();
        for topic in topics {
            for handler in play.handlers.iter().filter(|h| h.listens_to(&topic)) {
                if !queued.insert(handler.task.uuid) {
                    continue;
                }
                let task = Arc::new(handler.task.clone());
                if announced.insert(handler.task.uuid) {
                    tqm.send_callback(EngineEvent::TaskStart {
                        task: Arc::clone(&task),
                    });
                }
                tqm.queue_task(&play, &host, task).await?;
                tqm.process_pending_results(iterator).await?;
            }
        }
    }
    tqm.wait_on_pending_results(iterator).await?;
    Ok(())
}

/// Folds the terminal host states into the play's `RUN_*` status.
pub(crate) fn finalize(iterator: &PlayIterator, tqm: &TaskQueueManager) -> u32 {
    if !tqm.unreachable_hosts().is_empty() {
        RUN_UNREACHABLE_HOSTS
    } else if !iterator.get_failed_hosts().is_empty() || !tqm.failed_hosts().is_empty() {
        RUN_FAILED_HOSTS
    } else {
        RUN_OK
    }
}
