//! The task queue manager.
//!
//! Owns the worker pool, the result channel, run statistics, and the
//! persistent failed/unreachable host sets that carry across plays. A
//! strategy drives it: the strategy decides which (host, task) pairs to
//! queue and when to wait; the manager does the bookkeeping.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::actions::ActionRegistry;
use crate::callback::{CallbackRegistry, EngineEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::async_jobs::JobStore;
use crate::executor::channel::{result_channel, DisplayLevel, ResultSender, WorkerMessage};
use crate::executor::play_iterator::PlayIterator;
use crate::executor::stats::{RunStats, StatKind};
use crate::executor::task_result::TaskResult;
use crate::executor::task_runner::TaskRunner;
use crate::executor::worker::WorkerHandle;
use crate::inventory::{Host, Inventory};
use crate::playbook::{Play, Task};
use crate::prompt::{PromptHandler, StdinPrompt};
use crate::strategy::StrategyRegistry;
use crate::template::Templar;
use crate::vars::{VariableManager, Variables};

/// Everything went fine.
pub const RUN_OK: u32 = 0;
/// The engine itself hit an error.
pub const RUN_ERROR: u32 = 1;
/// At least one host failed a task.
pub const RUN_FAILED_HOSTS: u32 = 2;
/// At least one host was unreachable.
pub const RUN_UNREACHABLE_HOSTS: u32 = 4;
/// A play was ended before completion.
pub const RUN_FAILED_BREAK_PLAY: u32 = 8;
/// Something unexpected happened.
pub const RUN_UNKNOWN_ERROR: u32 = 255;

/// How a play finished. Both variants carry the OR-able `RUN_*` status
/// bits for the play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The play ran to the end of its task list.
    Completed(u32),
    /// An `end_play` stopped the play before its task list ran out.
    EndedEarly(u32),
}

impl PlayOutcome {
    pub fn status(self) -> u32 {
        match self {
            PlayOutcome::Completed(s) | PlayOutcome::EndedEarly(s) => s,
        }
    }
}

/// Coordinates workers, results, callbacks, and statistics for play
/// runs. One manager is reused across all plays of a playbook so
/// failed and unreachable hosts carry over.
pub struct TaskQueueManager {
    config: Arc<Config>,
    inventory: Inventory,
    variable_manager: VariableManager,
    callbacks: CallbackRegistry,
    strategies: StrategyRegistry,
    actions: Arc<ActionRegistry>,
    prompt: Box<dyn PromptHandler>,
    templar: Templar,
    jobs: Arc<JobStore>,
    sender: ResultSender,
    receiver: UnboundedReceiver<WorkerMessage>,
    workers: Vec<Option<WorkerHandle>>,
    cur_worker: usize,
    pending_results: usize,
    failed_hosts: HashSet<String>,
    unreachable_hosts: HashSet<String>,
    stats: RunStats,
    terminated: bool,
    callbacks_loaded: bool,
    // Serializes callback dispatch so plugin output never interleaves.
    callback_lock: Mutex<()>,
}

impl TaskQueueManager {
    pub fn new(config: Config, inventory: Inventory) -> Self {
        let (sender, receiver) = result_channel();
        Self {
            config: Arc::new(config),
            inventory,
            variable_manager: VariableManager::new(),
            callbacks: CallbackRegistry::new(),
            strategies: StrategyRegistry::with_defaults(),
            actions: Arc::new(ActionRegistry::with_defaults()),
            prompt: Box::new(StdinPrompt::new()),
            templar: Templar::new(),
            jobs: Arc::new(JobStore::new()),
            sender,
            receiver,
            workers: Vec::new(),
            cur_worker: 0,
            pending_results: 0,
            failed_hosts: HashSet::new(),
            unreachable_hosts: HashSet::new(),
            stats: RunStats::new(),
            terminated: false,
            callbacks_loaded: false,
            callback_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn templar(&self) -> &Templar {
        &self.templar
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn variable_manager(&self) -> &VariableManager {
        &self.variable_manager
    }

    pub fn variable_manager_mut(&mut self) -> &mut VariableManager {
        &mut self.variable_manager
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    pub fn strategies_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.strategies
    }

    /// Replaces the action registry. Must happen before any task is
    /// queued; workers hold their own handle to the registry.
    pub fn set_actions(&mut self, actions: ActionRegistry) {
        self.actions = Arc::new(actions);
    }

    pub fn set_prompt_handler(&mut self, prompt: Box<dyn PromptHandler>) {
        self.prompt = prompt;
    }

    /// Hosts that have failed so far in this run.
    pub fn failed_hosts(&self) -> &HashSet<String> {
        &self.failed_hosts
    }

    /// Hosts that have gone unreachable so far in this run.
    pub fn unreachable_hosts(&self) -> &HashSet<String> {
        &self.unreachable_hosts
    }

    /// Forgets accumulated host failures, so following plays include
    /// those hosts again. Unreachable hosts stay excluded.
    pub fn clear_failed_hosts(&mut self) {
        self.failed_hosts.clear();
    }

    /// Size of the worker pool allocated for the current play.
    pub fn worker_pool_size(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_results(&self) -> usize {
        self.pending_results
    }

    /// Runs one play to completion under its strategy.
    pub async fn run(&mut self, play: &Play) -> Result<PlayOutcome> {
        if self.terminated {
            return Err(Error::Internal(
                "task queue manager already cleaned up".to_string(),
            ));
        }
        if !self.callbacks_loaded {
            self.callbacks.load();
            self.callbacks_loaded = true;
        }

        let play_vars = self.variable_manager.get_play_vars(play);
        let play = Arc::new(play.post_validate(&self.templar, &play_vars)?);
        info!(play = %play.name, hosts = %play.hosts, "starting play");
        self.send_callback(EngineEvent::PlayStart {
            play: Arc::clone(&play),
            pattern: play.hosts.clone(),
        });

        let batch = self.inventory.get_hosts(&play.hosts);
        if batch.is_empty() {
            warn!(pattern = %play.hosts, "no hosts matched, skipping play");
            return Ok(PlayOutcome::Completed(RUN_OK));
        }

        let pool = self.config.forks.min(batch.len()).max(1);
        self.workers = (0..pool).map(|_| None).collect();
        self.cur_worker = 0;
        debug!(pool, hosts = batch.len(), "allocated worker pool");

        let strategy_name = play
            .strategy
            .clone()
            .unwrap_or_else(|| self.config.default_strategy.clone());
        let strategy = self
            .strategies
            .get(&strategy_name)
            .ok_or_else(|| Error::StrategyNotFound(strategy_name.clone()))?;

        let mut iterator = PlayIterator::new(
            Arc::clone(&play),
            batch.iter().map(|h| h.name.as_str()),
            |h| self.failed_hosts.contains(h),
            |h| self.unreachable_hosts.contains(h),
        );
        // New failures are tracked per play and folded back in below.
        self.failed_hosts.clear();

        let run_result = strategy.run(&mut iterator, self).await;

        strategy.cleanup();
        self.reap_workers().await;
        for host in iterator.get_failed_hosts() {
            self.failed_hosts.insert(host);
        }

        let status = run_result?;
        if iterator.end_play {
            info!(play = %play.name, "play ended early");
            Ok(PlayOutcome::EndedEarly(status))
        } else {
            Ok(PlayOutcome::Completed(status))
        }
    }

    /// Builds the variable snapshot for one queued task.
    pub fn task_vars(&self, play: &Play, host: &Host) -> Variables {
        self.variable_manager.get_vars(play, host)
    }

    /// Queues a task for a host on a free worker slot, waiting for one
    /// to open when the pool is saturated.
    pub async fn queue_task(&mut self, play: &Play, host: &Host, task: Arc<Task>) -> Result<()> {
        let vars = self.task_vars(play, host);
        self.send_callback(EngineEvent::RunnerOnStart {
            host: host.name.clone(),
            task: Arc::clone(&task),
        });
        loop {
            let mut free_slot = None;
            for offset in 0..self.workers.len() {
                let idx = (self.cur_worker + offset) % self.workers.len();
                match &self.workers[idx] {
                    None => {
                        free_slot = Some(idx);
                        break;
                    }
                    Some(w) if w.is_dead() => return Err(Error::DeadWorker),
                    Some(w) if !w.is_alive() => {
                        free_slot = Some(idx);
                        break;
                    }
                    Some(_) => {}
                }
            }
            match free_slot {
                Some(idx) => {
                    debug!(host = %host.name, task = %task.name, slot = idx, "queuing task");
                    let runner = TaskRunner::new(
                        host.clone(),
                        task,
                        vars,
                        Arc::clone(&self.actions),
                        Arc::clone(&self.jobs),
                        Arc::clone(&self.config),
                        self.sender.clone(),
                    );
                    self.workers[idx] = Some(WorkerHandle::spawn(idx, runner, self.sender.clone()));
                    self.cur_worker = (idx + 1) % self.workers.len();
                    self.pending_results += 1;
                    return Ok(());
                }
                None => tokio::time::sleep(self.config.internal_poll_interval()).await,
            }
        }
    }

    /// Drains every message currently sitting on the result channel
    /// without blocking, and returns the final task results seen.
    pub async fn process_pending_results(
        &mut self,
        iterator: &mut PlayIterator,
    ) -> Result<Vec<TaskResult>> {
        let mut results = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if let Some(result) = self.handle_message(message, iterator).await? {
                        results.push(result);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(results),
            }
        }
    }

    /// Blocks until every queued task has reported its final result.
    pub async fn wait_on_pending_results(
        &mut self,
        iterator: &mut PlayIterator,
    ) -> Result<Vec<TaskResult>> {
        let mut results = Vec::new();
        while self.pending_results > 0 {
            results.extend(self.process_pending_results(iterator).await?);
            if self.pending_results == 0 {
                break;
            }
            if self.has_dead_workers() {
                return Err(Error::DeadWorker);
            }
            tokio::time::sleep(self.config.internal_poll_interval()).await;
        }
        Ok(results)
    }

    /// True if any worker stopped without posting its result.
    pub fn has_dead_workers(&self) -> bool {
        self.workers.iter().flatten().any(|w| w.is_dead())
    }

    /// Dispatches one event to the loaded callback plugins. Dispatch is
    /// serialized; plugin errors are logged and never propagate.
    pub fn send_callback(&self, event: EngineEvent) {
        let _guard = self.callback_lock.lock();
        self.callbacks.dispatch(&event);
    }

    /// Emits the final statistics event.
    pub fn send_stats(&self) {
        self.send_callback(EngineEvent::Stats(self.stats.clone()));
    }

    async fn handle_message(
        &mut self,
        message: WorkerMessage,
        iterator: &mut PlayIterator,
    ) -> Result<Option<TaskResult>> {
        match message {
            WorkerMessage::Result(result) => {
                let seen = result.clone();
                self.handle_task_result(result, iterator);
                return Ok(Some(seen));
            }
            WorkerMessage::Callback(cb) => self.send_callback(cb.event),
            WorkerMessage::Display(d) => match d.level {
                DisplayLevel::Debug => debug!("{}", d.message),
                DisplayLevel::Info => info!("{}", d.message),
                DisplayLevel::Warning => warn!("{}", d.message),
                DisplayLevel::Error => error!("{}", d.message),
            },
            WorkerMessage::Prompt(p) => {
                let answer = self
                    .prompt
                    .prompt(&p.prompt, p.private, p.timeout_secs)
                    .await;
                // The worker may have been aborted meanwhile.
                let _ = p.reply.send(answer);
            }
        }
        Ok(None)
    }

    fn handle_task_result(&mut self, result: TaskResult, iterator: &mut PlayIterator) {
        self.pending_results = self.pending_results.saturating_sub(1);
        let host = result.host.clone();
        let task = Arc::clone(&result.task);
        let clean = result.clean_copy();

        if result.is_unreachable() {
            if task.ignore_unreachable {
                self.stats.increment(StatKind::Ok, &host);
                self.stats.increment(StatKind::Ignored, &host);
            } else {
                self.unreachable_hosts.insert(host.clone());
                iterator.mark_host_removed(&host);
                self.stats.increment(StatKind::Dark, &host);
            }
            self.send_callback(EngineEvent::RunnerOnUnreachable(result));
        } else if result.is_failed() {
            if task.ignore_errors {
                self.stats.increment(StatKind::Ok, &host);
                self.stats.increment(StatKind::Ignored, &host);
            } else {
                iterator.mark_host_failed(&host);
                self.stats.increment(StatKind::Failures, &host);
            }
            self.send_callback(EngineEvent::RunnerOnFailed {
                result,
                ignore_errors: task.ignore_errors,
            });
        } else if result.is_skipped() {
            self.stats.increment(StatKind::Skipped, &host);
            self.send_callback(EngineEvent::RunnerOnSkipped(result));
        } else {
            self.stats.increment(StatKind::Ok, &host);
            if result.is_changed() {
                self.stats.increment(StatKind::Changed, &host);
                if let Some(topics) = result.result.get("_notify").and_then(|v| v.as_array()) {
                    for topic in topics.iter().filter_map(|t| t.as_str()) {
                        iterator.add_notification(&host, topic);
                    }
                }
            }
            if let Some(facts) = result.result.get("_facts") {
                match serde_json::from_value::<Variables>(facts.clone()) {
                    Ok(facts) => self.variable_manager.set_host_facts(&host, &facts),
                    Err(e) => warn!(host = %host, "discarding malformed facts: {e}"),
                }
            }
            self.send_callback(EngineEvent::RunnerOnOk(result));
        }

        if let Some(register) = &task.register {
            self.variable_manager
                .set_host_fact(&host, register.clone(), clean);
        }
    }

    /// Waits for in-flight workers to finish on their own, then aborts
    /// whatever is left.
    async fn reap_workers(&mut self) {
        for _ in 0..self.config.reap_poll_count {
            if self.workers.iter().flatten().all(|w| !w.is_alive()) {
                break;
            }
            tokio::time::sleep(self.config.reap_poll_delay()).await;
        }
        for worker in self.workers.iter().flatten() {
            if worker.is_alive() {
                warn!(worker = worker.worker_id, host = %worker.host, "aborting stuck worker");
                worker.abort();
            }
        }
        for slot in &mut self.workers {
            if let Some(worker) = slot.take() {
                let _ = worker.join().await;
            }
        }
    }

    /// Tears the manager down. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        debug!("cleaning up task queue manager");
        self.reap_workers().await;
        self.receiver.close();
        let _ = std::io::stdout().flush();
    }
}
