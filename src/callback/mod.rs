//! Callback plugins and the engine event stream.
//!
//! The engine narrates a run as a stream of [`EngineEvent`]s. Plugins
//! observe the stream; they never influence execution. A plugin error
//! is logged and dispatch moves on, so a broken reporter cannot take
//! the run down with it.

mod default;
mod null;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::executor::stats::RunStats;
use crate::executor::task_result::TaskResult;
use crate::playbook::{Play, Task};

pub use default::DefaultCallback;
pub use null::NullCallback;

/// One notification from the engine to the callback plugins.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PlayStart { play: Arc<Play>, pattern: String },
    TaskStart { task: Arc<Task> },
    RunnerOnStart { host: String, task: Arc<Task> },
    RunnerOnOk(TaskResult),
    RunnerOnFailed { result: TaskResult, ignore_errors: bool },
    RunnerOnSkipped(TaskResult),
    RunnerOnUnreachable(TaskResult),
    RunnerItemOnOk(TaskResult),
    RunnerItemOnFailed(TaskResult),
    RunnerItemOnSkipped(TaskResult),
    RunnerRetry(TaskResult),
    Stats(RunStats),
}

impl EngineEvent {
    /// The task this event concerns, when there is one.
    pub fn task(&self) -> Option<&Task> {
        match self {
            EngineEvent::TaskStart { task } => Some(task),
            EngineEvent::RunnerOnStart { task, .. } => Some(task),
            EngineEvent::RunnerOnOk(r)
            | EngineEvent::RunnerOnSkipped(r)
            | EngineEvent::RunnerOnUnreachable(r)
            | EngineEvent::RunnerItemOnOk(r)
            | EngineEvent::RunnerItemOnFailed(r)
            | EngineEvent::RunnerItemOnSkipped(r)
            | EngineEvent::RunnerRetry(r) => Some(&r.task),
            EngineEvent::RunnerOnFailed { result, .. } => Some(&result.task),
            EngineEvent::PlayStart { .. } | EngineEvent::Stats(_) => None,
        }
    }

    /// True for events about engine-generated tasks, which most
    /// plugins should not narrate.
    pub fn is_implicit_task(&self) -> bool {
        self.task().map(|t| t.implicit).unwrap_or(false)
    }
}

/// What a plugin is for. At most one stdout plugin is active per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackType {
    /// The user-facing narrator of the run.
    Stdout,
    /// Accumulates or reports alongside the stdout plugin.
    Aggregate,
    /// Sends notifications to an external system.
    Notification,
}

/// A run observer. Every hook has a default empty implementation;
/// implement only what you care about, or `on_any` to see everything.
pub trait CallbackPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn callback_type(&self) -> CallbackType {
        CallbackType::Aggregate
    }

    /// Plugins that opt in here stay dormant until explicitly enabled.
    fn needs_enabled(&self) -> bool {
        false
    }

    /// Opt in to events about engine-generated tasks.
    fn wants_implicit_tasks(&self) -> bool {
        false
    }

    fn on_play_start(&self, _play: &Play, _pattern: &str) -> Result<()> {
        Ok(())
    }

    fn on_task_start(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    fn on_runner_start(&self, _host: &str, _task: &Task) -> Result<()> {
        Ok(())
    }

    fn on_runner_ok(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_runner_failed(&self, _result: &TaskResult, _ignore_errors: bool) -> Result<()> {
        Ok(())
    }

    fn on_runner_skipped(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_runner_unreachable(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_item_ok(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_item_failed(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_item_skipped(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_retry(&self, _result: &TaskResult) -> Result<()> {
        Ok(())
    }

    fn on_stats(&self, _stats: &RunStats) -> Result<()> {
        Ok(())
    }

    /// Catch-all invoked for every event, before the specific hook.
    fn on_any(&self, _event: &EngineEvent) -> Result<()> {
        Ok(())
    }

    /// Routes an event to its hook. Plugins rarely override this.
    fn handle(&self, event: &EngineEvent) -> Result<()> {
        self.on_any(event)?;
        match event {
            EngineEvent::PlayStart { play, pattern } => self.on_play_start(play, pattern),
            EngineEvent::TaskStart { task } => self.on_task_start(task),
            EngineEvent::RunnerOnStart { host, task } => self.on_runner_start(host, task),
            EngineEvent::RunnerOnOk(r) => self.on_runner_ok(r),
            EngineEvent::RunnerOnFailed {
                result,
                ignore_errors,
            } => self.on_runner_failed(result, *ignore_errors),
            EngineEvent::RunnerOnSkipped(r) => self.on_runner_skipped(r),
            EngineEvent::RunnerOnUnreachable(r) => self.on_runner_unreachable(r),
            EngineEvent::RunnerItemOnOk(r) => self.on_item_ok(r),
            EngineEvent::RunnerItemOnFailed(r) => self.on_item_failed(r),
            EngineEvent::RunnerItemOnSkipped(r) => self.on_item_skipped(r),
            EngineEvent::RunnerRetry(r) => self.on_retry(r),
            EngineEvent::Stats(stats) => self.on_stats(stats),
        }
    }
}

/// Holds registered plugins and dispatches events to the loaded set.
pub struct CallbackRegistry {
    registered: Vec<Arc<dyn CallbackPlugin>>,
    enabled: HashSet<String>,
    loaded: Vec<Arc<dyn CallbackPlugin>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            registered: Vec::new(),
            enabled: HashSet::new(),
            loaded: Vec::new(),
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn CallbackPlugin>) {
        self.registered.push(plugin);
    }

    /// Activates a plugin that declares `needs_enabled`.
    pub fn enable(&mut self, name: impl Into<String>) {
        self.enabled.insert(name.into());
    }

    /// Resolves the active plugin set. The first stdout plugin wins;
    /// extra stdout plugins are dropped with a warning. When no stdout
    /// plugin was registered the built-in one is used.
    pub fn load(&mut self) {
        self.loaded.clear();
        let mut have_stdout = false;
        for plugin in &self.registered {
            if plugin.callback_type() == CallbackType::Stdout {
                if have_stdout {
                    warn!(plugin = plugin.name(), "ignoring extra stdout callback");
                    continue;
                }
                have_stdout = true;
            } else if plugin.needs_enabled() && !self.enabled.contains(plugin.name()) {
                continue;
            }
            self.loaded.push(Arc::clone(plugin));
        }
        if !have_stdout {
            self.loaded
                .insert(0, Arc::new(DefaultCallback::new()) as Arc<dyn CallbackPlugin>);
        }
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded.iter().map(|p| p.name()).collect()
    }

    /// Fans one event out to every loaded plugin. A plugin error never
    /// stops dispatch to the others.
    pub fn dispatch(&self, event: &EngineEvent) {
        let implicit = event.is_implicit_task();
        for plugin in &self.loaded {
            if implicit && !plugin.wants_implicit_tasks() {
                continue;
            }
            if let Err(e) = plugin.handle(event) {
                warn!(plugin = plugin.name(), "callback plugin failed: {e}");
            }
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
