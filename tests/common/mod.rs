#![allow(dead_code)]

//! Shared stubs for the integration suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use taskmill::callback::NullCallback;
use taskmill::prelude::*;

/// Action that returns a fixed result and counts invocations.
pub struct StubAction {
    name: String,
    result: Value,
    calls: Arc<AtomicUsize>,
}

impl StubAction {
    pub fn new(name: &str, result: Value) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let action = Arc::new(Self {
            name: name.to_string(),
            result,
            calls: Arc::clone(&calls),
        });
        (action, calls)
    }
}

#[async_trait]
impl ActionHandler for StubAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Sleeps before answering, for async execution tests.
pub struct SlowAction {
    name: String,
    delay_ms: u64,
    result: Value,
}

impl SlowAction {
    pub fn new(name: &str, delay_ms: u64, result: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay_ms,
            result,
        })
    }
}

#[async_trait]
impl ActionHandler for SlowAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(self.result.clone())
    }
}

/// Fails for loop items equal to `"bad"`, reports changed otherwise.
pub struct FlakyAction;

#[async_trait]
impl ActionHandler for FlakyAction {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run(&self, task: &Task, vars: &Variables, _host: &Host) -> Result<Value> {
        if vars.get(&task.loop_var) == Some(&json!("bad")) {
            Ok(json!({"failed": true, "msg": "bad item"}))
        } else {
            Ok(json!({"changed": true}))
        }
    }
}

/// Records a label per observed event.
pub struct RecordingCallback {
    pub events: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, label: String) {
        self.events.lock().push(label);
    }
}

impl CallbackPlugin for RecordingCallback {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_task_start(&self, task: &Task) -> Result<()> {
        self.push(format!("task_start:{}", task.name));
        Ok(())
    }

    fn on_runner_start(&self, host: &str, task: &Task) -> Result<()> {
        self.push(format!("start:{host}:{}", task.name));
        Ok(())
    }

    fn on_runner_ok(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("ok:{}", result.host));
        Ok(())
    }

    fn on_runner_failed(&self, result: &TaskResult, ignore_errors: bool) -> Result<()> {
        if ignore_errors {
            self.push(format!("failed_ignored:{}", result.host));
        } else {
            self.push(format!("failed:{}", result.host));
        }
        Ok(())
    }

    fn on_runner_skipped(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("skipped:{}", result.host));
        Ok(())
    }

    fn on_runner_unreachable(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("unreachable:{}", result.host));
        Ok(())
    }

    fn on_retry(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("retry:{}", result.host));
        Ok(())
    }

    fn on_item_ok(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("item_ok:{}", result.host));
        Ok(())
    }

    fn on_item_failed(&self, result: &TaskResult) -> Result<()> {
        self.push(format!("item_failed:{}", result.host));
        Ok(())
    }

    fn on_stats(&self, _stats: &RunStats) -> Result<()> {
        self.push("stats".to_string());
        Ok(())
    }
}

/// Errors on every event, to prove dispatch isolation.
pub struct FailingCallback;

impl CallbackPlugin for FailingCallback {
    fn name(&self) -> &str {
        "failing"
    }

    fn on_any(&self, _event: &EngineEvent) -> Result<()> {
        Err(Error::Internal("callback exploded".to_string()))
    }
}

/// Inventory with the given bare hosts.
pub fn inventory(names: &[&str]) -> Inventory {
    let mut inventory = Inventory::new();
    for name in names {
        inventory.add_host(Host::new(*name));
    }
    inventory
}

/// Manager with a silent stdout plugin, so test output stays clean.
pub fn quiet_tqm(config: Config, inventory: Inventory) -> TaskQueueManager {
    let mut tqm = TaskQueueManager::new(config, inventory);
    tqm.callbacks_mut().register(Arc::new(NullCallback));
    tqm
}
