//! Action handlers: the pluggable leaves of task execution.
//!
//! The engine is deliberately agnostic about what an action does; it
//! only demands a JSON result dict with the conventional flags
//! (`changed`, `failed`, `skipped`, `unreachable`, `msg`). A handful of
//! local handlers ship by default; embedders register their own for
//! anything beyond that.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::inventory::Host;
use crate::playbook::Task;
use crate::vars::Variables;

/// Executes one task invocation against one host.
///
/// Handlers receive the post-validated task (args already templated)
/// and the variable snapshot the attempt runs under. The returned
/// value must be a JSON object.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, task: &Task, vars: &Variables, host: &Host) -> Result<Value>;
}

/// Named action lookup, shared read-only with every worker.
pub struct ActionRegistry {
    handlers: IndexMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in local actions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DebugAction));
        registry.register(Arc::new(FailAction));
        registry.register(Arc::new(ShellAction));
        registry.register(Arc::new(SetFactAction));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Prints a message into the result. Never changes anything.
pub struct DebugAction;

#[async_trait]
impl ActionHandler for DebugAction {
    fn name(&self) -> &str {
        "debug"
    }

    async fn run(&self, task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        let msg = task
            .args
            .get("msg")
            .cloned()
            .unwrap_or_else(|| json!("Hello world!"));
        Ok(json!({"msg": msg, "changed": false}))
    }
}

/// Fails on purpose. Pairs with `when` for assertion-style guards.
pub struct FailAction;

#[async_trait]
impl ActionHandler for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        let msg = task
            .args
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Failed as requested from task");
        Ok(json!({"failed": true, "msg": msg}))
    }
}

/// Runs a command through the local shell.
pub struct ShellAction;

#[async_trait]
impl ActionHandler for ShellAction {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        let cmd = task
            .args
            .get("cmd")
            .or_else(|| task.args.get("_raw_params"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Config("shell action requires a 'cmd' argument".to_string()))?;

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await?;

        let rc = output.status.code().unwrap_or(-1);
        Ok(json!({
            "cmd": cmd,
            "rc": rc,
            "stdout": String::from_utf8_lossy(&output.stdout).trim_end(),
            "stderr": String::from_utf8_lossy(&output.stderr).trim_end(),
            "changed": true,
            "failed": rc != 0,
        }))
    }
}

/// Stores its arguments as host facts for the rest of the run.
pub struct SetFactAction;

#[async_trait]
impl ActionHandler for SetFactAction {
    fn name(&self) -> &str {
        "set_fact"
    }

    async fn run(&self, task: &Task, _vars: &Variables, _host: &Host) -> Result<Value> {
        let facts: serde_json::Map<String, Value> = task
            .args
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(json!({"_facts": facts, "changed": false}))
    }
}
