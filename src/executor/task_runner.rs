//! The task runner: the control loop around a single action.
//!
//! A runner owns everything needed to execute one task against one
//! host inside a worker: the variable snapshot, the action registry,
//! the templating engine, and the sending half of the result channel.
//! It implements loop expansion, conditional skipping, the retry loop
//! with `until`, result-shaping overrides (`changed_when`,
//! `failed_when`), and fire-and-forget execution.
//!
//! `run` is infallible on purpose. Every error path is folded into a
//! failed result dict so the controlling task always receives exactly
//! one final result per queued task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::actions::ActionRegistry;
use crate::callback::EngineEvent;
use crate::config::Config;
use crate::executor::async_jobs::{JobStatus, JobStore};
use crate::executor::channel::ResultSender;
use crate::executor::task_result::{clean_value, flag, flag_failed, TaskResult};
use crate::inventory::Host;
use crate::playbook::Task;
use crate::template::Templar;
use crate::vars::Variables;

/// Executes one task on one host and produces its final result.
pub struct TaskRunner {
    host: Host,
    task: Arc<Task>,
    task_vars: Variables,
    actions: Arc<ActionRegistry>,
    templar: Templar,
    jobs: Arc<JobStore>,
    config: Arc<Config>,
    sender: ResultSender,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: Host,
        task: Arc<Task>,
        task_vars: Variables,
        actions: Arc<ActionRegistry>,
        jobs: Arc<JobStore>,
        config: Arc<Config>,
        sender: ResultSender,
    ) -> Self {
        Self {
            host,
            task,
            task_vars,
            actions,
            templar: Templar::new(),
            jobs,
            config,
            sender,
        }
    }

    pub fn host(&self) -> &str {
        &self.host.name
    }

    /// Runs the task to completion and returns its final result.
    pub async fn run(self) -> TaskResult {
        let mut value = self.run_inner().await;
        let result = TaskResult::new(self.host.name.clone(), Arc::clone(&self.task), value.clone());
        if !self.task.notify.is_empty() && result.is_changed() {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "_notify".to_string(),
                    Value::Array(
                        self.task
                            .notify
                            .iter()
                            .map(|n| Value::String(n.clone()))
                            .collect(),
                    ),
                );
            }
        }
        TaskResult::new(self.host.name.clone(), Arc::clone(&self.task), value)
    }

    async fn run_inner(&self) -> Value {
        let vars = self.task_vars.merged(&self.task.vars);
        let items = match self.resolve_loop(&vars) {
            Ok(None) => return self.execute(&vars).await,
            Ok(Some(items)) => items,
            Err(failed) => return failed,
        };

        if items.is_empty() {
            return json!({
                "skipped": true,
                "changed": false,
                "msg": "No items in the list",
                "results": [],
            });
        }

        if self.config.is_squashable(&self.task.action) && self.all_items_pass(&items, &vars) {
            let mut squashed = vars.clone();
            squashed.insert(self.task.loop_var.clone(), Value::Array(items));
            // The conditional is already settled per item; re-checking it
            // here would bind the loop var to the whole list.
            let task = match self.task.post_validate(&self.templar, &squashed) {
                Ok(task) => task,
                Err(e) => return failed_result(e.to_string()),
            };
            return self.execute_with_retries(&task, &squashed).await;
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut item_vars = vars.clone();
            item_vars.insert(self.task.loop_var.clone(), item.clone());
            let mut result = self.execute(&item_vars).await;
            if let Some(obj) = result.as_object_mut() {
                obj.insert(self.task.loop_var.clone(), item);
            }
            self.post_item_event(&result);
            results.push(result);
        }
        self.aggregate(results)
    }

    /// Resolves the loop source to a concrete item list. `Ok(None)`
    /// means the task has no loop. Errors come back as failed dicts.
    fn resolve_loop(
        &self,
        vars: &Variables,
    ) -> std::result::Result<Option<Vec<Value>>, Value> {
        let source = match &self.task.loop_ {
            None => return Ok(None),
            Some(source) => source,
        };
        match source {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.templar.template_value(item, vars, true) {
                        Ok(v) => out.push(v),
                        Err(e) => return Err(failed_result(e.to_string())),
                    }
                }
                Ok(Some(out))
            }
            Value::String(expr) => match self.templar.eval_expression(expr, vars) {
                Ok(Value::Array(items)) => Ok(Some(items)),
                Ok(other) => Err(failed_result(format!(
                    "loop source '{expr}' did not resolve to a list (got {})",
                    type_name(&other)
                ))),
                Err(e) => Err(failed_result(e.to_string())),
            },
            other => Err(failed_result(format!(
                "invalid loop source type: {}",
                type_name(other)
            ))),
        }
    }

    /// True when every loop item passes the task conditional, which is
    /// what makes a bulk action safe to squash into one invocation.
    fn all_items_pass(&self, items: &[Value], vars: &Variables) -> bool {
        let condition = match &self.task.when {
            None => return true,
            Some(c) => c,
        };
        items.iter().all(|item| {
            let mut item_vars = vars.clone();
            item_vars.insert(self.task.loop_var.clone(), item.clone());
            matches!(
                self.templar.evaluate_conditional(condition, &item_vars),
                Ok(true)
            )
        })
    }

    /// Runs one (possibly retried) execution against a bound snapshot.
    async fn execute(&self, vars: &Variables) -> Value {
        if let Some(condition) = &self.task.when {
            match self.templar.evaluate_conditional(condition, vars) {
                Ok(true) => {}
                Ok(false) => {
                    return json!({
                        "skipped": true,
                        "changed": false,
                        "skip_reason": "conditional result was false",
                    });
                }
                Err(e) => return failed_result(e.to_string()),
            }
        }

        let task = match self.task.post_validate(&self.templar, vars) {
            Ok(task) => task,
            Err(e) => return failed_result(e.to_string()),
        };
        self.execute_with_retries(&task, vars).await
    }

    async fn execute_with_retries(&self, task: &Task, vars: &Variables) -> Value {
        let retries = task.effective_retries();
        let mut last = json!({});

        for attempt in 1..=retries {
            let mut result = self.invoke(task, vars).await;
            if retries > 1 {
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("attempts".to_string(), json!(attempt));
                }
            }

            if let Err(fatal) = self.apply_result_whens(task, vars, &mut result) {
                return fatal;
            }

            // An explicit failed_when hit is final; retrying cannot
            // change an operator-asserted failure.
            if result
                .get("failed_when_result")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                return result;
            }

            let success = match &task.until {
                Some(condition) => {
                    let eval_vars = self.result_vars(task, vars, &result);
                    match self.templar.evaluate_conditional(condition, &eval_vars) {
                        Ok(ok) => ok,
                        Err(e) => return failed_result(e.to_string()),
                    }
                }
                None => !flag_failed(&result),
            };
            // A satisfied `until` only stops the retry loop; a result
            // that reported failure stays failed.
            if success {
                return result;
            }

            last = result;
            if attempt < retries {
                let retry = TaskResult::new(
                    self.host.name.clone(),
                    Arc::clone(&self.task),
                    last.clone(),
                );
                let _ = self.sender.post_callback(EngineEvent::RunnerRetry(retry));
                if task.delay > 0 {
                    tokio::time::sleep(Duration::from_secs(task.delay)).await;
                }
            }
        }

        if let Some(obj) = last.as_object_mut() {
            obj.insert("failed".to_string(), json!(true));
            obj.entry("msg".to_string())
                .or_insert_with(|| json!(format!("Retries exhausted after {retries} attempts")));
        }
        last
    }

    /// Applies `changed_when` and `failed_when` to a fresh attempt
    /// result. Evaluation errors are fatal for the task.
    fn apply_result_whens(
        &self,
        task: &Task,
        vars: &Variables,
        result: &mut Value,
    ) -> std::result::Result<(), Value> {
        if task.changed_when.is_none() && task.failed_when.is_none() {
            return Ok(());
        }
        let eval_vars = self.result_vars(task, vars, result);
        if let Some(condition) = &task.changed_when {
            match self.templar.evaluate_conditional(condition, &eval_vars) {
                Ok(changed) => {
                    if let Some(obj) = result.as_object_mut() {
                        obj.insert("changed".to_string(), json!(changed));
                    }
                }
                Err(e) => return Err(failed_result(e.to_string())),
            }
        }
        if let Some(condition) = &task.failed_when {
            match self.templar.evaluate_conditional(condition, &eval_vars) {
                Ok(failed) => {
                    if let Some(obj) = result.as_object_mut() {
                        obj.insert("failed_when_result".to_string(), json!(failed));
                    }
                }
                Err(e) => return Err(failed_result(e.to_string())),
            }
        }
        Ok(())
    }

    /// Variable snapshot used for result-relative conditionals: the
    /// attempt's cleaned result bound under the register name, or
    /// `result` when the task does not register.
    fn result_vars(&self, task: &Task, vars: &Variables, result: &Value) -> Variables {
        let mut out = vars.clone();
        let name = task.register.as_deref().unwrap_or("result");
        out.insert(name.to_string(), clean_value(result));
        out
    }

    /// Invokes the action, either inline or as a background job when
    /// the task carries an async budget.
    async fn invoke(&self, task: &Task, vars: &Variables) -> Value {
        let handler = match self.actions.get(&task.action) {
            Some(handler) => handler,
            None => return failed_result(format!("action '{}' not found", task.action)),
        };

        if task.async_secs == 0 {
            return match handler.run(task, vars, &self.host).await {
                Ok(value) => value,
                Err(e) => failed_result(e.to_string()),
            };
        }

        let bg_task = Arc::new(task.clone());
        let bg_vars = vars.clone();
        let bg_host = self.host.clone();
        let job_id = self.jobs.launch(async move {
            match handler.run(&bg_task, &bg_vars, &bg_host).await {
                Ok(value) => value,
                Err(e) => failed_result(e.to_string()),
            }
        });

        if task.poll_secs == 0 {
            return json!({
                "started": 1,
                "finished": 0,
                "job_id": job_id.to_string(),
            });
        }

        let budget = Duration::from_secs(task.async_secs);
        let started = Instant::now();
        loop {
            match self.jobs.status(job_id) {
                JobStatus::Finished(mut value) => {
                    self.jobs.reap(job_id);
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("finished".to_string(), json!(1));
                        obj.insert("job_id".to_string(), json!(job_id.to_string()));
                    }
                    return value;
                }
                JobStatus::Running => {
                    if started.elapsed() >= budget {
                        return failed_result(format!(
                            "async task did not complete within {} seconds",
                            task.async_secs
                        ));
                    }
                    let remaining = budget.saturating_sub(started.elapsed());
                    let interval = Duration::from_secs(task.poll_secs.max(1)).min(remaining);
                    tokio::time::sleep(interval).await;
                }
                JobStatus::NotFound => {
                    return failed_result("async job disappeared before completion");
                }
            }
        }
    }

    fn post_item_event(&self, result: &Value) {
        let item = TaskResult::new(
            self.host.name.clone(),
            Arc::clone(&self.task),
            result.clone(),
        );
        let event = if flag(result, "skipped") {
            EngineEvent::RunnerItemOnSkipped(item)
        } else if flag_failed(result) {
            EngineEvent::RunnerItemOnFailed(item)
        } else {
            EngineEvent::RunnerItemOnOk(item)
        };
        let _ = self.sender.post_callback(event);
    }

    fn aggregate(&self, results: Vec<Value>) -> Value {
        let changed = results.iter().any(|r| flag(r, "changed"));
        let failed = results.iter().any(flag_failed);
        let skipped = !results.is_empty() && results.iter().all(|r| flag(r, "skipped"));
        let mut out = json!({
            "changed": changed,
            "results": results,
        });
        if let Some(obj) = out.as_object_mut() {
            if failed {
                obj.insert("failed".to_string(), json!(true));
                obj.insert("msg".to_string(), json!("One or more items failed"));
            } else if skipped {
                obj.insert("skipped".to_string(), json!(true));
                obj.insert("msg".to_string(), json!("All items skipped"));
            }
        }
        out
    }
}

fn failed_result(msg: impl Into<String>) -> Value {
    json!({"failed": true, "msg": msg.into()})
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
