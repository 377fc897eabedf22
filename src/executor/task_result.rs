//! Task results and their flag accessors.
//!
//! A result is the raw JSON object an action produced, tagged with the
//! host and task it belongs to. Flags are derived from well-known keys
//! rather than stored separately, so loop aggregates and per-item
//! sub-results share the same accessors.

use std::sync::Arc;

use serde_json::Value;

use crate::playbook::Task;

/// The outcome of executing one task on one host.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub host: String,
    pub task: Arc<Task>,
    pub result: Value,
}

impl TaskResult {
    pub fn new(host: impl Into<String>, task: Arc<Task>, result: Value) -> Self {
        Self {
            host: host.into(),
            task,
            result,
        }
    }

    /// True if the result is failed.
    ///
    /// A `failed_when_result` override wins over the plain `failed`
    /// flag. A loop aggregate is failed if any item result is failed.
    pub fn is_failed(&self) -> bool {
        if let Some(items) = self.result.get("results").and_then(Value::as_array) {
            if items.iter().any(flag_failed) {
                return true;
            }
        }
        flag_failed(&self.result)
    }

    /// True if the result reports a change. A loop aggregate is changed
    /// if any item changed.
    pub fn is_changed(&self) -> bool {
        if let Some(items) = self.result.get("results").and_then(Value::as_array) {
            if items.iter().any(|r| flag(r, "changed")) {
                return true;
            }
        }
        flag(&self.result, "changed")
    }

    /// True if the task was skipped. A loop aggregate counts as skipped
    /// only when every item was skipped.
    pub fn is_skipped(&self) -> bool {
        if let Some(items) = self.result.get("results").and_then(Value::as_array) {
            if !items.is_empty() {
                return items.iter().all(|r| flag(r, "skipped"));
            }
        }
        flag(&self.result, "skipped")
    }

    /// True if the host could not be reached.
    pub fn is_unreachable(&self) -> bool {
        flag(&self.result, "unreachable")
    }

    /// Number of attempts recorded by the retry loop, if any.
    pub fn attempts(&self) -> Option<u64> {
        self.result.get("attempts").and_then(Value::as_u64)
    }

    /// The failure or status message, if the action provided one.
    pub fn message(&self) -> Option<&str> {
        self.result.get("msg").and_then(Value::as_str)
    }

    /// Returns a copy with internal keys (prefix `_`) stripped, suitable
    /// for registration and display. Item results under `results` are
    /// cleaned too.
    pub fn clean_copy(&self) -> Value {
        clean_value(&self.result)
    }
}

pub(crate) fn flag(result: &Value, key: &str) -> bool {
    result.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn flag_failed(result: &Value) -> bool {
    if let Some(over) = result.get("failed_when_result").and_then(Value::as_bool) {
        return over;
    }
    flag(result, "failed")
}

pub(crate) fn clean_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if k.starts_with('_') {
                    continue;
                }
                out.insert(k.clone(), clean_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(clean_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(value: Value) -> TaskResult {
        TaskResult::new("h1", Arc::new(Task::new("t", "debug")), value)
    }

    #[test]
    fn failed_when_override_wins() {
        let r = result(json!({"failed": false, "failed_when_result": true}));
        assert!(r.is_failed());
        let r = result(json!({"failed": true, "failed_when_result": false}));
        assert!(!r.is_failed());
    }

    #[test]
    fn loop_aggregate_flags_or_items() {
        let r = result(json!({
            "results": [
                {"changed": false, "failed": false},
                {"changed": true, "failed": false},
            ]
        }));
        assert!(r.is_changed());
        assert!(!r.is_failed());
        assert!(!r.is_skipped());
    }

    #[test]
    fn skipped_requires_all_items_skipped() {
        let all = result(json!({"results": [{"skipped": true}, {"skipped": true}]}));
        assert!(all.is_skipped());
        let some = result(json!({"results": [{"skipped": true}, {"changed": true}]}));
        assert!(!some.is_skipped());
    }

    #[test]
    fn clean_copy_strips_internal_keys() {
        let r = result(json!({
            "changed": true,
            "_notify": ["restart"],
            "results": [{"rc": 0, "_hidden": 1}],
        }));
        let cleaned = r.clean_copy();
        assert_eq!(
            cleaned,
            json!({"changed": true, "results": [{"rc": 0}]})
        );
    }
}
