//! Plays, tasks, and handlers.
//!
//! These are the declarative inputs to the engine. A [`Play`] binds a
//! host pattern to an ordered task list; a [`Task`] names an action and
//! carries the control fields that shape its execution (conditionals,
//! loops, retries, result registration). Handlers are tasks that only
//! run when notified by a changed task.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::template::Templar;
use crate::vars::Variables;

/// Meta verbs understood by [`Task::meta_verb`].
pub const META_VERBS: &[&str] = &[
    "noop",
    "end_play",
    "end_host",
    "clear_host_errors",
    "flush_handlers",
];

/// A single unit of work: one action applied to one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Human-readable task name; may contain template markers.
    #[serde(default)]
    pub name: String,
    /// The action handler to invoke.
    pub action: String,
    /// Action arguments, templated before execution.
    #[serde(default)]
    pub args: IndexMap<String, Value>,
    /// Conditional guarding execution; skipped when it evaluates false.
    #[serde(default)]
    pub when: Option<String>,
    /// Loop source: either a literal array or a template string that
    /// must resolve to one.
    #[serde(default, rename = "loop")]
    pub loop_: Option<Value>,
    /// Name the current loop item is bound to.
    #[serde(default = "default_loop_var")]
    pub loop_var: String,
    /// Maximum attempts. Defaults to 3 when `until` is set, else 1.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Seconds to sleep between retry attempts.
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// Retry exit condition, evaluated against the attempt's result.
    #[serde(default)]
    pub until: Option<String>,
    /// Overrides the changed flag of the result.
    #[serde(default)]
    pub changed_when: Option<String>,
    /// Overrides the failed flag of the result.
    #[serde(default)]
    pub failed_when: Option<String>,
    /// Variable name the final result is stored under.
    #[serde(default)]
    pub register: Option<String>,
    /// Treat a failure as ok for play flow purposes.
    #[serde(default)]
    pub ignore_errors: bool,
    /// Treat an unreachable host as ok for play flow purposes.
    #[serde(default)]
    pub ignore_unreachable: bool,
    /// Handlers to notify when this task reports changed.
    #[serde(default)]
    pub notify: Vec<String>,
    /// Task-level variables, highest precedence below the loop var.
    #[serde(default)]
    pub vars: Variables,
    /// Fire-and-forget budget in seconds; 0 means synchronous.
    #[serde(default, rename = "async")]
    pub async_secs: u64,
    /// Poll interval for async tasks; 0 means do not wait.
    #[serde(default = "default_poll", rename = "poll")]
    pub poll_secs: u64,
    /// True for engine-generated tasks (e.g. implicit meta). Implicit
    /// tasks are hidden from callbacks unless a plugin opts in.
    #[serde(skip)]
    pub implicit: bool,
    /// Stable identity for deduplication across clones.
    #[serde(skip, default = "Uuid::new_v4")]
    pub uuid: Uuid,
}

fn default_loop_var() -> String {
    "item".to_string()
}

fn default_delay() -> u64 {
    5
}

fn default_poll() -> u64 {
    10
}

impl Task {
    /// Creates a task with the given name and action.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            args: IndexMap::new(),
            when: None,
            loop_: None,
            loop_var: default_loop_var(),
            retries: None,
            delay: default_delay(),
            until: None,
            changed_when: None,
            failed_when: None,
            register: None,
            ignore_errors: false,
            ignore_unreachable: false,
            notify: Vec::new(),
            vars: Variables::new(),
            async_secs: 0,
            poll_secs: default_poll(),
            implicit: false,
            uuid: Uuid::new_v4(),
        }
    }

    /// Creates an engine-generated meta task.
    pub fn meta(verb: impl Into<String>) -> Self {
        let mut task = Self::new("meta", "meta");
        task.args
            .insert("_raw_params".to_string(), Value::String(verb.into()));
        task.implicit = true;
        task
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    pub fn with_loop(mut self, source: Value) -> Self {
        self.loop_ = Some(source);
        self
    }

    pub fn with_register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    pub fn with_until(mut self, condition: impl Into<String>) -> Self {
        self.until = Some(condition.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay = seconds;
        self
    }

    pub fn with_notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// True if this is a meta task, handled by the strategy instead of
    /// being queued to a worker.
    pub fn is_meta(&self) -> bool {
        self.action == "meta"
    }

    /// The meta verb, for meta tasks.
    pub fn meta_verb(&self) -> Option<&str> {
        if !self.is_meta() {
            return None;
        }
        self.args.get("_raw_params").and_then(Value::as_str)
    }

    /// The effective maximum number of attempts.
    ///
    /// Defaults to 3 when `until` is set, otherwise 1; never below 1.
    pub fn effective_retries(&self) -> u32 {
        let base = match self.retries {
            Some(n) => n,
            None if self.until.is_some() => 3,
            None => 1,
        };
        base.max(1)
    }

    /// Produces an executable copy with templates resolved against
    /// `vars`. The name is templated leniently so an unresolvable name
    /// never fails a task; args are templated strictly. Conditionals
    /// (`when`, `until`, `changed_when`, `failed_when`) and the loop
    /// source are left untouched; they are evaluated later against
    /// attempt-specific snapshots.
    pub fn post_validate(&self, templar: &Templar, vars: &Variables) -> Result<Task> {
        let mut task = self.clone();
        task.name = templar.template_str(&self.name, vars, false)?;
        for value in task.args.values_mut() {
            *value = templar.template_value(value, vars, true)?;
        }
        Ok(task)
    }
}

/// A handler: a task that runs at flush points when notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    #[serde(flatten)]
    pub task: Task,
    /// Additional notification topics this handler subscribes to.
    #[serde(default)]
    pub listen: Vec<String>,
}

impl Handler {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            listen: Vec::new(),
        }
    }

    /// True if a notification with `topic` should trigger this handler.
    pub fn listens_to(&self, topic: &str) -> bool {
        self.task.name == topic || self.listen.iter().any(|l| l == topic)
    }
}

/// A play: an ordered task list applied to a host pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    #[serde(default)]
    pub name: String,
    /// Host pattern resolved against the inventory.
    #[serde(default = "default_hosts")]
    pub hosts: String,
    /// Strategy name; the configured default applies when absent.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub handlers: Vec<Handler>,
    /// Abort the play for all hosts as soon as any host fails.
    #[serde(default)]
    pub any_errors_fatal: bool,
}

fn default_hosts() -> String {
    "all".to_string()
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            strategy: None,
            vars: Variables::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
            any_errors_fatal: false,
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    /// Templates the play name and host pattern against play-level vars.
    pub fn post_validate(&self, templar: &Templar, vars: &Variables) -> Result<Play> {
        let mut play = self.clone();
        play.name = templar.template_str(&self.name, vars, false)?;
        play.hosts = templar.template_str(&self.hosts, vars, true)?;
        Ok(play)
    }

    /// Loads a list of plays from YAML.
    pub fn list_from_yaml_str(source: &str) -> Result<Vec<Play>> {
        Ok(serde_yaml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn effective_retries_defaults() {
        let plain = Task::new("t", "debug");
        assert_eq!(plain.effective_retries(), 1);

        let with_until = Task::new("t", "debug").with_until("result.rc == 0");
        assert_eq!(with_until.effective_retries(), 3);

        let explicit = Task::new("t", "debug").with_retries(5);
        assert_eq!(explicit.effective_retries(), 5);

        let zero = Task::new("t", "debug").with_retries(0);
        assert_eq!(zero.effective_retries(), 1);
    }

    #[test]
    fn meta_verb_extraction() {
        let task = Task::meta("flush_handlers");
        assert!(task.is_meta());
        assert_eq!(task.meta_verb(), Some("flush_handlers"));
        assert!(task.implicit);

        let plain = Task::new("t", "shell");
        assert_eq!(plain.meta_verb(), None);
    }

    #[test]
    fn post_validate_templates_name_leniently() {
        let templar = Templar::new();
        let task = Task::new("deploy {{ missing }}", "debug")
            .with_arg("msg", json!("hello {{ who }}"));
        let mut vars = Variables::new();
        vars.insert("who", json!("world"));

        let validated = task.post_validate(&templar, &vars).unwrap();
        assert_eq!(validated.name, "deploy {{ missing }}");
        assert_eq!(validated.args.get("msg"), Some(&json!("hello world")));
    }

    #[test]
    fn post_validate_strict_args() {
        let templar = Templar::new();
        let task = Task::new("t", "debug").with_arg("msg", json!("{{ missing }}"));
        assert!(task.post_validate(&templar, &Variables::new()).is_err());
    }

    #[test]
    fn handler_listen_matching() {
        let mut handler = Handler::new(Task::new("restart nginx", "shell"));
        handler.listen.push("web handlers".to_string());
        assert!(handler.listens_to("restart nginx"));
        assert!(handler.listens_to("web handlers"));
        assert!(!handler.listens_to("other"));
    }

    #[test]
    fn play_yaml_parsing() {
        let source = r#"
- name: demo
  hosts: web01
  tasks:
    - name: ping
      action: debug
      args:
        msg: hi
      retries: 2
      delay: 0
"#;
        let plays = Play::list_from_yaml_str(source).unwrap();
        assert_eq!(plays.len(), 1);
        let task = &plays[0].tasks[0];
        assert_eq!(task.retries, Some(2));
        assert_eq!(task.delay, 0);
        assert_eq!(task.loop_var, "item");
    }
}
