//! Variables and the variable manager.
//!
//! `Variables` is an ordered string-to-JSON map used for play vars,
//! host vars, task vars, and the per-(host, task) snapshots handed to
//! workers. Merging follows "later wins" semantics.
//!
//! The `VariableManager` owns cross-task state the engine accumulates
//! while a play runs: per-host facts (`set_fact`) and registered task
//! results. Workers never touch it; results flow back over the result
//! channel and the controlling task folds them in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inventory::Host;
use crate::playbook::Play;

/// An ordered map of variable names to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(pub IndexMap<String, Value>);

impl Variables {
    /// Creates an empty variable map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a variable, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Looks up a variable by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the variable is defined.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merges `other` into `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Variables) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Returns a new map with `other` merged on top of `self`.
    pub fn merged(&self, other: &Variables) -> Variables {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Holds per-host engine state that outlives a single task: facts set
/// by `set_fact` actions and results stored via `register`.
///
/// Only the controlling task mutates this; workers receive read-only
/// snapshots built by [`VariableManager::get_vars`].
#[derive(Debug, Default)]
pub struct VariableManager {
    host_facts: IndexMap<String, Variables>,
    extra_vars: Variables,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets extra vars, which take the highest precedence in snapshots.
    pub fn set_extra_vars(&mut self, vars: Variables) {
        self.extra_vars = vars;
    }

    /// Stores one fact (or registered result) for a host.
    pub fn set_host_fact(&mut self, host: &str, key: impl Into<String>, value: Value) {
        self.host_facts
            .entry(host.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Stores a batch of facts for a host.
    pub fn set_host_facts(&mut self, host: &str, facts: &Variables) {
        self.host_facts
            .entry(host.to_string())
            .or_default()
            .merge(facts);
    }

    /// Drops all facts recorded for a host.
    pub fn clear_facts(&mut self, host: &str) {
        self.host_facts.shift_remove(host);
    }

    /// Returns the facts recorded for a host, if any.
    pub fn host_facts(&self, host: &str) -> Option<&Variables> {
        self.host_facts.get(host)
    }

    /// Builds the variable snapshot for one (play, host) pair.
    ///
    /// Precedence, lowest to highest: play vars, host vars, host facts
    /// and registered results, extra vars. The magic variable
    /// `inventory_hostname` is always present.
    pub fn get_vars(&self, play: &Play, host: &Host) -> Variables {
        let mut vars = play.vars.clone();
        vars.merge(&host.vars);
        if let Some(facts) = self.host_facts.get(&host.name) {
            vars.merge(facts);
        }
        vars.merge(&self.extra_vars);
        vars.insert("inventory_hostname", Value::String(host.name.clone()));
        vars
    }

    /// Builds the play-level snapshot used for play post-validation,
    /// before any host is selected.
    pub fn get_play_vars(&self, play: &Play) -> Variables {
        play.vars.merged(&self.extra_vars)
    }
}
