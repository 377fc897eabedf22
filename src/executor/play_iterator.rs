//! Per-host play progression.
//!
//! The iterator owns one cursor per host and hands out the next task
//! for each host independently, which is what lets the linear and free
//! strategies share a single state machine. Terminal states (failed,
//! removed, ended) are sticky for the rest of the play.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::playbook::{Play, Task};

/// Where a host currently stands in the play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not yet handed its next task.
    Pending,
    /// Walking the task list.
    Running,
    /// Ran out of tasks.
    Complete,
    /// A fatal task failure stopped this host.
    Failed,
    /// Removed from the play (unreachable or `end_host`).
    Removed,
}

impl RunState {
    fn is_terminal(self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed | RunState::Removed)
    }
}

#[derive(Debug, Clone)]
struct HostCursor {
    task_idx: usize,
    state: RunState,
}

impl HostCursor {
    fn new() -> Self {
        Self {
            task_idx: 0,
            state: RunState::Pending,
        }
    }
}

/// Tracks the progress of every host through one play.
#[derive(Debug)]
pub struct PlayIterator {
    play: Arc<Play>,
    tasks: Vec<Arc<Task>>,
    states: IndexMap<String, HostCursor>,
    notifications: IndexMap<String, Vec<String>>,
    /// Set by an `end_play` meta task; strategies stop scheduling once
    /// this flips.
    pub end_play: bool,
}

impl PlayIterator {
    /// Builds the iterator, pre-marking hosts that already failed or
    /// went unreachable in an earlier play of the same run.
    pub fn new<'a>(
        play: Arc<Play>,
        hosts: impl IntoIterator<Item = &'a str>,
        failed: impl Fn(&str) -> bool,
        unreachable: impl Fn(&str) -> bool,
    ) -> Self {
        let tasks = play.tasks.iter().cloned().map(Arc::new).collect();
        let mut states = IndexMap::new();
        for host in hosts {
            let mut cursor = HostCursor::new();
            if unreachable(host) {
                cursor.state = RunState::Removed;
            } else if failed(host) {
                cursor.state = RunState::Failed;
            }
            states.insert(host.to_string(), cursor);
        }
        Self {
            play,
            tasks,
            states,
            notifications: IndexMap::new(),
            end_play: false,
        }
    }

    pub fn play(&self) -> &Arc<Play> {
        &self.play
    }

    /// Hosts in the batch, in inventory order.
    pub fn hosts(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Hosts still eligible to receive tasks.
    pub fn active_hosts(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, c)| !c.state.is_terminal())
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// Returns the next task for a host and advances its cursor.
    /// Terminal hosts get `None`.
    pub fn next_task_for_host(&mut self, host: &str) -> Option<Arc<Task>> {
        if self.end_play {
            return None;
        }
        let cursor = self.states.get_mut(host)?;
        if cursor.state.is_terminal() {
            return None;
        }
        match self.tasks.get(cursor.task_idx) {
            Some(task) => {
                cursor.task_idx += 1;
                cursor.state = RunState::Running;
                Some(Arc::clone(task))
            }
            None => {
                cursor.state = RunState::Complete;
                None
            }
        }
    }

    /// Looks at a host's next task without advancing.
    pub fn peek_task_for_host(&self, host: &str) -> Option<Arc<Task>> {
        if self.end_play {
            return None;
        }
        let cursor = self.states.get(host)?;
        if cursor.state.is_terminal() {
            return None;
        }
        self.tasks.get(cursor.task_idx).map(Arc::clone)
    }

    /// Marks a host as fatally failed.
    pub fn mark_host_failed(&mut self, host: &str) {
        if let Some(cursor) = self.states.get_mut(host) {
            cursor.state = RunState::Failed;
        }
    }

    /// Removes a host from the play (unreachable hosts).
    pub fn mark_host_removed(&mut self, host: &str) {
        if let Some(cursor) = self.states.get_mut(host) {
            cursor.state = RunState::Removed;
        }
    }

    /// `end_host` meta: the host stops early but counts as complete.
    pub fn end_host(&mut self, host: &str) {
        if let Some(cursor) = self.states.get_mut(host) {
            cursor.state = RunState::Complete;
            cursor.task_idx = self.tasks.len();
        }
    }

    /// `clear_host_errors` meta: failed hosts resume from where they
    /// stopped. Removed hosts stay removed.
    pub fn clear_host_errors(&mut self) {
        for cursor in self.states.values_mut() {
            if cursor.state == RunState::Failed {
                cursor.state = RunState::Running;
            }
        }
    }

    pub fn host_state(&self, host: &str) -> Option<RunState> {
        self.states.get(host).map(|c| c.state)
    }

    pub fn is_failed(&self, host: &str) -> bool {
        self.host_state(host) == Some(RunState::Failed)
    }

    /// Hosts that ended the play in the failed state.
    pub fn get_failed_hosts(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, c)| c.state == RunState::Failed)
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// True once every host has reached a terminal state.
    pub fn all_complete(&self) -> bool {
        self.end_play || self.states.values().all(|c| c.state.is_terminal())
    }

    /// Records a handler notification for a host. Duplicate topics are
    /// collapsed so a handler fires at most once per flush.
    pub fn add_notification(&mut self, host: &str, topic: impl Into<String>) {
        let topic = topic.into();
        let topics = self.notifications.entry(host.to_string()).or_default();
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    /// Takes and clears all pending notifications for a host.
    pub fn take_notifications(&mut self, host: &str) -> Vec<String> {
        self.notifications.shift_remove(host).unwrap_or_default()
    }

    pub fn has_notifications(&self) -> bool {
        self.notifications.values().any(|t| !t.is_empty())
    }
}
