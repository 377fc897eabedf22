//! Engine configuration.
//!
//! Tunables for the task queue manager: pool sizing, worker reaping,
//! the internal result-poll interval, and the item-squash extension
//! point. All fields have serde defaults so a partial YAML/JSON config
//! deserializes cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the task queue manager and its strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of parallel workers. The pool allocated for a
    /// play is `min(forks, hosts in the batch)`.
    pub forks: usize,
    /// Strategy used when a play does not name one.
    pub default_strategy: String,
    /// Number of poll rounds to wait for workers to finish on their own
    /// before escalating to forced termination.
    pub reap_poll_count: u32,
    /// Delay between reap poll rounds, in milliseconds.
    pub reap_poll_delay_ms: u64,
    /// Sleep between result-channel drains while waiting on pending
    /// results, in milliseconds.
    pub internal_poll_interval_ms: u64,
    /// Bulk package actions whose loop items may be squashed into a
    /// single invocation when every item passes its conditional check.
    /// Squashing changes efficiency, never correctness.
    pub squash_actions: Vec<String>,
    /// Route failed-task output through stderr in the stdout callback.
    pub display_failed_stderr: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forks: 5,
            default_strategy: "linear".to_string(),
            reap_poll_count: 30,
            reap_poll_delay_ms: 100,
            internal_poll_interval_ms: 1,
            squash_actions: ["apt", "dnf", "pacman", "pkgng", "yum", "zypper"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            display_failed_stderr: false,
        }
    }
}

impl Config {
    /// Delay between reap poll rounds.
    pub fn reap_poll_delay(&self) -> Duration {
        Duration::from_millis(self.reap_poll_delay_ms)
    }

    /// Sleep used between result-channel drains.
    pub fn internal_poll_interval(&self) -> Duration {
        Duration::from_millis(self.internal_poll_interval_ms)
    }

    /// Returns true if loop items for this action may be squashed.
    pub fn is_squashable(&self, action: &str) -> bool {
        self.squash_actions.iter().any(|a| a == action)
    }
}
