//! The built-in stdout narrator.

use colored::Colorize;
use serde_json::Value;

use crate::callback::{CallbackPlugin, CallbackType};
use crate::error::Result;
use crate::executor::stats::RunStats;
use crate::executor::task_result::TaskResult;
use crate::playbook::{Play, Task};

/// Prints the run the way operators expect: play and task banners,
/// one status line per host, a recap at the end.
pub struct DefaultCallback {
    failed_to_stderr: bool,
}

impl DefaultCallback {
    pub fn new() -> Self {
        Self {
            failed_to_stderr: false,
        }
    }

    /// Routes failed-task lines to stderr instead of stdout.
    pub fn with_failed_stderr(mut self) -> Self {
        self.failed_to_stderr = true;
        self
    }

    fn banner(&self, kind: &str, name: &str) {
        let title = format!("{kind} [{name}]");
        let pad = 79usize.saturating_sub(title.len() + 1);
        println!("\n{title} {}", "*".repeat(pad));
    }

    fn item_suffix(result: &TaskResult) -> String {
        match result.result.get(&result.task.loop_var) {
            Some(item) => format!(" (item={})", compact(item)),
            None => String::new(),
        }
    }
}

impl Default for DefaultCallback {
    fn default() -> Self {
        Self::new()
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl CallbackPlugin for DefaultCallback {
    fn name(&self) -> &str {
        "default"
    }

    fn callback_type(&self) -> CallbackType {
        CallbackType::Stdout
    }

    fn on_play_start(&self, play: &Play, _pattern: &str) -> Result<()> {
        let name = if play.name.is_empty() {
            &play.hosts
        } else {
            &play.name
        };
        self.banner("PLAY", name);
        Ok(())
    }

    fn on_task_start(&self, task: &Task) -> Result<()> {
        self.banner("TASK", &task.name);
        Ok(())
    }

    fn on_runner_ok(&self, result: &TaskResult) -> Result<()> {
        let line = if result.is_changed() {
            format!("changed: [{}]", result.host).yellow()
        } else {
            format!("ok: [{}]", result.host).green()
        };
        println!("{line}");
        Ok(())
    }

    fn on_runner_failed(&self, result: &TaskResult, ignore_errors: bool) -> Result<()> {
        let detail = serde_json::to_string(&result.clean_copy()).unwrap_or_default();
        let line = format!("fatal: [{}]: FAILED! => {detail}", result.host).red();
        if self.failed_to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        if ignore_errors {
            println!("{}", "...ignoring".cyan());
        }
        Ok(())
    }

    fn on_runner_skipped(&self, result: &TaskResult) -> Result<()> {
        println!("{}", format!("skipping: [{}]", result.host).cyan());
        Ok(())
    }

    fn on_runner_unreachable(&self, result: &TaskResult) -> Result<()> {
        let msg = result.message().unwrap_or("host unreachable");
        println!(
            "{}",
            format!("fatal: [{}]: UNREACHABLE! => {msg}", result.host).red()
        );
        Ok(())
    }

    fn on_item_ok(&self, result: &TaskResult) -> Result<()> {
        let suffix = Self::item_suffix(result);
        let line = if result.is_changed() {
            format!("changed: [{}]{suffix}", result.host).yellow()
        } else {
            format!("ok: [{}]{suffix}", result.host).green()
        };
        println!("{line}");
        Ok(())
    }

    fn on_item_failed(&self, result: &TaskResult) -> Result<()> {
        let suffix = Self::item_suffix(result);
        println!(
            "{}",
            format!("failed: [{}]{suffix}", result.host).red()
        );
        Ok(())
    }

    fn on_item_skipped(&self, result: &TaskResult) -> Result<()> {
        let suffix = Self::item_suffix(result);
        println!(
            "{}",
            format!("skipping: [{}]{suffix}", result.host).cyan()
        );
        Ok(())
    }

    fn on_retry(&self, result: &TaskResult) -> Result<()> {
        let attempt = result.attempts().unwrap_or(0);
        let total = u64::from(result.task.effective_retries());
        println!(
            "{}",
            format!(
                "FAILED - RETRYING: {} ({} retries left)",
                result.task.name,
                total.saturating_sub(attempt)
            )
            .red()
        );
        Ok(())
    }

    fn on_stats(&self, stats: &RunStats) -> Result<()> {
        println!("\nPLAY RECAP {}", "*".repeat(68));
        for (host, s) in stats.hosts() {
            println!(
                "{:<26}: {}    {}    {}    {}    {}    {}    {}",
                host.as_str().bold(),
                format!("ok={}", s.ok).green(),
                format!("changed={}", s.changed).yellow(),
                format!("unreachable={}", s.dark).red(),
                format!("failed={}", s.failures).red(),
                format!("skipped={}", s.skipped).cyan(),
                format!("rescued={}", s.rescued).cyan(),
                format!("ignored={}", s.ignored).cyan(),
            );
        }
        println!();
        Ok(())
    }
}
