//! Per-host run statistics.

use indexmap::IndexMap;
use serde::Serialize;

/// Counters tracked for a single host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub ok: u64,
    pub changed: u64,
    pub dark: u64,
    pub failures: u64,
    pub skipped: u64,
    pub ignored: u64,
    pub rescued: u64,
}

/// Which counter to adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Ok,
    Changed,
    Dark,
    Failures,
    Skipped,
    Ignored,
    Rescued,
}

/// Aggregated statistics across all hosts of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    hosts: IndexMap<String, HostStats>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, kind: StatKind, host: &str) {
        let entry = self.hosts.entry(host.to_string()).or_default();
        *counter(entry, kind) += 1;
    }

    pub fn decrement(&mut self, kind: StatKind, host: &str) {
        let entry = self.hosts.entry(host.to_string()).or_default();
        let c = counter(entry, kind);
        *c = c.saturating_sub(1);
    }

    pub fn host(&self, host: &str) -> HostStats {
        self.hosts.get(host).copied().unwrap_or_default()
    }

    /// Hosts seen so far, in first-touch order.
    pub fn hosts(&self) -> impl Iterator<Item = (&String, &HostStats)> {
        self.hosts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn counter(stats: &mut HostStats, kind: StatKind) -> &mut u64 {
    match kind {
        StatKind::Ok => &mut stats.ok,
        StatKind::Changed => &mut stats.changed,
        StatKind::Dark => &mut stats.dark,
        StatKind::Failures => &mut stats.failures,
        StatKind::Skipped => &mut stats.skipped,
        StatKind::Ignored => &mut stats.ignored,
        StatKind::Rescued => &mut stats.rescued,
    }
}
