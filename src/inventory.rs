//! Hosts and the inventory lookup collaborator.
//!
//! The engine only needs name-based lookup and simple pattern
//! resolution (`all`, exact names, comma-separated lists). Richer
//! grouping and dynamic sources live outside the execution core.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vars::Variables;

/// An addressable target host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Unique host name.
    pub name: String,
    /// Optional connection address; defaults to the name.
    #[serde(default)]
    pub address: Option<String>,
    /// Host-specific variables.
    #[serde(default)]
    pub vars: Variables,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            vars: Variables::new(),
        }
    }

    /// The address tasks should target.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// A collection of hosts keyed by name, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host, replacing any host with the same name.
    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.name.clone(), host);
    }

    /// Looks up one host by name.
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Looks up one host by name, failing if it is unknown.
    pub fn require_host(&self, name: &str) -> Result<&Host> {
        self.get_host(name)
            .ok_or_else(|| Error::HostNotFound(name.to_string()))
    }

    /// Resolves a host pattern to a list of hosts.
    ///
    /// Supported patterns: `all`, a single host name, or a
    /// comma-separated list of names. Unknown names are skipped.
    pub fn get_hosts(&self, pattern: &str) -> Vec<Host> {
        if pattern == "all" || pattern == "*" {
            return self.hosts.values().cloned().collect();
        }
        pattern
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|name| self.hosts.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Loads an inventory from a YAML mapping of host name to vars.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let raw: IndexMap<String, Option<Variables>> = serde_yaml::from_str(source)?;
        let mut inventory = Inventory::new();
        for (name, vars) in raw {
            let mut host = Host::new(name);
            if let Some(vars) = vars {
                host.vars = vars;
            }
            inventory.add_host(host);
        }
        Ok(inventory)
    }
}
