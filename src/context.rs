//! Run-scoped input shared read-only with every module.
//!
//! A [`GlobalRunContext`] is resolved once before a run starts (normally by
//! [`crate::config::RampartConfig::run_context`]) and is never mutated while
//! the coordinator walks the plan.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host facts supplied by the caller. The engine never inspects the OS itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    /// Package manager identifier (e.g. `apt`, `dnf`).
    pub package_manager: String,
    /// Capability flags such as `systemd` or `ufw`.
    pub capabilities: BTreeSet<String>,
}

impl HostProfile {
    /// Create a profile for the given package manager and capability flags.
    pub fn new<I, S>(package_manager: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            package_manager: package_manager.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` when the host advertises `flag`.
    pub fn has_capability(&self, flag: &str) -> bool {
        self.capabilities.contains(flag)
    }
}

/// Immutable input for a single run.
#[derive(Debug, Clone)]
pub struct GlobalRunContext {
    /// Unique identifier of this run, used for backup and report paths.
    pub run_id: Uuid,
    /// Preview changes instead of applying them.
    pub dry_run: bool,
    /// Save files listed by a module before its apply phase.
    pub backup_configs: bool,
    /// Enabled module names in caller order.
    pub enabled_modules: Vec<String>,
    /// Module-scoped key/value configuration.
    pub module_config: BTreeMap<String, BTreeMap<String, String>>,
    /// Host facts (package manager, capability flags).
    pub host: HostProfile,
    /// Root directory for per-run config backups.
    pub backup_root: PathBuf,
    /// Run-wide bound for each command a module spawns, unless the module
    /// sets its own.
    pub command_timeout: Option<Duration>,
}

impl GlobalRunContext {
    /// Create a context with a fresh run id and no module configuration.
    pub fn new<I, S>(enabled_modules: I, dry_run: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            backup_configs: false,
            enabled_modules: enabled_modules.into_iter().map(Into::into).collect(),
            module_config: BTreeMap::new(),
            host: HostProfile::default(),
            backup_root: std::env::temp_dir().join("rampart-backups"),
            command_timeout: Some(crate::coordinator::DEFAULT_MODULE_TIMEOUT),
        }
    }

    /// Configuration table for `module`, if any was supplied.
    pub fn config_for(&self, module: &str) -> Option<&BTreeMap<String, String>> {
        self.module_config.get(module)
    }

    /// Single configuration value for `module`.
    pub fn config_value(&self, module: &str, key: &str) -> Option<&str> {
        self.config_for(module)
            .and_then(|table| table.get(key))
            .map(String::as_str)
    }

    /// Directory holding backups for `module` in this run.
    pub fn backup_dir_for(&self, module: &str) -> PathBuf {
        self.backup_root
            .join(self.run_id.to_string())
            .join(module)
    }
}
