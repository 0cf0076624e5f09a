//! Configuration loading for rampart.
//!
//! Loads `rampart.toml` from `--config`, `$RAMPART_CONFIG`, or
//! `/etc/rampart/rampart.toml`. Every section uses `#[serde(default)]` so a
//! minimal or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::{GlobalRunContext, HostProfile};
use crate::coordinator::{CoordinatorOptions, FailurePolicy};
use crate::module::command::MAX_MODULE_TIMEOUT_SECS;
use crate::module::is_valid_module_name;
use crate::resolver::ResolutionPolicy;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rampart/rampart.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level rampart configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RampartConfig {
    /// Run behavior (`[run]`).
    pub run: RunConfig,
    /// Enabled modules (`[modules]`).
    pub modules: ModulesConfig,
    /// Module-scoped key/value settings (`[module.<name>]`).
    pub module: BTreeMap<String, BTreeMap<String, toml::Value>>,
    /// Host facts (`[host]`).
    pub host: HostConfig,
    /// Filesystem locations (`[paths]`).
    pub paths: PathsConfig,
}

impl RampartConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicit `path` must exist. Without one, `$RAMPART_CONFIG` or the
    /// default location is used, and a missing default file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`RampartConfig::load`] with a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`RampartConfig::load`].
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => match env("RAMPART_CONFIG") {
                Some(p) => Self::load_from(Path::new(&p))?,
                None => Self::load_default()?,
            },
        };
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file that must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        tracing::info!(path = %path.display(), "loading config from file");
        Self::from_toml(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: RampartConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("RAMPART_DRY_RUN") {
            match parse_bool(&v) {
                Some(b) => self.run.dry_run = b,
                None => warn_invalid("RAMPART_DRY_RUN", &v),
            }
        }
        if let Some(v) = env("RAMPART_BACKUP_CONFIGS") {
            match parse_bool(&v) {
                Some(b) => self.run.backup_configs = b,
                None => warn_invalid("RAMPART_BACKUP_CONFIGS", &v),
            }
        }
        if let Some(v) = env("RAMPART_MODULE_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(n) => self.run.module_timeout_secs = n,
                Err(_) => warn_invalid("RAMPART_MODULE_TIMEOUT_SECS", &v),
            }
        }
        if let Some(v) = env("RAMPART_MODULES") {
            self.modules.enabled = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = env("RAMPART_MODULES_DIR") {
            self.paths.modules_dir = PathBuf::from(v);
        }
        if let Some(v) = env("RAMPART_PACKAGE_MANAGER") {
            self.host.package_manager = v;
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.run.module_timeout_secs > MAX_MODULE_TIMEOUT_SECS {
            anyhow::bail!(
                "run.module_timeout_secs {} exceeds {MAX_MODULE_TIMEOUT_SECS}",
                self.run.module_timeout_secs
            );
        }
        if let Some(name) = self
            .modules
            .enabled
            .iter()
            .find(|n| !is_valid_module_name(n))
        {
            anyhow::bail!("invalid module name {name:?} in modules.enabled");
        }
        for (module, table) in &self.module {
            for (key, value) in table {
                if scalar_to_string(value).is_none() {
                    anyhow::bail!(
                        "module.{module}.{key} must be a string, number or boolean"
                    );
                }
            }
        }
        Ok(())
    }

    /// String form of the module-scoped settings.
    pub fn module_settings(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.module
            .iter()
            .map(|(module, table)| {
                let values = table
                    .iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                    .collect();
                (module.clone(), values)
            })
            .collect()
    }

    /// Build the immutable run input.
    pub fn run_context(&self) -> GlobalRunContext {
        GlobalRunContext {
            run_id: Uuid::new_v4(),
            dry_run: self.run.dry_run,
            backup_configs: self.run.backup_configs,
            enabled_modules: self.modules.enabled.clone(),
            module_config: self.module_settings(),
            host: HostProfile {
                package_manager: self.host.package_manager.clone(),
                capabilities: self.host.capabilities.iter().cloned().collect(),
            },
            backup_root: self.paths.backup_dir.clone(),
            command_timeout: self.module_timeout(),
        }
    }

    fn module_timeout(&self) -> Option<Duration> {
        match self.run.module_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Coordinator options from `[run]`. A zero timeout disables the bound.
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            module_timeout: self.module_timeout(),
            failure_policy: self.run.on_failure,
            resolution_policy: self.run.resolution,
        }
    }
}

// ── Run config ──────────────────────────────────────────────────

/// Run behavior (`[run]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Preview instead of applying. Defaults to `true`.
    pub dry_run: bool,
    /// Save module config files before apply.
    pub backup_configs: bool,
    /// Cycle handling.
    pub resolution: ResolutionPolicy,
    /// Dependency-failure cascading.
    pub on_failure: FailurePolicy,
    /// Per-phase time bound in seconds; 0 disables it.
    pub module_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            backup_configs: true,
            resolution: ResolutionPolicy::BestEffort,
            on_failure: FailurePolicy::Continue,
            module_timeout_secs: 600,
        }
    }
}

// ── Modules config ──────────────────────────────────────────────

/// Enabled modules (`[modules]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Module names in caller order.
    pub enabled: Vec<String>,
}

// ── Host config ─────────────────────────────────────────────────

/// Host facts (`[host]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Package manager identifier.
    pub package_manager: String,
    /// Capability flags.
    pub capabilities: Vec<String>,
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem locations (`[paths]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of module manifests.
    pub modules_dir: PathBuf,
    /// Root for per-run config backups.
    pub backup_dir: PathBuf,
    /// Where JSON run reports are written.
    pub report_dir: PathBuf,
    /// Where JSON log files are written.
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("/etc/rampart/modules.d"),
            backup_dir: PathBuf::from("/var/lib/rampart/backups"),
            report_dir: PathBuf::from("/var/log/rampart/reports"),
            logs_dir: PathBuf::from("/var/log/rampart"),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value = %value, "ignoring invalid env override");
}

// ── Tests ───────────────────────────────────────────────────────
