//! Shell-backed modules described by TOML manifests.
//!
//! A manifest names the module, its dependencies and host requirements, and
//! the shell commands implementing each operation:
//!
//! ```toml
//! name = "ssh"
//! depends_on = ["packages"]
//! requires = ["systemd"]
//! backup = ["/etc/ssh/sshd_config"]
//! preview = "Disable root login and password authentication"
//!
//! [commands]
//! pre_check = "command -v sshd"
//! apply = "sed -i 's/^#\\?PermitRootLogin.*/PermitRootLogin no/' /etc/ssh/sshd_config"
//! validate = "sshd -t"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    is_valid_module_name, CheckResult, HardeningModule, ModuleError, Operations, Readiness,
};
use crate::context::GlobalRunContext;
use crate::exec::{config_env_name, ExecOptions, ShellRunner};

/// Upper bound for a manifest's `timeout_secs`.
pub const MAX_MODULE_TIMEOUT_SECS: u64 = 86_400;

/// Shell commands implementing a module's operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleCommands {
    /// Readiness gate; exit 0 means ready.
    #[serde(default)]
    pub pre_check: Option<String>,
    /// Change application.
    pub apply: String,
    /// Post-apply confirmation; exit 0 means confirmed.
    #[serde(default)]
    pub validate: Option<String>,
}

/// A module manifest as read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDefinition {
    /// Module name; defaults to the manifest file stem.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Modules that must run first.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Host capability flags required to run.
    #[serde(default)]
    pub requires: BTreeSet<String>,
    /// Package managers the module supports; empty means any.
    #[serde(default)]
    pub package_managers: BTreeSet<String>,
    /// Absolute paths saved before apply when backups are enabled.
    #[serde(default)]
    pub backup: Vec<PathBuf>,
    /// Dry-run description of the change.
    #[serde(default)]
    pub preview: Option<String>,
    /// Per-module time bound in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Operation commands.
    pub commands: ModuleCommands,
}

impl ModuleDefinition {
    /// Parse a manifest, defaulting the name to `fallback_name`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidDefinition`] if the TOML is malformed or
    /// the definition breaks a validation rule.
    pub fn parse(contents: &str, fallback_name: &str) -> Result<Self, ModuleError> {
        let mut def: ModuleDefinition = toml::from_str(contents)
            .map_err(|e| ModuleError::InvalidDefinition(e.to_string()))?;
        if def.name.is_empty() {
            fallback_name.clone_into(&mut def.name);
        }
        def.validate()?;
        Ok(def)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidDefinition`] if the file cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ModuleError::InvalidDefinition(format!("failed to read {}: {e}", path.display()))
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::parse(&contents, stem)
    }

    /// Check the definition's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidDefinition`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ModuleError> {
        let invalid = |msg: String| Err(ModuleError::InvalidDefinition(msg));

        if !is_valid_module_name(&self.name) {
            return invalid(format!(
                "invalid module name {:?}; expected 1-64 of [A-Za-z0-9_-]",
                self.name
            ));
        }
        if self.commands.apply.trim().is_empty() {
            return invalid(format!("module '{}' has an empty apply command", self.name));
        }
        if self.depends_on.contains(&self.name) {
            return invalid(format!("module '{}' depends on itself", self.name));
        }
        if let Some(dep) = self.depends_on.iter().find(|d| !is_valid_module_name(d)) {
            return invalid(format!(
                "module '{}' has invalid dependency name {dep:?}",
                self.name
            ));
        }
        if let Some(secs) = self.timeout_secs {
            if secs == 0 || secs > MAX_MODULE_TIMEOUT_SECS {
                return invalid(format!(
                    "invalid timeout_secs {secs}; expected 1..={MAX_MODULE_TIMEOUT_SECS}"
                ));
            }
        }
        if let Some(path) = self.backup.iter().find(|p| !p.is_absolute()) {
            return invalid(format!(
                "backup path must be absolute: {}",
                path.display()
            ));
        }
        Ok(())
    }
}

/// A module whose operations are shell commands.
#[derive(Debug, Clone)]
pub struct CommandModule {
    definition: ModuleDefinition,
    runner: ShellRunner,
    source: Option<PathBuf>,
}

impl CommandModule {
    /// Wrap a validated definition.
    pub fn new(definition: ModuleDefinition) -> Self {
        Self {
            definition,
            runner: ShellRunner::default(),
            source: None,
        }
    }

    /// Load a module from a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidDefinition`] if the manifest is unusable.
    pub fn from_file(path: &Path) -> Result<Self, ModuleError> {
        let definition = ModuleDefinition::load(path)?;
        Ok(Self {
            definition,
            runner: ShellRunner::default(),
            source: Some(path.to_path_buf()),
        })
    }

    /// Replace the shell runner.
    #[must_use]
    pub fn with_runner(mut self, runner: ShellRunner) -> Self {
        self.runner = runner;
        self
    }

    /// The underlying manifest.
    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    /// Manifest file this module was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Environment exported to every command of this module.
    pub fn environment(&self, ctx: &GlobalRunContext) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(table) = ctx.config_for(&self.definition.name) {
            for (key, value) in table {
                env.insert(config_env_name(key), value.clone());
            }
        }
        env.insert("RAMPART_MODULE".to_owned(), self.definition.name.clone());
        env.insert("RAMPART_RUN_ID".to_owned(), ctx.run_id.to_string());
        env.insert("RAMPART_DRY_RUN".to_owned(), ctx.dry_run.to_string());
        env.insert(
            "RAMPART_BACKUP_CONFIGS".to_owned(),
            ctx.backup_configs.to_string(),
        );
        env.insert(
            "RAMPART_PACKAGE_MANAGER".to_owned(),
            ctx.host.package_manager.clone(),
        );
        env
    }

    /// Host requirement the context does not meet, if any.
    fn unmet_requirement(&self, ctx: &GlobalRunContext) -> Option<String> {
        if let Some(flag) = self
            .definition
            .requires
            .iter()
            .find(|flag| !ctx.host.has_capability(flag))
        {
            return Some(format!("host lacks required capability '{flag}'"));
        }
        let managers = &self.definition.package_managers;
        if !managers.is_empty() && !managers.contains(&ctx.host.package_manager) {
            return Some(format!(
                "package manager '{}' not supported",
                ctx.host.package_manager
            ));
        }
        None
    }

    async fn run_command(
        &self,
        command: &str,
        ctx: &GlobalRunContext,
    ) -> Result<crate::exec::ExecResult, ModuleError> {
        let opts = ExecOptions {
            timeout: self.timeout().or(ctx.command_timeout),
            env: self.environment(ctx),
        };
        debug!(module = %self.definition.name, "running module command");
        Ok(self.runner.run(command, &opts).await?)
    }
}

#[async_trait]
impl HardeningModule for CommandModule {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn dependencies(&self) -> &BTreeSet<String> {
        &self.definition.depends_on
    }

    fn operations(&self) -> Operations {
        let has_requirements =
            !self.definition.requires.is_empty() || !self.definition.package_managers.is_empty();
        Operations {
            pre_check: self.definition.commands.pre_check.is_some() || has_requirements,
            validate: self.definition.commands.validate.is_some(),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.definition.timeout_secs.map(Duration::from_secs)
    }

    fn backup_paths(&self) -> Vec<PathBuf> {
        self.definition.backup.clone()
    }

    async fn pre_check(&self, ctx: &GlobalRunContext) -> Result<Readiness, ModuleError> {
        if let Some(reason) = self.unmet_requirement(ctx) {
            return Ok(Readiness::NotReady { reason });
        }
        let Some(command) = self.definition.commands.pre_check.as_deref() else {
            return Ok(Readiness::Ready);
        };
        let result = self.run_command(command, ctx).await?;
        if result.success() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::NotReady {
                reason: result.detail(),
            })
        }
    }

    async fn apply(&self, ctx: &GlobalRunContext) -> Result<String, ModuleError> {
        let result = self.run_command(&self.definition.commands.apply, ctx).await?;
        if result.success() {
            let output = result.output();
            if output.is_empty() {
                Ok("applied".to_owned())
            } else {
                Ok(result.detail())
            }
        } else {
            Err(ModuleError::failed(result.detail()))
        }
    }

    fn preview(&self, _ctx: &GlobalRunContext) -> String {
        match &self.definition.preview {
            Some(text) if !text.trim().is_empty() => text.trim().to_owned(),
            _ => format!("would run: {}", self.definition.commands.apply.trim()),
        }
    }

    async fn validate(&self, ctx: &GlobalRunContext) -> Result<CheckResult, ModuleError> {
        let Some(command) = self.definition.commands.validate.as_deref() else {
            return Ok(CheckResult::Passed {
                detail: "no validation defined".to_owned(),
            });
        };
        let result = self.run_command(command, ctx).await?;
        let detail = result.detail();
        if result.success() {
            Ok(CheckResult::Passed { detail })
        } else {
            Ok(CheckResult::Failed { detail })
        }
    }
}
