//! The module contract: a named, independently applicable hardening unit.
//!
//! `apply` is mandatory; `pre_check` and `validate` are optional and only
//! invoked when advertised through [`Operations`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::GlobalRunContext;
use crate::exec::ExecError;

pub mod backup;
pub mod command;

pub use command::{CommandModule, ModuleDefinition};

/// Optional operations a module implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operations {
    /// The module exposes a readiness gate.
    pub pre_check: bool,
    /// The module exposes a post-apply confirmation.
    pub validate: bool,
}

impl Operations {
    /// Only `apply`.
    pub const APPLY_ONLY: Self = Self {
        pre_check: false,
        validate: false,
    };

    /// `pre_check`, `apply` and `validate`.
    pub const ALL: Self = Self {
        pre_check: true,
        validate: true,
    };
}

/// Result of a pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The module can run.
    Ready,
    /// The module should be skipped.
    NotReady {
        /// Why the module is not ready.
        reason: String,
    },
}

/// Result of a post-apply validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// The change is confirmed.
    Passed {
        /// Human-readable confirmation.
        detail: String,
    },
    /// The change could not be confirmed.
    Failed {
        /// Human-readable reason.
        detail: String,
    },
}

/// Errors a module operation can report.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The operation ran and reported failure.
    #[error("{detail}")]
    Failed {
        /// Failure detail from the module.
        detail: String,
    },
    /// The operation exceeded its time bound.
    #[error("timed out after {seconds}s")]
    TimedOut {
        /// Time bound in seconds.
        seconds: u64,
    },
    /// The underlying command could not be executed.
    #[error(transparent)]
    Exec(ExecError),
    /// The module definition cannot be used.
    #[error("invalid module definition: {0}")]
    InvalidDefinition(String),
}

impl ModuleError {
    /// Shorthand for [`ModuleError::Failed`].
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed {
            detail: detail.into(),
        }
    }
}

impl From<ExecError> for ModuleError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { seconds } => Self::TimedOut { seconds },
            other => Self::Exec(other),
        }
    }
}

/// A hardening module the coordinator can drive.
#[async_trait]
pub trait HardeningModule: Send + Sync {
    /// Unique, run-stable module name.
    fn name(&self) -> &str;

    /// Names of modules that must run before this one.
    fn dependencies(&self) -> &BTreeSet<String>;

    /// Which optional operations are implemented.
    fn operations(&self) -> Operations {
        Operations::APPLY_ONLY
    }

    /// Per-module time bound overriding the run default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Files to save before `apply` when config backups are enabled.
    fn backup_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Readiness gate. Only called when [`Operations::pre_check`] is set.
    async fn pre_check(&self, _ctx: &GlobalRunContext) -> Result<Readiness, ModuleError> {
        Ok(Readiness::Ready)
    }

    /// Apply the desired state, returning a success detail.
    async fn apply(&self, ctx: &GlobalRunContext) -> Result<String, ModuleError>;

    /// Human-readable description of what `apply` would change.
    fn preview(&self, ctx: &GlobalRunContext) -> String;

    /// Post-apply confirmation. Only called when [`Operations::validate`] is set.
    async fn validate(&self, _ctx: &GlobalRunContext) -> Result<CheckResult, ModuleError> {
        Ok(CheckResult::Passed {
            detail: "no validation defined".to_owned(),
        })
    }
}

/// Returns `true` for names made of 1..=64 `[A-Za-z0-9_-]` characters.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
