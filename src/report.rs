//! Run report aggregation and persistence.
//!
//! The coordinator feeds one [`ModuleOutcome`] per module into a
//! [`ReportBuilder`]; [`ReportBuilder::finalize`] freezes the tallies into a
//! read-only [`RunReport`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Classified result of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Applied (and validated, when a validator exists).
    Success,
    /// Applied but validation failed.
    Warning,
    /// Apply failed.
    Error,
    /// Not attempted: pre-check failed or a dependency failed.
    Skipped,
    /// Previewed only.
    DryRun,
    /// An operation exceeded its time bound.
    Timeout,
}

impl ModuleStatus {
    /// Lowercase label used in summaries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::DryRun => "dry-run",
            Self::Timeout => "timeout",
        }
    }

    /// Returns `true` for outcomes that fail the run.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

/// Phase at which a module finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Never started (missing module or failed dependency).
    NotStarted,
    /// Stopped by the readiness gate.
    PreCheck,
    /// Stopped in apply or dry-run preview.
    Apply,
    /// Stopped in validation.
    Validate,
    /// Ran every phase it has.
    Done,
}

/// Result of executing one module. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutcome {
    /// Module name.
    pub module_name: String,
    /// Classification.
    pub status: ModuleStatus,
    /// Human-readable message.
    pub detail: String,
    /// Phase the module finished in.
    pub phase: Phase,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
    /// Time spent on the module in milliseconds.
    pub duration_ms: u64,
}

impl ModuleOutcome {
    /// Outcome stamped with the current time and zero duration.
    pub fn new(
        module_name: impl Into<String>,
        status: ModuleStatus,
        phase: Phase,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            status,
            detail: detail.into(),
            phase,
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Set the elapsed time.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Per-status totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Successful modules.
    pub success: usize,
    /// Applied but unconfirmed modules.
    pub warning: usize,
    /// Failed modules.
    pub error: usize,
    /// Skipped modules.
    pub skipped: usize,
    /// Previewed modules.
    pub dry_run: usize,
    /// Timed-out modules.
    pub timeout: usize,
}

impl StatusCounts {
    /// Increment the bucket for `status`.
    pub fn bump(&mut self, status: ModuleStatus) {
        let bucket = match status {
            ModuleStatus::Success => &mut self.success,
            ModuleStatus::Warning => &mut self.warning,
            ModuleStatus::Error => &mut self.error,
            ModuleStatus::Skipped => &mut self.skipped,
            ModuleStatus::DryRun => &mut self.dry_run,
            ModuleStatus::Timeout => &mut self.timeout,
        };
        *bucket = bucket.saturating_add(1);
    }

    /// Count for `status`.
    pub fn get(&self, status: ModuleStatus) -> usize {
        match status {
            ModuleStatus::Success => self.success,
            ModuleStatus::Warning => self.warning,
            ModuleStatus::Error => self.error,
            ModuleStatus::Skipped => self.skipped,
            ModuleStatus::DryRun => self.dry_run,
            ModuleStatus::Timeout => self.timeout,
        }
    }

    /// Sum of every bucket.
    pub fn total(&self) -> usize {
        [
            self.success,
            self.warning,
            self.error,
            self.skipped,
            self.dry_run,
            self.timeout,
        ]
        .iter()
        .fold(0usize, |acc, n| acc.saturating_add(*n))
    }
}

/// Overall run classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No errors and no warnings.
    Success,
    /// Warnings but no errors.
    Warning,
    /// At least one error or timeout.
    Failed,
}

impl RunStatus {
    /// Derive the run status from tallies: errors beat warnings beat success.
    pub fn from_counts(counts: &StatusCounts) -> Self {
        if counts.error > 0 || counts.timeout > 0 {
            Self::Failed
        } else if counts.warning > 0 {
            Self::Warning
        } else {
            Self::Success
        }
    }

    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success | Self::Warning => 0,
            Self::Failed => 1,
        }
    }

    /// Returns `true` for [`RunStatus::Failed`].
    pub fn is_failure(self) -> bool {
        self == Self::Failed
    }
}

/// Finalized, read-only run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the report was finalized.
    pub finished_at: DateTime<Utc>,
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Overall classification.
    pub status: RunStatus,
    /// Per-status totals.
    pub counts: StatusCounts,
    /// `success / total`, 0 when nothing ran.
    pub success_rate: f64,
    /// Resolved execution order.
    pub plan: Vec<String>,
    /// Whether a dependency cycle forced best-effort ordering.
    pub plan_degraded: bool,
    /// Per-module outcomes in execution order.
    pub outcomes: Vec<ModuleOutcome>,
}

impl RunReport {
    /// Outcome recorded for `module`.
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.outcomes.iter().find(|o| o.module_name == module)
    }

    /// Status recorded for `module`.
    pub fn status_of(&self, module: &str) -> Option<ModuleStatus> {
        self.outcome(module).map(|o| o.status)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        let c = &self.counts;
        format!(
            "{} modules: {} success, {} warning, {} error, {} skipped, {} dry-run, {} timeout ({:.1}% success)",
            c.total(),
            c.success,
            c.warning,
            c.error,
            c.skipped,
            c.dry_run,
            c.timeout,
            self.success_rate * 100.0
        )
    }

    /// Write the report as pretty JSON to `<dir>/rampart-<run_id>.json`.
    ///
    /// Writes to a temporary file first, then renames it into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn write_json(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create report directory {}", dir.display()))?;

        let path = dir.join(format!("rampart-{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).context("failed to serialize run report")?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("failed to write report temp file")?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context("failed to rename report temp file")?;

        debug!(path = %path.display(), "run report written");
        Ok(path)
    }
}

/// Accumulates outcomes during a run.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    dry_run: bool,
    plan: Vec<String>,
    plan_degraded: bool,
    counts: StatusCounts,
    outcomes: Vec<ModuleOutcome>,
    seen: HashSet<String>,
}

impl ReportBuilder {
    /// Start a report for a run.
    pub fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            dry_run,
            plan: Vec::new(),
            plan_degraded: false,
            counts: StatusCounts::default(),
            outcomes: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Attach the resolved plan.
    pub fn set_plan(&mut self, plan: Vec<String>, degraded: bool) {
        self.plan = plan;
        self.plan_degraded = degraded;
    }

    /// Record an outcome. A module contributes at most one outcome; later
    /// outcomes for the same module are ignored. Returns whether it was kept.
    pub fn record(&mut self, outcome: ModuleOutcome) -> bool {
        if !self.seen.insert(outcome.module_name.clone()) {
            warn!(module = %outcome.module_name, "ignoring second outcome for module");
            return false;
        }
        self.counts.bump(outcome.status);
        self.outcomes.push(outcome);
        true
    }

    /// Current tallies.
    pub fn counts(&self) -> &StatusCounts {
        &self.counts
    }

    /// Outcome already recorded for `module`.
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.outcomes.iter().find(|o| o.module_name == module)
    }

    /// Freeze the tallies into a [`RunReport`].
    pub fn finalize(self) -> RunReport {
        let total = self.counts.total();
        let success_rate = if total == 0 {
            0.0
        } else {
            ratio(self.counts.success, total)
        };

        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            status: RunStatus::from_counts(&self.counts),
            counts: self.counts,
            success_rate,
            plan: self.plan,
            plan_degraded: self.plan_degraded,
            outcomes: self.outcomes,
        }
    }
}

/// `part / whole` as a float. Counts stay far below 2^32.
fn ratio(part: usize, whole: usize) -> f64 {
    let part = f64::from(u32::try_from(part).unwrap_or(u32::MAX));
    let whole = f64::from(u32::try_from(whole).unwrap_or(u32::MAX));
    part / whole
}
