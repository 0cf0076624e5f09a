//! Execution coordinator: drives each planned module through
//! pre-check, apply (or dry-run preview) and validate, strictly in plan order.
//!
//! Classification rules:
//! - a failed pre-check skips the module; it does not block dependents
//! - a failed apply is an error for that module only; the run continues
//! - a failed validate downgrades success to warning
//! - an operation outliving its time bound is a timeout
//!
//! Modules never run concurrently. Async is only used to bound and cancel a
//! phase that hangs.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::GlobalRunContext;
use crate::events::RunLogger;
use crate::module::backup::{self, BackupSet};
use crate::module::{CheckResult, HardeningModule, ModuleError, Readiness};
use crate::registry::ModuleRegistry;
use crate::report::{ModuleOutcome, ModuleStatus, Phase, ReportBuilder, RunReport};
use crate::resolver::{self, ExecutionPlan, ResolutionPolicy, ResolveError};

/// Default per-phase time bound: ten minutes.
pub const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(600);

/// How a failed module affects modules that depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Dependents still run; each module stands on its own.
    #[default]
    Continue,
    /// Dependents of an errored or timed-out module are skipped, transitively.
    SkipDependents,
}

/// Run-wide knobs for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Time bound applied to each phase unless a module overrides it.
    pub module_timeout: Option<Duration>,
    /// Dependency-failure cascading.
    pub failure_policy: FailurePolicy,
    /// Cycle handling during resolution.
    pub resolution_policy: ResolutionPolicy,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            module_timeout: Some(DEFAULT_MODULE_TIMEOUT),
            failure_policy: FailurePolicy::default(),
            resolution_policy: ResolutionPolicy::default(),
        }
    }
}

/// Executes resolved plans against a [`ModuleRegistry`].
pub struct Coordinator {
    registry: ModuleRegistry,
    logger: Arc<dyn RunLogger>,
    options: CoordinatorOptions,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Coordinator with default options.
    pub fn new(registry: ModuleRegistry, logger: Arc<dyn RunLogger>) -> Self {
        Self {
            registry,
            logger,
            options: CoordinatorOptions::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// The registry modules are drawn from.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Current options.
    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Resolve the execution order for `ctx` without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] on a cycle under [`ResolutionPolicy::Strict`].
    pub fn plan(&self, ctx: &GlobalRunContext) -> Result<ExecutionPlan, ResolveError> {
        resolver::resolve(
            &ctx.enabled_modules,
            &self.registry.dependency_map(),
            self.options.resolution_policy,
            self.logger.as_ref(),
        )
    }

    /// Execute every enabled module, previewing instead of applying when
    /// `ctx.dry_run` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when resolution fails; nothing has run then.
    pub async fn run(&self, ctx: &GlobalRunContext) -> Result<RunReport, ResolveError> {
        let plan = self.plan(ctx)?;
        let mut builder = ReportBuilder::new(ctx.run_id, ctx.dry_run);
        builder.set_plan(plan.order().to_vec(), plan.is_degraded());

        info!(
            run_id = %ctx.run_id,
            modules = plan.len(),
            dry_run = ctx.dry_run,
            "starting hardening run"
        );
        self.logger.info(&format!(
            "running {} module(s){}",
            plan.len(),
            if ctx.dry_run { " in dry-run mode" } else { "" }
        ));

        let mut failed: HashSet<String> = HashSet::new();

        for name in plan.order() {
            let started = Instant::now();

            let outcome = match self.failed_dependency(name, &failed) {
                Some(dep) => ModuleOutcome::new(
                    name.as_str(),
                    ModuleStatus::Skipped,
                    Phase::NotStarted,
                    format!("dependency '{dep}' failed"),
                ),
                None => self.execute_module(name, ctx).await,
            }
            .with_duration_ms(elapsed_ms(started));

            let blocked = outcome.phase == Phase::NotStarted
                && outcome.status == ModuleStatus::Skipped;
            if outcome.status.is_failure() || blocked {
                failed.insert(name.clone());
            }

            self.announce(&outcome);
            builder.record(outcome);
        }

        let report = builder.finalize();
        info!(run_id = %report.run_id, status = ?report.status, "hardening run finished");
        self.logger.info(&report.summary_line());
        Ok(report)
    }

    /// Run only the validate operation of every enabled module.
    ///
    /// Nothing is applied. Passing checks are successes, failing checks
    /// warnings, and modules without a validator are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when resolution fails.
    pub async fn validate_only(&self, ctx: &GlobalRunContext) -> Result<RunReport, ResolveError> {
        let plan = self.plan(ctx)?;
        let mut builder = ReportBuilder::new(ctx.run_id, true);
        builder.set_plan(plan.order().to_vec(), plan.is_degraded());

        self.logger
            .info(&format!("validating {} module(s)", plan.len()));

        for name in plan.order() {
            let started = Instant::now();
            let outcome = self
                .validate_module(name, ctx)
                .await
                .with_duration_ms(elapsed_ms(started));
            self.announce(&outcome);
            builder.record(outcome);
        }

        let report = builder.finalize();
        self.logger.info(&report.summary_line());
        Ok(report)
    }

    /// First enabled dependency of `name` that failed, under `SkipDependents`.
    fn failed_dependency(&self, name: &str, failed: &HashSet<String>) -> Option<String> {
        if self.options.failure_policy != FailurePolicy::SkipDependents || failed.is_empty() {
            return None;
        }
        let deps: BTreeSet<String> = self.registry.dependencies_of(name);
        deps.into_iter().find(|d| failed.contains(d))
    }

    /// Drive one module through its phases.
    async fn execute_module(&self, name: &str, ctx: &GlobalRunContext) -> ModuleOutcome {
        let Some(module) = self.registry.get(name) else {
            return ModuleOutcome::new(
                name,
                ModuleStatus::Error,
                Phase::NotStarted,
                format!("module '{name}' is not available"),
            );
        };
        let ops = module.operations();
        let limit = module.timeout().or(self.options.module_timeout);

        if ops.pre_check {
            if let Some(outcome) = self.gate(module.as_ref(), limit, ctx).await {
                return outcome;
            }
        }

        enter(name, Phase::Apply);
        if ctx.dry_run {
            return ModuleOutcome::new(name, ModuleStatus::DryRun, Phase::Done, module.preview(ctx));
        }

        let saved = if ctx.backup_configs {
            match self.backup(module.as_ref(), ctx).await {
                Ok(set) => set,
                Err(e) => {
                    return ModuleOutcome::new(
                        name,
                        ModuleStatus::Error,
                        Phase::Apply,
                        format!("config backup failed: {e:#}"),
                    )
                }
            }
        } else {
            BackupSet::default()
        };

        let applied = match bounded(limit, module.apply(ctx)).await {
            Ok(detail) => detail,
            Err(e) => {
                let status = match e {
                    ModuleError::TimedOut { .. } => ModuleStatus::Timeout,
                    _ => ModuleStatus::Error,
                };
                let mut detail = format!("apply failed: {e}");
                if !saved.is_empty() {
                    let restored = backup::restore(&saved).await;
                    detail.push_str(&format!("; restored {restored} backed-up file(s)"));
                }
                return ModuleOutcome::new(name, status, Phase::Apply, detail);
            }
        };

        if !ops.validate {
            return ModuleOutcome::new(name, ModuleStatus::Success, Phase::Done, applied);
        }

        enter(name, Phase::Validate);
        match bounded(limit, module.validate(ctx)).await {
            Ok(CheckResult::Passed { .. }) => {
                ModuleOutcome::new(name, ModuleStatus::Success, Phase::Done, applied)
            }
            Ok(CheckResult::Failed { detail }) => ModuleOutcome::new(
                name,
                ModuleStatus::Warning,
                Phase::Validate,
                format!("applied but validation failed: {detail}"),
            ),
            Err(e) => ModuleOutcome::new(
                name,
                ModuleStatus::Warning,
                Phase::Validate,
                format!("applied but validation could not run: {e}"),
            ),
        }
    }

    /// Validate-only path for one module.
    async fn validate_module(&self, name: &str, ctx: &GlobalRunContext) -> ModuleOutcome {
        let Some(module) = self.registry.get(name) else {
            return ModuleOutcome::new(
                name,
                ModuleStatus::Error,
                Phase::NotStarted,
                format!("module '{name}' is not available"),
            );
        };
        let ops = module.operations();
        let limit = module.timeout().or(self.options.module_timeout);

        if ops.pre_check {
            if let Some(outcome) = self.gate(module.as_ref(), limit, ctx).await {
                return outcome;
            }
        }

        if !ops.validate {
            return ModuleOutcome::new(
                name,
                ModuleStatus::Skipped,
                Phase::Validate,
                "no validate operation",
            );
        }

        enter(name, Phase::Validate);
        match bounded(limit, module.validate(ctx)).await {
            Ok(CheckResult::Passed { detail }) => {
                ModuleOutcome::new(name, ModuleStatus::Success, Phase::Done, detail)
            }
            Ok(CheckResult::Failed { detail }) => ModuleOutcome::new(
                name,
                ModuleStatus::Warning,
                Phase::Validate,
                format!("validation failed: {detail}"),
            ),
            Err(e) => ModuleOutcome::new(
                name,
                ModuleStatus::Warning,
                Phase::Validate,
                format!("validation could not run: {e}"),
            ),
        }
    }

    /// Run the readiness gate; `Some` when the module must stop here.
    async fn gate(
        &self,
        module: &dyn HardeningModule,
        limit: Option<Duration>,
        ctx: &GlobalRunContext,
    ) -> Option<ModuleOutcome> {
        let name = module.name();
        enter(name, Phase::PreCheck);
        match bounded(limit, module.pre_check(ctx)).await {
            Ok(Readiness::Ready) => None,
            Ok(Readiness::NotReady { reason }) => Some(ModuleOutcome::new(
                name,
                ModuleStatus::Skipped,
                Phase::PreCheck,
                reason,
            )),
            Err(e @ ModuleError::TimedOut { .. }) => Some(ModuleOutcome::new(
                name,
                ModuleStatus::Timeout,
                Phase::PreCheck,
                format!("pre-check {e}"),
            )),
            Err(e) => Some(ModuleOutcome::new(
                name,
                ModuleStatus::Skipped,
                Phase::PreCheck,
                format!("pre-check could not run: {e}"),
            )),
        }
    }

    /// Save the module's config files when it lists any.
    async fn backup(
        &self,
        module: &dyn HardeningModule,
        ctx: &GlobalRunContext,
    ) -> anyhow::Result<BackupSet> {
        let paths = module.backup_paths();
        if paths.is_empty() {
            return Ok(BackupSet::default());
        }
        backup::save(&paths, &ctx.backup_dir_for(module.name())).await
    }

    /// Report an outcome through the logging collaborator.
    fn announce(&self, outcome: &ModuleOutcome) {
        let message = format!(
            "{} [{}]: {}",
            outcome.module_name,
            outcome.status.label(),
            outcome.detail
        );
        match outcome.status {
            ModuleStatus::Success => self.logger.success(&message),
            ModuleStatus::DryRun => self.logger.info(&message),
            ModuleStatus::Warning | ModuleStatus::Skipped => self.logger.warn(&message),
            ModuleStatus::Error | ModuleStatus::Timeout => self.logger.error(&message),
        }
    }
}

/// Await `fut`, failing with [`ModuleError::TimedOut`] once `limit` passes.
async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, ModuleError>
where
    F: Future<Output = Result<T, ModuleError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ModuleError::TimedOut {
                seconds: limit.as_secs(),
            }),
        },
        None => fut.await,
    }
}

fn enter(module: &str, phase: Phase) {
    debug!(module = %module, phase = ?phase, "entering phase");
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
