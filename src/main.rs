//! Rampart CLI entry point.
//!
//! Provides `run`, `plan`, `validate` and `list` subcommands over the
//! modules discovered in `paths.modules_dir`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rampart::config::RampartConfig;
use rampart::coordinator::Coordinator;
use rampart::events::TracingLogger;
use rampart::logging;
use rampart::registry::{Discovery, ModuleRegistry};
use rampart::report::RunReport;

/// Exit code for usage, configuration and strict resolution errors.
const EXIT_USAGE: u8 = 2;

/// Rampart — modular host hardening.
#[derive(Parser)]
#[command(name = "rampart", version, about)]
struct Cli {
    /// Config file (default: `$RAMPART_CONFIG` or /etc/rampart/rampart.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Resolve and execute the enabled modules.
    Run {
        /// Preview changes without applying them.
        #[arg(long, conflicts_with = "apply")]
        dry_run: bool,
        /// Apply changes to the host.
        #[arg(long)]
        apply: bool,
        /// Run only these modules (repeatable); replaces `modules.enabled`.
        #[arg(long = "module", value_name = "NAME")]
        modules: Vec<String>,
        /// Do not write the JSON run report.
        #[arg(long)]
        no_report: bool,
        /// Also write JSON logs to this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Print the resolved execution order.
    Plan,
    /// Run only the validate operation of each enabled module.
    Validate,
    /// List discovered modules and discovery errors.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match RampartConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_cli();
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match cli.command {
        Command::Run {
            dry_run,
            apply,
            modules,
            no_report,
            log_dir,
        } => {
            if apply {
                config.run.dry_run = false;
            } else if dry_run {
                config.run.dry_run = true;
            }
            if !modules.is_empty() {
                config.modules.enabled = modules;
            }
            if let Err(e) = config.validate() {
                logging::init_cli();
                eprintln!("error: {e:#}");
                return ExitCode::from(EXIT_USAGE);
            }
            let _guard = logging::init_run(run_logs_dir(log_dir, &config).as_deref());
            handle_run(&config, no_report).await
        }
        Command::Plan => {
            logging::init_cli();
            handle_plan(&config)
        }
        Command::Validate => {
            logging::init_cli();
            handle_validate(&config).await
        }
        Command::List => {
            logging::init_cli();
            handle_list(&config)
        }
    }
}

/// Requested log directory, else the configured one when it already exists.
fn run_logs_dir(log_dir: Option<PathBuf>, config: &RampartConfig) -> Option<PathBuf> {
    log_dir.or_else(|| {
        config
            .paths
            .logs_dir
            .is_dir()
            .then(|| config.paths.logs_dir.clone())
    })
}

/// Discover modules and report per-file problems.
fn discover(config: &RampartConfig) -> Discovery {
    let discovery = ModuleRegistry::discover(&config.paths.modules_dir);
    for error in &discovery.errors {
        eprintln!("warning: {error}");
    }
    discovery
}

fn coordinator(config: &RampartConfig) -> Coordinator {
    let Discovery { registry, .. } = discover(config);
    Coordinator::new(registry, Arc::new(TracingLogger)).with_options(config.coordinator_options())
}

/// Execute the run and persist its report.
async fn handle_run(config: &RampartConfig, no_report: bool) -> ExitCode {
    let ctx = config.run_context();
    let report = match coordinator(config).run(&ctx).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    print_report(&report);

    if !no_report {
        match report
            .write_json(&config.paths.report_dir)
            .await
            .context("failed to write run report")
        {
            Ok(path) => info!(path = %path.display(), "run report written"),
            Err(e) => warn!(error = %format!("{e:#}"), "run report not written"),
        }
    }

    exit_code(&report)
}

/// Print the resolved order, one module per line.
fn handle_plan(config: &RampartConfig) -> ExitCode {
    let ctx = config.run_context();
    match coordinator(config).plan(&ctx) {
        Ok(plan) => {
            for name in plan.order() {
                println!("{name}");
            }
            if plan.is_degraded() {
                eprintln!(
                    "warning: cycle among {}; order is best-effort",
                    plan.degraded().join(", ")
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn handle_validate(config: &RampartConfig) -> ExitCode {
    let ctx = config.run_context();
    match coordinator(config).validate_only(&ctx).await {
        Ok(report) => {
            print_report(&report);
            exit_code(&report)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn handle_list(config: &RampartConfig) -> ExitCode {
    let discovery = ModuleRegistry::discover(&config.paths.modules_dir);
    if discovery.registry.is_empty() {
        println!("no modules in {}", config.paths.modules_dir.display());
    }
    for module in discovery.registry.descriptors() {
        let deps = if module.dependencies.is_empty() {
            "-".to_owned()
        } else {
            module
                .dependencies
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut ops = vec!["apply"];
        if module.operations.pre_check {
            ops.insert(0, "pre_check");
        }
        if module.operations.validate {
            ops.push("validate");
        }
        println!("{:<24} depends_on={deps} ops={}", module.name, ops.join(","));
    }
    for error in &discovery.errors {
        println!("error: {error}");
    }
    ExitCode::SUCCESS
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        println!(
            "{:<24} {:<8} {}",
            outcome.module_name,
            outcome.status.label(),
            outcome.detail
        );
    }
    println!("{}", report.summary_line());
}

fn exit_code(report: &RunReport) -> ExitCode {
    ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1))
}
