//! Coverage for config parsing, env overrides and run-context building.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use rampart::config::RampartConfig;
use rampart::coordinator::FailurePolicy;
use rampart::resolver::ResolutionPolicy;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_are_safe() {
    let config = RampartConfig::default();
    assert!(config.run.dry_run);
    assert!(config.run.backup_configs);
    assert_eq!(config.run.resolution, ResolutionPolicy::BestEffort);
    assert_eq!(config.run.on_failure, FailurePolicy::Continue);
    assert_eq!(config.run.module_timeout_secs, 600);
    assert!(config.modules.enabled.is_empty());
    assert_eq!(config.paths.modules_dir, PathBuf::from("/etc/rampart/modules.d"));
}

#[test]
fn parse_full_config() {
    let config = RampartConfig::from_toml(
        r#"
[run]
dry_run = false
backup_configs = false
resolution = "strict"
on_failure = "skip_dependents"
module_timeout_secs = 30

[modules]
enabled = ["ssh", "ufw", "fail2ban"]

[module.ssh]
port = 2222
permit_root_login = false
banner = "/etc/issue.net"

[host]
package_manager = "apt"
capabilities = ["systemd", "ufw"]

[paths]
modules_dir = "/opt/rampart/modules"
backup_dir = "/tmp/rampart/backups"
"#,
    )
    .expect("valid config");

    assert!(!config.run.dry_run);
    assert_eq!(config.run.resolution, ResolutionPolicy::Strict);
    assert_eq!(config.run.on_failure, FailurePolicy::SkipDependents);
    assert_eq!(config.modules.enabled, vec!["ssh", "ufw", "fail2ban"]);
    assert_eq!(config.paths.modules_dir, PathBuf::from("/opt/rampart/modules"));
    assert_eq!(config.paths.report_dir, PathBuf::from("/var/log/rampart/reports"));

    let ctx = config.run_context();
    assert!(!ctx.dry_run);
    assert_eq!(ctx.enabled_modules, vec!["ssh", "ufw", "fail2ban"]);
    assert_eq!(ctx.config_value("ssh", "port"), Some("2222"));
    assert_eq!(ctx.config_value("ssh", "permit_root_login"), Some("false"));
    assert_eq!(ctx.config_value("ssh", "banner"), Some("/etc/issue.net"));
    assert!(ctx.host.has_capability("ufw"));
    assert_eq!(ctx.backup_root, PathBuf::from("/tmp/rampart/backups"));
    assert_eq!(ctx.command_timeout, Some(Duration::from_secs(30)));

    let opts = config.coordinator_options();
    assert_eq!(opts.module_timeout, Some(Duration::from_secs(30)));
    assert_eq!(opts.failure_policy, FailurePolicy::SkipDependents);
}

#[test]
fn zero_timeout_disables_bound() {
    let config = RampartConfig::from_toml("[run]\nmodule_timeout_secs = 0\n").expect("valid");
    assert_eq!(config.coordinator_options().module_timeout, None);
    assert_eq!(config.run_context().command_timeout, None);
}

#[test]
fn env_overrides_file() {
    let mut config = RampartConfig::from_toml(
        "[run]\ndry_run = true\n[modules]\nenabled = [\"ssh\"]\n",
    )
    .expect("valid");
    config.apply_overrides(env_of(&[
        ("RAMPART_DRY_RUN", "false"),
        ("RAMPART_MODULES", "ufw, auditd,,sysctl"),
        ("RAMPART_MODULES_DIR", "/srv/modules"),
        ("RAMPART_MODULE_TIMEOUT_SECS", "45"),
        ("RAMPART_PACKAGE_MANAGER", "dnf"),
    ]));

    assert!(!config.run.dry_run);
    assert_eq!(config.modules.enabled, vec!["ufw", "auditd", "sysctl"]);
    assert_eq!(config.paths.modules_dir, PathBuf::from("/srv/modules"));
    assert_eq!(config.run.module_timeout_secs, 45);
    assert_eq!(config.host.package_manager, "dnf");
}

#[test]
fn invalid_env_values_are_ignored() {
    let mut config = RampartConfig::default();
    config.apply_overrides(env_of(&[
        ("RAMPART_DRY_RUN", "sometimes"),
        ("RAMPART_MODULE_TIMEOUT_SECS", "soon"),
    ]));
    assert!(config.run.dry_run);
    assert_eq!(config.run.module_timeout_secs, 600);
}

#[test]
fn validate_rejects_bad_settings() {
    let config = RampartConfig::from_toml("[modules]\nenabled = [\"ssh config\"]\n").expect("parses");
    assert!(config.validate().is_err());

    let config = RampartConfig::from_toml("[run]\nmodule_timeout_secs = 100000\n").expect("parses");
    assert!(config.validate().is_err());

    let config = RampartConfig::from_toml("[module.ssh]\nports = [22, 2222]\n").expect("parses");
    assert!(config.validate().is_err());
}

#[test]
fn unknown_policy_is_parse_error() {
    assert!(RampartConfig::from_toml("[run]\nresolution = \"yolo\"\n").is_err());
}

#[test]
fn load_with_explicit_path() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("rampart.toml");
    std::fs::write(&path, "[modules]\nenabled = [\"ssh\"]\n").expect("write config");

    let config = RampartConfig::load_with(Some(&path), env_of(&[("RAMPART_DRY_RUN", "0")]))
        .expect("loads");
    assert_eq!(config.modules.enabled, vec!["ssh"]);
    assert!(!config.run.dry_run);
}

#[test]
fn load_with_config_env_var() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[host]\npackage_manager = \"pacman\"\n").expect("write config");
    let path_str = path.to_str().expect("utf-8 path").to_owned();

    let config = RampartConfig::load_with(None, env_of(&[("RAMPART_CONFIG", path_str.as_str())]))
        .expect("loads");
    assert_eq!(config.host.package_manager, "pacman");
}

#[test]
fn explicit_missing_file_is_error() {
    let err = RampartConfig::load_with(Some(Path::new("/nonexistent/rampart.toml")), env_of(&[]))
        .expect_err("missing explicit config");
    assert!(format!("{err:#}").contains("failed to read config"));
}
