//! Tests for `CommandModule` — shell-backed operations.

use std::collections::BTreeMap;
use std::time::Duration;

use rampart::context::{GlobalRunContext, HostProfile};
use rampart::module::{CheckResult, CommandModule, HardeningModule, ModuleDefinition, ModuleError, Readiness};

fn module(manifest: &str) -> CommandModule {
    CommandModule::new(ModuleDefinition::parse(manifest, "ssh").expect("valid manifest"))
}

fn ctx() -> GlobalRunContext {
    let mut ctx = GlobalRunContext::new(["ssh"], false);
    ctx.host = HostProfile::new("apt", ["systemd"]);
    ctx
}

#[tokio::test]
async fn apply_reports_output() {
    let m = module("[commands]\napply = \"echo PermitRootLogin no\"\n");
    let detail = m.apply(&ctx()).await.expect("apply succeeds");
    assert_eq!(detail, "PermitRootLogin no");
}

#[tokio::test]
async fn silent_apply_reports_applied() {
    let m = module("[commands]\napply = \"true\"\n");
    assert_eq!(m.apply(&ctx()).await.expect("apply"), "applied");
}

#[tokio::test]
async fn failing_apply_is_module_failure() {
    let m = module("[commands]\napply = \"echo no sshd >&2; exit 3\"\n");
    match m.apply(&ctx()).await {
        Err(ModuleError::Failed { detail }) => assert_eq!(detail, "no sshd"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn apply_sees_module_config_and_run_facts() {
    let m = module(
        "[commands]\napply = 'echo \"$RAMPART_MODULE $RAMPART_CFG_PORT $RAMPART_PACKAGE_MANAGER $RAMPART_DRY_RUN\"'\n",
    );
    let mut ctx = ctx();
    ctx.module_config.insert(
        "ssh".to_owned(),
        BTreeMap::from([("port".to_owned(), "2222".to_owned())]),
    );

    let detail = m.apply(&ctx).await.expect("apply");
    assert_eq!(detail, "ssh 2222 apt false");
}

#[tokio::test]
async fn pre_check_checks_host_requirements_first() {
    let m = module("requires = [\"ufw\"]\n[commands]\napply = \"true\"\n");
    assert!(m.operations().pre_check);
    assert_eq!(
        m.pre_check(&ctx()).await.expect("pre-check"),
        Readiness::NotReady {
            reason: "host lacks required capability 'ufw'".to_owned()
        }
    );

    let m = module("package_managers = [\"dnf\"]\n[commands]\napply = \"true\"\n");
    assert!(matches!(
        m.pre_check(&ctx()).await.expect("pre-check"),
        Readiness::NotReady { reason } if reason.contains("'apt' not supported")
    ));
}

#[tokio::test]
async fn pre_check_command_gates_readiness() {
    let ready = module("requires = [\"systemd\"]\n[commands]\npre_check = \"true\"\napply = \"true\"\n");
    assert_eq!(ready.pre_check(&ctx()).await.expect("pre-check"), Readiness::Ready);

    let blocked = module("[commands]\npre_check = \"echo auditd not installed; exit 1\"\napply = \"true\"\n");
    assert_eq!(
        blocked.pre_check(&ctx()).await.expect("pre-check"),
        Readiness::NotReady {
            reason: "auditd not installed".to_owned()
        }
    );
}

#[tokio::test]
async fn validate_maps_exit_status() {
    let m = module("[commands]\napply = \"true\"\nvalidate = \"exit 1\"\n");
    assert!(m.operations().validate);
    assert_eq!(
        m.validate(&ctx()).await.expect("validate"),
        CheckResult::Failed {
            detail: "exit code 1".to_owned()
        }
    );

    let m = module("[commands]\napply = \"true\"\nvalidate = \"echo ok\"\n");
    assert_eq!(
        m.validate(&ctx()).await.expect("validate"),
        CheckResult::Passed {
            detail: "ok".to_owned()
        }
    );
}

#[test]
fn preview_prefers_manifest_text() {
    let m = module("preview = \"Disable root login\"\n[commands]\napply = \"sed -i x\"\n");
    assert_eq!(m.preview(&ctx()), "Disable root login");

    let m = module("[commands]\napply = \"sed -i x\"\n");
    assert_eq!(m.preview(&ctx()), "would run: sed -i x");
}

#[tokio::test]
async fn manifest_timeout_bounds_commands() {
    let m = module("timeout_secs = 1\n[commands]\napply = \"sleep 10\"\n");
    assert_eq!(m.timeout(), Some(Duration::from_secs(1)));
    match m.apply(&ctx()).await {
        Err(ModuleError::TimedOut { seconds }) => assert_eq!(seconds, 1),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn run_bound_applies_without_manifest_timeout() {
    let dir = tempfile::tempdir().expect("temp dir");
    let marker = dir.path().join("late-write");
    let m = module("[commands]\napply = '{ sleep 2; touch \"$RAMPART_CFG_MARK\"; } | cat'\n");
    assert_eq!(m.timeout(), None);

    let mut ctx = ctx();
    ctx.command_timeout = Some(Duration::from_secs(1));
    ctx.module_config.insert(
        "ssh".to_owned(),
        BTreeMap::from([("mark".to_owned(), marker.display().to_string())]),
    );

    match m.apply(&ctx).await {
        Err(ModuleError::TimedOut { seconds }) => assert_eq!(seconds, 1),
        other => panic!("expected timeout, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "apply kept running after its timeout");
}
