//! Tests for `ModuleDefinition` parsing and validation.

use std::path::PathBuf;

use rampart::module::{ModuleDefinition, ModuleError};

#[test]
fn parses_full_manifest() {
    let def = ModuleDefinition::parse(
        r#"
name = "ssh"
description = "Harden the OpenSSH daemon"
depends_on = ["packages"]
requires = ["systemd"]
package_managers = ["apt", "dnf"]
backup = ["/etc/ssh/sshd_config"]
preview = "Disable root login"
timeout_secs = 120

[commands]
pre_check = "command -v sshd"
apply = "echo applying"
validate = "sshd -t"
"#,
        "fallback",
    )
    .expect("valid manifest");

    assert_eq!(def.name, "ssh");
    assert!(def.depends_on.contains("packages"));
    assert!(def.requires.contains("systemd"));
    assert_eq!(def.package_managers.len(), 2);
    assert_eq!(def.backup, vec![PathBuf::from("/etc/ssh/sshd_config")]);
    assert_eq!(def.timeout_secs, Some(120));
    assert_eq!(def.commands.validate.as_deref(), Some("sshd -t"));
}

#[test]
fn name_defaults_to_file_stem() {
    let def = ModuleDefinition::parse("[commands]\napply = \"true\"\n", "ufw").expect("valid");
    assert_eq!(def.name, "ufw");
    assert!(def.depends_on.is_empty());
    assert!(def.commands.pre_check.is_none());
}

fn rejects(manifest: &str) -> String {
    match ModuleDefinition::parse(manifest, "mod") {
        Err(ModuleError::InvalidDefinition(msg)) => msg,
        other => panic!("expected invalid definition, got {other:?}"),
    }
}

#[test]
fn rejects_missing_commands_table() {
    rejects("name = \"ssh\"\n");
}

#[test]
fn rejects_empty_apply() {
    let msg = rejects("[commands]\napply = \"  \"\n");
    assert!(msg.contains("empty apply"));
}

#[test]
fn rejects_self_dependency() {
    let msg = rejects("name = \"ssh\"\ndepends_on = [\"ssh\"]\n[commands]\napply = \"true\"\n");
    assert!(msg.contains("depends on itself"));
}

#[test]
fn rejects_bad_names() {
    let msg = rejects("name = \"bad name\"\n[commands]\napply = \"true\"\n");
    assert!(msg.contains("invalid module name"));
    let msg = rejects("depends_on = [\"../etc\"]\n[commands]\napply = \"true\"\n");
    assert!(msg.contains("invalid dependency name"));
}

#[test]
fn rejects_out_of_range_timeout() {
    let msg = rejects("timeout_secs = 0\n[commands]\napply = \"true\"\n");
    assert!(msg.contains("timeout_secs"));
    rejects("timeout_secs = 90000\n[commands]\napply = \"true\"\n");
}

#[test]
fn rejects_relative_backup_path() {
    let msg = rejects("backup = [\"etc/hosts\"]\n[commands]\napply = \"true\"\n");
    assert!(msg.contains("absolute"));
}

#[test]
fn rejects_unknown_fields() {
    rejects("colour = \"red\"\n[commands]\napply = \"true\"\n");
    rejects("[commands]\napply = \"true\"\nrollback = \"false\"\n");
}
