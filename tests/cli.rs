use assert_cmd::Command;
use predicates::prelude::*;

fn erad() -> Command {
    Command::cargo_bin("erad").unwrap()
}

#[test]
fn test_help_exits_successfully() {
    erad().arg("--help").assert().success();
}

#[test]
fn test_version_exits_successfully() {
    erad().arg("--version").assert().success().stdout(predicate::str::contains("era"));
}

#[test]
fn test_no_args_shows_usage() {
    erad().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_subcommand_fails() {
    erad().arg("nonexistent").assert().failure().stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_help_lists_top_level_subcommands() {
    let assert = erad().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for cmd in ["vm", "session"] {
        assert!(output.contains(cmd), "help output should list '{}' subcommand", cmd);
    }
}

#[test]
fn test_vm_help_lists_subcommands() {
    let assert = erad().args(["vm", "--help"]).assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for cmd in ["create", "list", "get", "run", "stop", "clean", "patch"] {
        assert!(output.contains(cmd), "vm help should list '{}' subcommand", cmd);
    }
}

#[test]
fn test_session_help_lists_subcommands() {
    let assert = erad().args(["session", "--help"]).assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for cmd in ["create", "list", "get", "delete", "duplicate", "patch", "run", "files"] {
        assert!(output.contains(cmd), "session help should list '{}' subcommand", cmd);
    }
}

#[test]
fn test_session_create_and_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let objects_dir = dir.path().join("objects");

    let assert = erad()
        .env("ERA_DATA_DIR", &data_dir)
        .env("ERA_OBJECT_STORE_ROOT", &objects_dir)
        .args(["session", "create", "--language", "python", "--id", "demo-session"])
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains("demo-session"));

    erad()
        .env("ERA_DATA_DIR", &data_dir)
        .env("ERA_OBJECT_STORE_ROOT", &objects_dir)
        .args(["session", "get", "demo-session"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-session"));
}

#[test]
fn test_session_list_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let objects_dir = dir.path().join("objects");

    erad()
        .env("ERA_DATA_DIR", &data_dir)
        .env("ERA_OBJECT_STORE_ROOT", &objects_dir)
        .args(["--output", "json", "session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}
