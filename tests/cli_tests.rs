//! # CLI tests
//!
//! The binary surface: running tasks, exit-code round-tripping, listing,
//! and validation output.

use assert_cmd::Command;
use predicates::prelude::*;

fn weft() -> Command {
    Command::cargo_bin("weft").unwrap()
}

fn write_tasks(dir: &std::path::Path, yaml: &str) {
    std::fs::write(dir.join("tasks.yaml"), yaml).unwrap();
}

// ============================================================================
// RUN
// ============================================================================

#[test]
fn test_run_default_echo() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        "schema-version: v1\ntasks:\n  default:\n    steps:\n      - run: \"echo hi\"\n",
    );

    weft()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("hi"));
}

#[test]
fn test_run_named_task_with_inputs() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        r#"
schema-version: v1
tasks:
  greet:
    inputs:
      name:
        validate: "^[A-Z][a-z]+$"
    steps:
      - run: "echo hello ${{ input(\"name\") }}"
"#,
    );

    weft()
        .current_dir(dir.path())
        .args(["run", "greet", "--with", "name=Alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello Alice"));

    weft()
        .current_dir(dir.path())
        .args(["run", "greet", "--with", "name=bob"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not match"));

    weft()
        .current_dir(dir.path())
        .args(["run", "greet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required input"));
}

#[test]
fn test_run_chains_step_outputs() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        r#"
schema-version: v1
tasks:
  default:
    steps:
      - id: a
        uses: builtin:echo
        with:
          text: "hello"
      - run: "echo ${{ from(\"a\", \"stdout\") }}-world"
"#,
    );

    weft()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-world"));
}

#[test]
fn test_run_exit_code_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        "schema-version: v1\ntasks:\n  default:\n    steps:\n      - run: \"exit 7\"\n",
    );

    weft()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("default[0]"));
}

#[test]
fn test_run_missing_workflow_file() {
    let dir = tempfile::tempdir().unwrap();
    weft()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_run_list_tasks() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        r#"
schema-version: v1
tasks:
  build:
    description: compile everything
    inputs:
      target:
        default: debug
    steps:
      - run: "true"
  default:
    steps:
      - run: "true"
"#,
    );

    weft()
        .current_dir(dir.path())
        .args(["run", "--list"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("build")
                .and(predicate::str::contains("compile everything"))
                .and(predicate::str::contains("target"))
                .and(predicate::str::contains("default: debug")),
        );
}

#[test]
fn test_run_dry_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    write_tasks(
        dir.path(),
        &format!(
            "schema-version: v1\ntasks:\n  default:\n    steps:\n      - run: \"touch {}\"\n",
            marker.display()
        ),
    );

    weft()
        .current_dir(dir.path())
        .args(["run", "--dry-run"])
        .assert()
        .success();
    assert!(!marker.exists());
}

// ============================================================================
// VALIDATE
// ============================================================================

#[test]
fn test_validate_ok() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        "schema-version: v1\ntasks:\n  default:\n    steps:\n      - run: \"true\"\n",
    );

    weft()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn test_validate_reports_violations() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(
        dir.path(),
        "schema-version: v1\ntasks:\n  default:\n    steps:\n      - run: \"true\"\n        uses: other\n  other:\n    steps:\n      - run: \"true\"\n",
    );

    weft()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("both 'run' and 'uses'"));
}

#[test]
fn test_validate_unsupported_version() {
    let dir = tempfile::tempdir().unwrap();
    write_tasks(dir.path(), "schema-version: v9\ntasks: {}\n");

    weft()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected one of: v0, v1"));
}

// ============================================================================
// STORE
// ============================================================================

#[test]
fn test_store_list_and_gc() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("store");
    std::fs::create_dir(&store_dir).unwrap();
    std::fs::write(store_dir.join("orphan"), b"junk").unwrap();

    weft()
        .args(["store", "list", "--store"])
        .arg(&store_dir)
        .assert()
        .success();

    weft()
        .args(["store", "gc", "--store"])
        .arg(&store_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1"));
    assert!(!store_dir.join("orphan").exists());
}
