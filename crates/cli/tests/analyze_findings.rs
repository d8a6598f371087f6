use std::fs;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn write_results(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("results.json");
    fs::write(&path, body).expect("results");
    path
}

const DIVERGENT: &str = r#"{"function": "strlen", "results": [
    {"library": "musl", "value": 5},
    {"library": "diet", "value": 5},
    {"library": "newlib", "value": 9}
]}"#;

#[test]
fn analyze_reports_divergence_in_text() {
    let dir = tempdir().expect("tempdir");
    let results = write_results(dir.path(), DIVERGENT);

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--results")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Function: strlen"))
        .stdout(predicate::str::contains("Verdict: divergence (2 cluster(s))"))
        .stdout(predicate::str::contains("- [musl] musl, diet"))
        .stdout(predicate::str::contains("- [newlib] newlib"));
}

#[test]
fn analyze_json_isolates_faults() {
    let dir = tempdir().expect("tempdir");
    let results = write_results(
        dir.path(),
        r#"{"results": [
            {"library": "musl", "value": [1, 2]},
            {"library": "diet", "fault": {"kind": "ptr", "message": "memory error"}},
            {"library": "newlib", "value": [1, 2]}
        ]}"#,
    );

    let output = assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--results")
        .arg(&results)
        .arg("--json")
        .output()
        .expect("run analyze");
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["verdict"], "agreement");
    assert_eq!(report["clusters"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["clusters"][0]["members"], serde_json::json!(["musl", "newlib"]));
    assert_eq!(report["faulted"][0]["library"], "diet");
    assert_eq!(report["faulted"][0]["fault"]["kind"], "ptr");
}

#[test]
fn analyze_with_tolerance_merges_close_floats() {
    let dir = tempdir().expect("tempdir");
    let results = write_results(
        dir.path(),
        r#"{"results": [{"library": "A", "value": 1.0}, {"library": "B", "value": 1.05}]}"#,
    );

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--results")
        .arg(&results)
        .arg("--predicate")
        .arg("tol:0.1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Verdict: agreement (1 cluster(s))"));
}

#[test]
fn analyze_rejects_invalid_predicate() {
    let dir = tempdir().expect("tempdir");
    let results = write_results(dir.path(), DIVERGENT);

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--results")
        .arg(&results)
        .arg("--predicate")
        .arg("tol:-1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid predicate"));
}

#[test]
fn analyze_reads_verifier_message() {
    let dir = tempdir().expect("tempdir");
    let message = dir.path().join("abort.txt");
    fs::write(&message, "musl:musl\ndiet:musl\nnewlib:newlib\n").expect("message");

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--message")
        .arg(&message)
        .arg("--libs")
        .arg("musl,diet,newlib")
        .assert()
        .success()
        .stdout(predicate::str::contains("Verdict: divergence (2 cluster(s))"))
        .stdout(predicate::str::contains("- [musl] musl, diet"));
}

#[test]
fn analyze_message_requires_every_library() {
    let dir = tempdir().expect("tempdir");
    let message = dir.path().join("abort.txt");
    fs::write(&message, "musl:musl\n").expect("message");

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--message")
        .arg(&message)
        .arg("--libs")
        .arg("musl,diet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not mention library 'diet'"));
}

/// Findings recorded by `analyze --db` show up in `list-findings`.
#[test]
fn findings_are_recorded_and_listed() {
    let dir = tempdir().expect("tempdir");
    let results = write_results(dir.path(), DIVERGENT);
    let db = dir.path().join("state/findings.db");

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("analyze")
        .arg("--results")
        .arg(&results)
        .arg("--db")
        .arg(&db)
        .arg("--label")
        .arg("run-1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded finding: 1"));

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("list-findings")
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Findings (1):"))
        .stdout(predicate::str::contains("strlen divergence (exact) [musl,diet] [newlib] run-1"));

    let output = assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("list-findings")
        .arg("--db")
        .arg(&db)
        .arg("--function")
        .arg("memcpy")
        .arg("--json")
        .output()
        .expect("run list-findings");
    assert!(output.status.success());
    let findings: Value = serde_json::from_slice(&output.stdout).expect("json findings");
    assert_eq!(findings, serde_json::json!([]));
}

#[test]
fn list_runs_on_fresh_database_is_empty() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("findings.db");

    assert_cmd::cargo::cargo_bin_cmd!("diffharness")
        .arg("list-runs")
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Build runs (0):"))
        .stdout(predicate::str::contains("(none)"));
}
