//! CLI behavior via the built binary (no network, no rendering).

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn write_csv(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("data.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "location,date,new_cases").unwrap();
    writeln!(f, "Aland,2020-01-22,2").unwrap();
    writeln!(f, "Aland,2020-01-23,4").unwrap();
    writeln!(f, "Borland,2020-01-22,10").unwrap();
    writeln!(f, "Borland,2020-01-23,").unwrap();
    path
}

#[test]
fn params_canonicalizes_a_messy_query() {
    Command::cargo_bin("grapher")
        .unwrap()
        .args(["params", "cfrMetric=true&perCapita=true&aligned=true&interval=daily"])
        .assert()
        .success()
        .stdout(predicate::str::diff("cfrMetric=true\n"));
}

#[test]
fn params_empty_query_prints_empty_canonical_form() {
    Command::cargo_bin("grapher")
        .unwrap()
        .args(["params", "utm_source=feed"])
        .assert()
        .success()
        .stdout(predicate::str::diff("\n"));
}

#[test]
fn params_output_is_a_fixed_point() {
    let out = Command::cargo_bin("grapher")
        .unwrap()
        .args(["params", "smoothing=7&country=USA~GBR&dailyFreq=true"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let first = String::from_utf8(out.stdout).unwrap();

    let out = Command::cargo_bin("grapher")
        .unwrap()
        .args(["params", first.trim()])
        .output()
        .unwrap();
    let second = String::from_utf8(out.stdout).unwrap();
    assert_eq!(first, second);
}

#[test]
fn summary_prints_per_entity_rows() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(&dir);
    Command::cargo_bin("grapher")
        .unwrap()
        .args(["summary", "--csv"])
        .arg(&csv)
        .args(["--column", "new_cases"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Aland / new_cases  count=2 missing=0")
                .and(predicate::str::contains("Borland / new_cases  count=1 missing=1")),
        );
}

#[test]
fn summary_json_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(&dir);
    let out = Command::cargo_bin("grapher")
        .unwrap()
        .args(["summary", "--csv"])
        .arg(&csv)
        .args(["--column", "new_cases", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);
    assert_eq!(parsed[0]["entity"], "Aland");
    assert_eq!(parsed[0]["mean"], 3.0);
}

#[test]
fn summary_rejects_a_missing_file() {
    Command::cargo_bin("grapher")
        .unwrap()
        .args(["summary", "--csv", "does-not-exist.csv", "--column", "new_cases"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.csv"));
}
