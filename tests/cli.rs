mod common;

use assert_cmd::Command;
use common::{BANK_FEBRUARY, BANK_JANUARY, TestWorkspace};
use ledger_merge::classify::RuleStore;
use ledger_merge::merge::MergeResult;
use ledger_merge::process::NormalizedDocument;
use ledger_merge::project::{MergeProject, ProjectStatus};
use predicates::prelude::*;
use predicates::str::contains;

fn ledger_merge() -> Command {
    Command::cargo_bin("ledger-merge").expect("binary exists")
}

#[test]
fn detect_prints_header_as_json() {
    let ws = TestWorkspace::new();
    let input = ws.write("jan.csv", BANK_JANUARY);
    let output = ledger_merge()
        .args(["detect", "-i", input.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).expect("detect emits JSON");
    assert_eq!(value["header_row_index"], 1);
    assert_eq!(value["headers"][0], "거래일자");
    assert_eq!(value["total_data_rows"], 2);
}

#[test]
fn detect_renders_a_table_by_default() {
    let ws = TestWorkspace::new();
    let input = ws.write("feb.csv", BANK_FEBRUARY);
    ledger_merge()
        .args(["detect", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("header row").and(contains("거래내용")));
}

#[test]
fn merge_writes_report_without_output_file() {
    let ws = TestWorkspace::new();
    let jan = ws.write("jan.csv", BANK_JANUARY);
    let feb = ws.write("feb.csv", BANK_FEBRUARY);
    let report = ws.join("report.json");
    ledger_merge()
        .args([
            "merge",
            "-i",
            jan.to_str().unwrap(),
            "-i",
            feb.to_str().unwrap(),
            "--no-output",
            "--auto-detect",
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("suspected duplicates"));

    let result: MergeResult = serde_json::from_str(&ws.read("report.json")).unwrap();
    assert!(result.success);
    assert_eq!(result.total_rows, 4);
    assert_eq!(result.duplicates.total_suspected, 1);
    assert!(result.output_location.is_none());
}

#[test]
fn merge_applies_cli_mappings_to_csv_output() {
    let ws = TestWorkspace::new();
    let jan = ws.write("jan.csv", BANK_JANUARY);
    let target = ws.join("out.csv");
    ledger_merge()
        .args([
            "merge",
            "-i",
            jan.to_str().unwrap(),
            "-o",
            target.to_str().unwrap(),
            "--map",
            "적요=메모",
            "--no-source-column",
        ])
        .assert()
        .success();

    let written = ws.read("out.csv");
    assert_eq!(written.lines().next(), Some("날짜,메모,입금액,출금액,잔액"));
}

#[test]
fn merge_with_no_rows_fails() {
    let ws = TestWorkspace::new();
    let empty = ws.write("empty.csv", "날짜,적요\n");
    ledger_merge()
        .args(["merge", "-i", empty.to_str().unwrap(), "--no-output"])
        .assert()
        .failure()
        .stderr(contains("No data to merge"));
}

#[test]
fn learned_rules_drive_classification() {
    let ws = TestWorkspace::new();
    let rules = ws.join("rules.yaml");
    let rules_arg = rules.to_str().unwrap();

    ledger_merge()
        .args(["classify", "스타벅스 강남점", "--rules", rules_arg, "--owner", "kim"])
        .assert()
        .success()
        .stdout(contains("미분류"));

    ledger_merge()
        .args([
            "learn",
            "--description",
            "스타벅스 강남점",
            "--category",
            "복리후생비",
            "--rules",
            rules_arg,
            "--owner",
            "kim",
        ])
        .assert()
        .success()
        .stdout(contains("복리후생비"));

    ledger_merge()
        .args(["classify", "스타벅스 강남점", "--rules", rules_arg, "--owner", "kim"])
        .assert()
        .success()
        .stdout(contains("복리후생비").and(contains("rule 1")));

    let store = RuleStore::load(&rules).unwrap();
    assert_eq!(store.rules_for("kim")[0].hit_count, 1);
}

#[test]
fn learning_from_a_normalized_document_updates_the_report() {
    let ws = TestWorkspace::new();
    let input = ws.write("jan.csv", BANK_JANUARY);
    let report = ws.join("jan.json");
    let rules = ws.join("rules.yaml");

    ledger_merge()
        .args([
            "normalize",
            "-i",
            input.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();

    ledger_merge()
        .args([
            "learn",
            "--document",
            report.to_str().unwrap(),
            "--row",
            "1",
            "--category",
            "복리후생비",
            "--rules",
            rules.to_str().unwrap(),
            "--owner",
            "kim",
        ])
        .assert()
        .success();

    let document = NormalizedDocument::load(&report).unwrap();
    assert_eq!(document.category_of(1), Some("복리후생비"));
    let store = RuleStore::load(&rules).unwrap();
    assert_eq!(store.rules_for("kim")[0].pattern, "스타벅스 강남점");

    ledger_merge()
        .args([
            "learn",
            "--document",
            report.to_str().unwrap(),
            "--row",
            "7",
            "--category",
            "급여",
            "--rules",
            rules.to_str().unwrap(),
            "--owner",
            "kim",
        ])
        .assert()
        .failure()
        .stderr(contains("out of range"));
}

#[test]
fn rules_can_be_added_listed_and_deactivated() {
    let ws = TestWorkspace::new();
    let rules = ws.join("rules.yaml");
    let base = ["rules", "--rules", rules.to_str().unwrap(), "--owner", "lee"];

    ledger_merge()
        .args(base)
        .args(["add", "-p", "카페", "-c", "복리후생비", "--match", "vendor", "--source", "vendor"])
        .assert()
        .success();
    ledger_merge()
        .args(base)
        .arg("list")
        .assert()
        .success()
        .stdout(contains("카페").and(contains("vendor")));
    ledger_merge()
        .args(base)
        .args(["deactivate", "1"])
        .assert()
        .success();
    ledger_merge()
        .args(base)
        .args(["deactivate", "42"])
        .assert()
        .failure()
        .stderr(contains("Rule 42 not found"));

    let store = RuleStore::load(&rules).unwrap();
    assert!(!store.rules_for("lee")[0].active);
}

#[test]
fn summary_reports_totals() {
    let ws = TestWorkspace::new();
    let input = ws.write("jan.csv", BANK_JANUARY);
    ledger_merge()
        .args(["summary", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("1,000,000").and(contains("995,500")).and(contains("급여")));
}

#[test]
fn project_lifecycle_through_the_cli() {
    let ws = TestWorkspace::new();
    let project = ws.join("project.json");
    let project_arg = project.to_str().unwrap();
    let jan = ws.write("jan.csv", BANK_JANUARY);
    let feb = ws.write("feb.csv", BANK_FEBRUARY);
    let merged = ws.join("merged.xlsx");

    ledger_merge()
        .args(["project", "-p", project_arg, "create", "-n", "1분기"])
        .assert()
        .success();
    ledger_merge()
        .args(["project", "-p", project_arg, "create", "-n", "again"])
        .assert()
        .failure()
        .stderr(contains("already exists"));
    ledger_merge()
        .args(["project", "-p", project_arg, "add"])
        .args([jan.to_str().unwrap(), feb.to_str().unwrap()])
        .assert()
        .success();

    ledger_merge()
        .args(["project", "-p", project_arg, "execute"])
        .assert()
        .failure()
        .stderr(contains("Cannot execute a merge while project is draft"));

    ledger_merge()
        .args(["project", "-p", project_arg, "analyze"])
        .assert()
        .success()
        .stdout(contains("거래내용"));
    ledger_merge()
        .args(["project", "-p", project_arg, "map", "--date-columns", "날짜"])
        .assert()
        .success();
    ledger_merge()
        .args(["project", "-p", project_arg, "execute", "-o", merged.to_str().unwrap()])
        .assert()
        .success();
    assert!(merged.exists());

    ledger_merge()
        .args(["project", "-p", project_arg, "status"])
        .assert()
        .success()
        .stdout(contains("completed"));

    let saved = MergeProject::load(&project).unwrap();
    assert_eq!(saved.status, ProjectStatus::Completed);
    assert_eq!(saved.date_columns, vec!["날짜"]);
    assert_eq!(saved.merge_log.map(|log| log.total_rows), Some(4));
}
