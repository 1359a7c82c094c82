//! Integration tests for the wbsx binary
//!
//! | Exit Code | Meaning |
//! |-----------|---------|
//! | 0 | Workbook written |
//! | 1 | Input, template or writer failure; no output file |

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::{Command, Output};

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn wbsx() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wbsx"))
}

fn run<S: AsRef<OsStr>>(args: &[S]) -> Output {
    wbsx().args(args).output().expect("failed to execute wbsx")
}

/// Scaffold a template into `dir` through the binary itself
fn scaffold(dir: &TempDir) -> PathBuf {
    let template = dir.path().join("template.xlsm");
    let out = wbsx().arg("scaffold").arg(&template).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    template
}

fn write_data(dir: &TempDir, json: &str) -> PathBuf {
    let path = dir.path().join("wbs.json");
    std::fs::write(&path, json).unwrap();
    path
}

const DATA: &str = r#"[
  {"region": "PL", "type": "New", "companyCode": "77", "requesterDisplayName": "Alice", "responsiblePerson": "Bob"},
  {"region": "DK", "type": "Update", "settlementRulePercent": "25"}
]"#;

#[test]
fn fills_template_and_reports_success() {
    let dir = tempfile::tempdir().unwrap();
    let template = scaffold(&dir);
    let data = write_data(&dir, DATA);
    let output = dir.path().join("out.xlsm");

    let out = run(&[&template, &output, &data]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("saved successfully"));

    let bytes = std::fs::read(&output).unwrap();
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
    let range = workbook.worksheet_range("Shared Template").unwrap();
    assert_eq!(range.get_value((6, 3)), Some(&Data::String("Alice".into())));
    assert_eq!(range.get_value((17, 0)), Some(&Data::String("Poland".into())));
    assert_eq!(range.get_value((17, 4)), Some(&Data::Float(77.0)));
    assert_eq!(range.get_value((18, 0)), Some(&Data::String("Denmark".into())));
    assert_eq!(range.get_value((18, 1)), Some(&Data::String("Change".into())));
    assert_eq!(range.get_value((18, 15)), Some(&Data::Float(0.25)));
}

#[test]
fn accepts_wbs_data_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let template = scaffold(&dir);
    let data = write_data(&dir, &format!(r#"{{"wbsData": {DATA}}}"#));
    let output = dir.path().join("out.xlsm");

    let out = run(&[&template, &output, &data]);
    assert_eq!(out.status.code(), Some(0));
    assert!(output.is_file());
}

#[test]
fn missing_template_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_data(&dir, DATA);
    let output = dir.path().join("out.xlsm");

    let out = run(&[&dir.path().join("nope.xlsm"), &output, &data]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Template not found"));
    assert!(!output.exists());
}

#[test]
fn invalid_json_fails() {
    let dir = tempfile::tempdir().unwrap();
    let template = scaffold(&dir);
    let data = write_data(&dir, "[1, 2]");
    let output = dir.path().join("out.xlsm");

    let out = run(&[&template, &output, &data]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("must be an object"));
}

#[test]
fn empty_list_clears_headers_only() {
    let dir = tempfile::tempdir().unwrap();
    let template = scaffold(&dir);
    let data = write_data(&dir, "[]");
    let output = dir.path().join("out.xlsm");

    let out = run(&[&template, &output, &data]);
    assert_eq!(out.status.code(), Some(0));
    assert!(output.is_file());
}

#[test]
fn missing_arguments_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&[dir.path()]);
    assert!(!out.status.success());
}

#[test]
fn plan_prints_cell_map() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_data(&dir, DATA);

    let out = wbsx().arg("plan").arg(&data).output().unwrap();
    assert!(out.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(plan["sheet"], "Shared Template");
    assert_eq!(plan["cells"]["A18"], "Poland");
    assert_eq!(plan["cells"]["D7"], "Alice");
    assert_eq!(plan["cells"]["P19"], 0.25);
}

#[test]
fn automation_writer_needs_host_program() {
    let dir = tempfile::tempdir().unwrap();
    let template = scaffold(&dir);
    let data = write_data(&dir, DATA);
    let output = dir.path().join("out.xlsm");

    let out = wbsx()
        .env_remove("WBSX_HOST_PROGRAM")
        .args([&template, &output, &data])
        .args(["--writer", "automation"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("host program"));
}
