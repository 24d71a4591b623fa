//! Command-line behaviour that needs no network access.

use std::process::{Command, Output};

use serde_json::Value;

fn pagesift(dir: &tempfile::TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pagesift"))
        .args(args)
        .current_dir(dir.path())
        .env_remove("PAGESIFT_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run pagesift")
}

#[test]
fn invalid_url_writes_failure_json_and_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("nested/out/result.json");

    let output = pagesift(
        &dir,
        &[
            "--url",
            "not a url",
            "--output",
            out_path.to_str().unwrap(),
            "--log-level",
            "error",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error scraping not a url"), "stderr: {stderr}");

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["url"], "not a url");
    assert_eq!(written["errorKind"], "invalid_url");
    assert!(written.get("content").is_none());
}

#[test]
fn unsupported_scheme_uses_strategy_alias() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("result.json");

    let output = pagesift(
        &dir,
        &[
            "--url",
            "ftp://example.com/file",
            "--strategy",
            "selenium",
            "--output",
            out_path.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["errorKind"], "invalid_url");
}

#[test]
fn output_flag_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let output = pagesift(&dir, &["--url", "https://example.com/"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn query_needs_city() {
    let dir = tempfile::tempdir().unwrap();
    let output = pagesift(&dir, &["--query", "kayak", "--output", "out.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn broken_config_file_fails_before_scraping() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pagesift.json"), "{ not json").unwrap();

    let output = pagesift(
        &dir,
        &["--url", "https://example.com/", "--output", "out.json"],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "stderr: {stderr}");
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn largest_timeout_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("result.json");

    let output = pagesift(
        &dir,
        &[
            "--url",
            "not a url",
            "--timeout",
            "18446744073709551615",
            "--output",
            out_path.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["errorKind"], "invalid_url");
}
