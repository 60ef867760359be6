//! CLI integration tests
//!
//! These run the built binary. Only offline paths are exercised: help output,
//! bundling, argument validation and the saved API key.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to get the path to the circuitpack binary
fn circuitpack_bin() -> PathBuf {
    let mut path = env::current_exe()
        .expect("Failed to get current executable path")
        .parent()
        .expect("No parent")
        .to_path_buf();

    if path.ends_with("deps") {
        path = path.parent().expect("No parent").to_path_buf();
    }

    path.join("circuitpack")
}

/// Runs the binary with an isolated home directory and no API key in the environment
fn run(home: &Path, args: &[&str]) -> Output {
    Command::new(circuitpack_bin())
        .args(args)
        .env("HOME", home)
        .env_remove("CIRCUITPACK_API_KEY")
        .env_remove("CIRCUITPACK_CONFIG_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute circuitpack")
}

fn create_project(dir: &TempDir) -> PathBuf {
    let root = dir.path().join("project");
    fs::create_dir_all(root.join("circuits")).expect("Failed to create circuits directory");
    fs::write(root.join("circomkit.json"), r#"{"protocol": "fflonk"}"#)
        .expect("Failed to write circomkit.json");
    fs::write(
        root.join("circuits/main.circom"),
        "pragma circom 2.1.0;\ninclude \"util.circom\";\ncomponent main {public [x]} = Check(8);\n",
    )
    .expect("Failed to write main.circom");
    fs::write(root.join("circuits/util.circom"), "template Check(n) { signal input x; }\n")
        .expect("Failed to write util.circom");
    root.join("circuits/main.circom")
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["compile", "bundle", "login", "terminate"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--version"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("circuitpack"));
}

#[test]
fn test_bundle_prints_payload() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);

    let output = run(
        dir.path(),
        &["bundle", entry.to_str().unwrap(), "--circom-version", "v2.1.9"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be the payload JSON");
    assert_eq!(payload["pipeline"], "circom");
    assert_eq!(payload["circomPath"], "circom-v2.1.9");
    assert_eq!(payload["protocol"], "fflonk");
    assert_eq!(payload["circuit"]["version"], "2.1.9");
    assert_eq!(payload["circuit"]["template"], "Check");
    assert_eq!(payload["circuit"]["pubs"][0], "x");
    assert!(payload["files"].get("main.circom").is_some());
    assert!(payload["files"].get("util.circom").is_some());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Found 2 file(s):"));
}

#[test]
fn test_verbose_bundle_logs_to_stderr_only() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);

    let output = run(
        dir.path(),
        &["-v", "bundle", entry.to_str().unwrap(), "--circom-version", "v2.1.9"],
    );
    assert!(output.status.success());

    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should stay pure JSON");
    assert_eq!(payload["circomPath"], "circom-v2.1.9");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("starting"));
    assert!(stderr.contains("Found 2 file(s):"));
}

#[test]
fn test_bundle_to_file() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);
    let out = dir.path().join("payload.json");

    let output = run(
        dir.path(),
        &[
            "-q",
            "bundle",
            entry.to_str().unwrap(),
            "--circom-version",
            "v2.1.9",
            "--protocol",
            "plonk",
            "-o",
            out.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());

    let payload: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(payload["protocol"], "plonk");
}

#[test]
fn test_bundle_missing_include() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);
    fs::remove_file(entry.with_file_name("util.circom")).unwrap();

    let output = run(
        dir.path(),
        &["bundle", entry.to_str().unwrap(), "--circom-version", "v2.1.9"],
    );
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[NOT_FOUND]"));
    assert!(stderr.contains("util.circom"));
}

#[test]
fn test_compile_requires_api_key() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);

    let output = run(dir.path(), &["compile", entry.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[MISSING_API_KEY]"));
}

#[test]
fn test_compile_json_error_format() {
    let dir = TempDir::new().unwrap();
    let entry = create_project(&dir);

    let output = run(
        dir.path(),
        &["compile", entry.to_str().unwrap(), "--format", "json"],
    );
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .find(|l| l.starts_with('{'))
        .expect("JSON error line");
    let error: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(error["code"], "MISSING_API_KEY");
}

#[test]
fn test_login_saves_key() {
    let dir = TempDir::new().unwrap();

    let output = run(dir.path(), &["login", "abc123"]);
    assert!(output.status.success());

    let saved = fs::read_to_string(dir.path().join(".circuitpack")).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["apiKey"], "abc123");
}

#[test]
fn test_invalid_subcommand() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["frobnicate"]);
    assert!(!output.status.success());
}
