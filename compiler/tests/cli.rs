// Command-line tests: run the `dfsc` binary on model files and check its
// output, written files and exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PRODUCER_CONSUMER: &str = r#"{
    "name": "P",
    "parameters": [{"name": "total", "expression": "2+3"}],
    "entities": [
        {"name": "producer", "kind": "Const", "parameters": [{"name": "value", "expression": "total"}]},
        {"name": "consumer", "kind": "Scale", "parameters": [{"name": "factor", "expression": "2"}]}
    ],
    "relations": [{"name": "r", "links": ["producer.output", "consumer.input"]}]
}"#;

const DYNAMIC_PORTS: &str = r#"{
    "name": "R",
    "entities": [{"name": "fn", "kind": "MathFunction"}]
}"#;

fn dfsc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dfsc"))
}

/// Fresh scratch directory holding `model.json`.
fn workspace(name: &str, model: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dfsc-cli-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("model.json"), model).unwrap();
    dir
}

fn run(dir: &Path, extra: &[&str]) -> Output {
    let out = dir.join("out");
    let mut args = vec![
        dir.join("model.json").to_str().unwrap().to_string(),
        "--output-dir".to_string(),
        out.to_str().unwrap().to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    Command::new(dfsc_binary())
        .args(&args)
        .output()
        .expect("failed to run dfsc")
}

fn stdout(o: &Output) -> String {
    String::from_utf8_lossy(&o.stdout).into_owned()
}

fn stderr(o: &Output) -> String {
    String::from_utf8_lossy(&o.stderr).into_owned()
}

#[test]
fn summary_lists_classes_and_writes_the_program() {
    let dir = workspace("summary", PRODUCER_CONSUMER);
    let out = run(&dir, &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("model: P"), "{text}");
    assert!(text.contains("rounds: "), "{text}");
    assert!(text.contains("actor classes: "), "{text}");
    assert!(text.contains("catalogue sha256: "), "{text}");
    let program = std::fs::read_to_string(dir.join("out").join("program.ir")).unwrap();
    assert!(program.contains("class dfsc.generated."), "{program}");
    assert!(!dir.join("out").join("snapshots").exists());
}

#[test]
fn snapshots_flag_writes_one_file_per_stage() {
    let dir = workspace("snapshots", PRODUCER_CONSUMER);
    let out = run(&dir, &["--snapshots"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let snaps = dir.join("out").join("snapshots");
    assert!(snaps.join("00-materialize.ir").exists());
    let count = std::fs::read_dir(&snaps).unwrap().count();
    assert!(count >= 3, "{count} snapshots");
}

#[test]
fn emit_ir_prints_the_program() {
    let dir = workspace("ir", PRODUCER_CONSUMER);
    let out = run(&dir, &["--emit", "ir", "--target-package", "acme"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("class acme."), "{text}");
    assert!(!text.contains("getAttribute"), "{text}");
}

#[test]
fn emit_model_shows_resolved_values_without_specializing() {
    let dir = workspace("model", PRODUCER_CONSUMER);
    let out = run(&dir, &["--emit", "model"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("\"2+3\" = 5"), "{text}");
    assert!(text.contains("actor Scale"), "{text}");
    assert!(!dir.join("out").exists());
}

#[test]
fn unsupported_kind_exits_with_failure() {
    let dir = workspace("unsupported", DYNAMIC_PORTS);
    let out = run(&dir, &[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("R.fn"), "{err}");
}

#[test]
fn missing_model_file_exits_with_io_failure() {
    let dir = workspace("missing", PRODUCER_CONSUMER);
    std::fs::remove_file(dir.join("model.json")).unwrap();
    let out = run(&dir, &[]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn malformed_model_exits_with_load_failure() {
    let dir = workspace("malformed", "{\"name\": ");
    let out = run(&dir, &[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("dfsc: error"));
}

#[test]
fn expired_watchdog_reports_did_not_complete() {
    let dir = workspace("watchdog", PRODUCER_CONSUMER);
    let out = run(&dir, &["--watchdog-ms", "0"]);
    assert_eq!(out.status.code(), Some(3));
    let err = stderr(&out);
    assert!(err.contains("did not complete"), "{err}");
}
