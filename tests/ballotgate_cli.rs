use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn combined_output(output: &Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn ballotgate_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_ballotgate").expect("ballotgate test binary not built")
}

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("ballotgate-cli-{tag}-{nanos}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn ballotgate(store: &Path) -> Command {
    let mut command = Command::new(ballotgate_bin());
    command
        .arg("--store")
        .arg(store)
        .arg("--no-logs")
        .env_remove("BALLOTGATE_USER")
        .env_remove("BALLOTGATE_MODEL_DIR");
    command
}

/// JSON line for a face whose eyes have the given EAR.
fn face_line(ear: f32, embedding: Option<&[f32]>) -> String {
    let h = ear * 15.0;
    let eye = format!("[[0,0],[10,{}],[20,{}],[30,0],[20,{h}],[10,{h}]]", -h, -h);
    let embedding = embedding
        .map(|values| format!(",\"embedding\":{}", serde_json::to_string(values).unwrap()))
        .unwrap_or_default();
    format!("{{\"landmarks\":{{\"left_eye\":{eye},\"right_eye\":{eye}}}{embedding}}}")
}

fn write_trace(dir: &Path) -> PathBuf {
    let template = [0.2f32, 0.5, 0.5, 0.5];
    let mut lines = vec!["# enrollment".to_string()];
    for _ in 0..3 {
        lines.push(face_line(0.3, Some(&template)));
    }
    lines.push("# verification".to_string());
    lines.push("null".to_string());
    lines.push(face_line(0.3, Some(&template)));
    lines.push("# liveness".to_string());
    lines.push(face_line(0.35, None));
    for _ in 0..3 {
        lines.push(face_line(0.1, None));
        lines.push(face_line(0.35, None));
    }
    let path = dir.join("trace.jsonl");
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn write_elections(dir: &Path) -> PathBuf {
    let path = dir.join("elections.json");
    fs::write(
        &path,
        r#"[{"id":"budget","title":"Budget vote","start_ms":0,"end_ms":18446744073709551615,
            "options":[{"id":"yes","label":"Yes"},{"id":"no","label":"No"}]}]"#,
    )
    .unwrap();
    path
}

fn fast_flags(command: &mut Command) -> &mut Command {
    command.args([
        "--embedding-dim",
        "4",
        "--poll-interval-ms",
        "2",
        "--blink-close-debounce-ms",
        "0",
        "--blink-open-debounce-ms",
        "0",
        "--blink-settle-ms",
        "0",
    ])
}

#[test]
fn ballotgate_help_mentions_name() {
    let output = Command::new(ballotgate_bin())
        .arg("--help")
        .output()
        .expect("run ballotgate --help");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("BallotGate"));
}

#[test]
fn ballotgate_rejects_bad_threshold() {
    let dir = scratch_dir("bad-flag");
    let output = ballotgate(&dir.join("store.json"))
        .args(["--match-threshold", "0"])
        .output()
        .expect("run ballotgate");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--match-threshold"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn ballotgate_imports_and_lists_elections() {
    let dir = scratch_dir("elections");
    let store = dir.join("store.json");
    let output = ballotgate(&store)
        .arg("--list-elections")
        .output()
        .expect("run ballotgate --list-elections");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("no active elections"));

    let output = ballotgate(&store)
        .arg("--import-elections")
        .arg(write_elections(&dir))
        .arg("--list-elections")
        .output()
        .expect("run ballotgate --import-elections");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("imported 1 election(s)"));
    assert!(combined.contains("budget  Budget vote"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn ballotgate_votes_once_per_election() {
    let dir = scratch_dir("vote");
    let store = dir.join("store.json");
    let trace = write_trace(&dir);
    let elections = write_elections(&dir);

    let output = fast_flags(&mut ballotgate(&store))
        .arg("--import-elections")
        .arg(&elections)
        .args(["--user", "carol", "--election", "budget", "--option", "yes"])
        .arg("--trace")
        .arg(&trace)
        .output()
        .expect("run ballotgate vote");
    let combined = combined_output(&output);
    assert!(output.status.success(), "{combined}");
    assert!(combined.contains("step: auth -> enroll"));
    assert!(combined.contains("blink 3/3"));
    assert!(combined.contains("vote recorded: budget -> yes"));

    // The stored template is reused, so the trace's enrollment frames now feed verification.
    let output = fast_flags(&mut ballotgate(&store))
        .args(["--user", "carol", "--election", "budget", "--option", "no"])
        .arg("--trace")
        .arg(&trace)
        .output()
        .expect("run ballotgate second vote");
    let combined = combined_output(&output);
    assert!(!output.status.success(), "{combined}");
    assert!(combined.contains("already voted"));
    let _ = fs::remove_dir_all(dir);
}
