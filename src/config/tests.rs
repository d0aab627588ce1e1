use super::defaults::{default_store_path, MAX_IDENTIFIER_LEN};
use super::validation::is_valid_identifier;
use super::{AppConfig, BiometricConfig};
use clap::Parser;
use std::env;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = env::temp_dir().join(format!("ballotgate-config-{tag}-{nanos}"));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn accepts_valid_defaults() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn defaults_round_trip_into_biometric_config() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    cfg.validate().expect("defaults should be valid");
    assert_eq!(cfg.biometric_config(), BiometricConfig::default());
}

#[test]
fn default_constants_match_reference_flow() {
    let cfg = BiometricConfig::default();
    assert_eq!((cfg.camera_width, cfg.camera_height), (640, 480));
    assert_eq!(cfg.poll_interval_ms, 100);
    assert!((cfg.ear_threshold - 0.25).abs() < f32::EPSILON);
    assert_eq!(cfg.required_blinks, 3);
    assert_eq!(cfg.blink_timeout_ms, 30_000);
    assert_eq!(cfg.blink_close_debounce_ms, 500);
    assert_eq!(cfg.blink_open_debounce_ms, 200);
    assert_eq!(cfg.blink_settle_ms, 1_000);
    assert!((cfg.match_threshold - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.max_verify_attempts, 50);
    assert_eq!(cfg.embedding_dim, 128);
}

#[test]
fn default_store_lives_in_temp_dir() {
    let path = default_store_path();
    assert!(path.ends_with("ballotgate_store.json"));
}

#[test]
fn rejects_camera_dimensions_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--camera-width", "32"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--camera-height", "5000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_poll_interval() {
    let mut cfg = AppConfig::parse_from(["test-app", "--poll-interval-ms", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_ear_threshold_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--ear-threshold", "0.0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--ear-threshold", "1.5"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_required_blinks() {
    let mut cfg = AppConfig::parse_from(["test-app", "--required-blinks", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_open_debounce_longer_than_close_debounce() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--blink-open-debounce-ms",
        "600",
        "--blink-close-debounce-ms",
        "500",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_blink_timeout_shorter_than_poll_interval() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--poll-interval-ms",
        "200",
        "--blink-timeout-ms",
        "100",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_non_positive_match_threshold() {
    let mut cfg = AppConfig::parse_from(["test-app", "--match-threshold=-0.5"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_verify_attempts_and_embedding_dim() {
    let mut cfg = AppConfig::parse_from(["test-app", "--max-verify-attempts", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--embedding-dim", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn trims_and_accepts_identifiers() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--user",
        "  voter-42 ",
        "--election",
        "city:2026",
        "--option",
        "opt_a",
    ]);
    cfg.validate().expect("identifiers should be valid");
    assert_eq!(cfg.user.as_deref(), Some("voter-42"));
    assert_eq!(cfg.election.as_deref(), Some("city:2026"));
    assert_eq!(cfg.option.as_deref(), Some("opt_a"));
}

#[test]
fn rejects_identifiers_with_path_or_shell_characters() {
    for bad in ["../etc", "a/b", "name$VAR", "semi;colon", "space here", "-leading"] {
        let flag = format!("--user={bad}");
        let mut cfg = AppConfig::parse_from(["test-app", flag.as_str()]);
        assert!(cfg.validate().is_err(), "user '{bad}' should be rejected");
    }
}

#[test]
fn identifier_length_is_capped() {
    let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
    assert!(!is_valid_identifier(&long));
    assert!(is_valid_identifier(&"a".repeat(MAX_IDENTIFIER_LEN)));
}

#[test]
fn rejects_missing_trace_file() {
    let dir = scratch_dir("trace");
    let missing = dir.join("missing.jsonl");
    let mut cfg = AppConfig::parse_from(["test-app", "--trace", missing.to_str().unwrap()]);
    assert!(cfg.validate().is_err());

    let present = dir.join("present.jsonl");
    fs::write(&present, "null\n").unwrap();
    let mut cfg = AppConfig::parse_from(["test-app", "--trace", present.to_str().unwrap()]);
    assert!(cfg.validate().is_ok());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn model_dir_must_be_a_directory() {
    let dir = scratch_dir("models");
    let file = dir.join("weights.bin");
    fs::write(&file, [0u8; 4]).unwrap();
    let mut cfg = AppConfig::parse_from(["test-app", "--model-dir", file.to_str().unwrap()]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--model-dir", dir.to_str().unwrap()]);
    assert!(cfg.validate().is_ok());
    let _ = fs::remove_dir_all(dir);
}
