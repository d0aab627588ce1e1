use super::defaults::{
    MAX_BLINK_TIMEOUT_MS, MAX_CAMERA_DIMENSION, MAX_EMBEDDING_DIM, MAX_IDENTIFIER_LEN,
    MAX_POLL_INTERVAL_MS, MAX_REQUIRED_BLINKS, MAX_VERIFY_ATTEMPTS, MIN_CAMERA_DIMENSION,
};
use super::{AppConfig, BiometricConfig};
use anyhow::{bail, Result};
use clap::Parser;
use regex::Regex;
use std::sync::OnceLock;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize identifiers.
    pub fn validate(&mut self) -> Result<()> {
        for (flag, value) in [
            ("--camera-width", self.camera_width),
            ("--camera-height", self.camera_height),
        ] {
            if !(MIN_CAMERA_DIMENSION..=MAX_CAMERA_DIMENSION).contains(&value) {
                bail!(
                    "{flag} must be between {MIN_CAMERA_DIMENSION} and {MAX_CAMERA_DIMENSION}, got {value}"
                );
            }
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            bail!(
                "--poll-interval-ms must be between 1 and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            );
        }
        if !(self.ear_threshold > 0.0 && self.ear_threshold < 1.0) {
            bail!(
                "--ear-threshold must be between 0.0 and 1.0 (exclusive), got {}",
                self.ear_threshold
            );
        }
        if !(1..=MAX_REQUIRED_BLINKS).contains(&self.required_blinks) {
            bail!(
                "--required-blinks must be between 1 and {MAX_REQUIRED_BLINKS}, got {}",
                self.required_blinks
            );
        }
        if self.blink_timeout_ms < self.poll_interval_ms
            || self.blink_timeout_ms > MAX_BLINK_TIMEOUT_MS
        {
            bail!(
                "--blink-timeout-ms must be between --poll-interval-ms ({}) and {MAX_BLINK_TIMEOUT_MS}",
                self.poll_interval_ms
            );
        }
        if self.blink_open_debounce_ms > self.blink_close_debounce_ms {
            bail!(
                "--blink-open-debounce-ms ({}) cannot exceed --blink-close-debounce-ms ({})",
                self.blink_open_debounce_ms,
                self.blink_close_debounce_ms
            );
        }
        if self.blink_close_debounce_ms >= self.blink_timeout_ms {
            bail!(
                "--blink-close-debounce-ms ({}) must be shorter than --blink-timeout-ms ({})",
                self.blink_close_debounce_ms,
                self.blink_timeout_ms
            );
        }
        if self.blink_settle_ms > 10_000 {
            bail!(
                "--blink-settle-ms must be at most 10000, got {}",
                self.blink_settle_ms
            );
        }
        if !(self.match_threshold > 0.0 && self.match_threshold.is_finite()) {
            bail!(
                "--match-threshold must be a positive finite distance, got {}",
                self.match_threshold
            );
        }
        if !(1..=MAX_VERIFY_ATTEMPTS).contains(&self.max_verify_attempts) {
            bail!(
                "--max-verify-attempts must be between 1 and {MAX_VERIFY_ATTEMPTS}, got {}",
                self.max_verify_attempts
            );
        }
        if !(1..=MAX_EMBEDDING_DIM).contains(&self.embedding_dim) {
            bail!(
                "--embedding-dim must be between 1 and {MAX_EMBEDDING_DIM}, got {}",
                self.embedding_dim
            );
        }
        if !(1..=50).contains(&self.enroll_pose_retries) {
            bail!(
                "--enroll-pose-retries must be between 1 and 50, got {}",
                self.enroll_pose_retries
            );
        }

        self.user = normalize_identifier(self.user.take(), "--user")?;
        self.election = normalize_identifier(self.election.take(), "--election")?;
        self.option = normalize_identifier(self.option.take(), "--option")?;

        if let Some(trace) = &self.trace {
            if !trace.is_file() {
                bail!("--trace '{}' is not a readable file", trace.display());
            }
        }
        if let Some(dir) = &self.model_dir {
            if !dir.is_dir() {
                bail!("--model-dir '{}' is not a directory", dir.display());
            }
        }
        if let Some(path) = &self.import_elections {
            if !path.is_file() {
                bail!("--import-elections '{}' is not a readable file", path.display());
            }
        }
        if self.store_path.as_os_str().is_empty() {
            bail!("--store cannot be empty");
        }

        Ok(())
    }

    /// Snapshot the CLI-controlled biometric settings for downstream consumers.
    pub fn biometric_config(&self) -> BiometricConfig {
        BiometricConfig {
            camera_width: self.camera_width,
            camera_height: self.camera_height,
            poll_interval_ms: self.poll_interval_ms,
            ear_threshold: self.ear_threshold,
            required_blinks: self.required_blinks,
            blink_timeout_ms: self.blink_timeout_ms,
            blink_close_debounce_ms: self.blink_close_debounce_ms,
            blink_open_debounce_ms: self.blink_open_debounce_ms,
            blink_settle_ms: self.blink_settle_ms,
            match_threshold: self.match_threshold,
            max_verify_attempts: self.max_verify_attempts,
            embedding_dim: self.embedding_dim,
            enroll_pose_retries: self.enroll_pose_retries,
        }
    }
}

/// Identifiers end up in store keys and image paths, so keep them boring.
pub(crate) fn is_valid_identifier(value: &str) -> bool {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = IDENT_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:@-]*$").expect("identifier regex should compile")
    });
    value.len() <= MAX_IDENTIFIER_LEN && re.is_match(value) && !value.contains("..")
}

fn normalize_identifier(value: Option<String>, flag: &str) -> Result<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if !is_valid_identifier(trimmed) {
        bail!(
            "{flag} must be at most {MAX_IDENTIFIER_LEN} characters of letters, digits or '_.:@-', got '{trimmed}'"
        );
    }
    Ok(Some(trimmed.to_string()))
}
