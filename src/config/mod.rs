//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::Parser;
use std::path::PathBuf;

use defaults::default_store_path;
pub use defaults::{
    DEFAULT_BLINK_CLOSE_DEBOUNCE_MS, DEFAULT_BLINK_OPEN_DEBOUNCE_MS, DEFAULT_BLINK_SETTLE_MS,
    DEFAULT_BLINK_TIMEOUT_MS, DEFAULT_CAMERA_HEIGHT, DEFAULT_CAMERA_WIDTH, DEFAULT_EAR_THRESHOLD,
    DEFAULT_EMBEDDING_DIM, DEFAULT_ENROLL_POSE_RETRIES, DEFAULT_MATCH_THRESHOLD,
    DEFAULT_MAX_VERIFY_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUIRED_BLINKS,
};
pub(crate) use validation::is_valid_identifier;

/// CLI options for ballotgate. Validated values keep the detectors and stores sane.
#[derive(Debug, Parser, Clone)]
#[command(about = "BallotGate biometric voting core", author, version)]
pub struct AppConfig {
    /// Voter id to authenticate as
    #[arg(long, env = "BALLOTGATE_USER")]
    pub user: Option<String>,

    /// Election to vote in
    #[arg(long)]
    pub election: Option<String>,

    /// Option to vote for
    #[arg(long = "option")]
    pub option: Option<String>,

    /// JSON snapshot used as the profile/vote/election store
    #[arg(long = "store", env = "BALLOTGATE_STORE", default_value_os_t = default_store_path())]
    pub store_path: PathBuf,

    /// Import elections from a JSON file into the store before running
    #[arg(long = "import-elections", value_name = "PATH")]
    pub import_elections: Option<PathBuf>,

    /// Print active elections and exit
    #[arg(long = "list-elections", default_value_t = false)]
    pub list_elections: bool,

    /// Detection trace (JSON lines) replayed by the detector
    #[arg(long, value_name = "PATH")]
    pub trace: Option<PathBuf>,

    /// Directory holding the landmark and recognition models
    #[arg(long = "model-dir", env = "BALLOTGATE_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Requested camera frame width
    #[arg(long = "camera-width", default_value_t = DEFAULT_CAMERA_WIDTH)]
    pub camera_width: u32,

    /// Requested camera frame height
    #[arg(long = "camera-height", default_value_t = DEFAULT_CAMERA_HEIGHT)]
    pub camera_height: u32,

    /// Detector polling interval (milliseconds)
    #[arg(long = "poll-interval-ms", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Eye aspect ratio below which the eyes count as closed
    #[arg(long = "ear-threshold", default_value_t = DEFAULT_EAR_THRESHOLD)]
    pub ear_threshold: f32,

    /// Blinks required to pass the liveness check
    #[arg(long = "required-blinks", default_value_t = DEFAULT_REQUIRED_BLINKS)]
    pub required_blinks: u32,

    /// Liveness check budget (milliseconds)
    #[arg(long = "blink-timeout-ms", default_value_t = DEFAULT_BLINK_TIMEOUT_MS)]
    pub blink_timeout_ms: u64,

    /// Minimum gap after a counted blink before a new eye closure is accepted (milliseconds)
    #[arg(
        long = "blink-close-debounce-ms",
        default_value_t = DEFAULT_BLINK_CLOSE_DEBOUNCE_MS
    )]
    pub blink_close_debounce_ms: u64,

    /// Minimum gap after a counted blink before a reopening counts (milliseconds)
    #[arg(
        long = "blink-open-debounce-ms",
        default_value_t = DEFAULT_BLINK_OPEN_DEBOUNCE_MS
    )]
    pub blink_open_debounce_ms: u64,

    /// Delay between the final blink and reporting success (milliseconds)
    #[arg(long = "blink-settle-ms", default_value_t = DEFAULT_BLINK_SETTLE_MS)]
    pub blink_settle_ms: u64,

    /// Embedding distance below which a face matches the template
    #[arg(long = "match-threshold", default_value_t = DEFAULT_MATCH_THRESHOLD)]
    pub match_threshold: f32,

    /// Sampling ticks allowed before face verification times out
    #[arg(long = "max-verify-attempts", default_value_t = DEFAULT_MAX_VERIFY_ATTEMPTS)]
    pub max_verify_attempts: u32,

    /// Embedding length produced by the recognition model
    #[arg(long = "embedding-dim", default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub embedding_dim: usize,

    /// Capture attempts per enrollment pose before giving up
    #[arg(long = "enroll-pose-retries", default_value_t = DEFAULT_ENROLL_POSE_RETRIES)]
    pub enroll_pose_retries: u32,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "BALLOTGATE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "BALLOTGATE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging identifiers and panic payloads (debug log only)
    #[arg(
        long = "log-content",
        env = "BALLOTGATE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,

    /// Run in JSON IPC mode for external UI integration
    #[arg(long = "json-ipc")]
    pub json_ipc: bool,
}

/// Tunable parameters for the enrollment, verification and liveness steps.
#[derive(Debug, Clone, PartialEq)]
pub struct BiometricConfig {
    pub camera_width: u32,
    pub camera_height: u32,
    pub poll_interval_ms: u64,
    pub ear_threshold: f32,
    pub required_blinks: u32,
    pub blink_timeout_ms: u64,
    pub blink_close_debounce_ms: u64,
    pub blink_open_debounce_ms: u64,
    pub blink_settle_ms: u64,
    pub match_threshold: f32,
    pub max_verify_attempts: u32,
    pub embedding_dim: usize,
    pub enroll_pose_retries: u32,
}

impl Default for BiometricConfig {
    fn default() -> Self {
        Self {
            camera_width: DEFAULT_CAMERA_WIDTH,
            camera_height: DEFAULT_CAMERA_HEIGHT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            required_blinks: DEFAULT_REQUIRED_BLINKS,
            blink_timeout_ms: DEFAULT_BLINK_TIMEOUT_MS,
            blink_close_debounce_ms: DEFAULT_BLINK_CLOSE_DEBOUNCE_MS,
            blink_open_debounce_ms: DEFAULT_BLINK_OPEN_DEBOUNCE_MS,
            blink_settle_ms: DEFAULT_BLINK_SETTLE_MS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_verify_attempts: DEFAULT_MAX_VERIFY_ATTEMPTS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            enroll_pose_retries: DEFAULT_ENROLL_POSE_RETRIES,
        }
    }
}
