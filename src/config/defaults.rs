use std::env;
use std::path::PathBuf;

pub const DEFAULT_CAMERA_WIDTH: u32 = 640;
pub const DEFAULT_CAMERA_HEIGHT: u32 = 480;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.25;
pub const DEFAULT_REQUIRED_BLINKS: u32 = 3;
pub const DEFAULT_BLINK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BLINK_CLOSE_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_BLINK_OPEN_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_BLINK_SETTLE_MS: u64 = 1_000;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MAX_VERIFY_ATTEMPTS: u32 = 50;
pub const DEFAULT_EMBEDDING_DIM: usize = 128;
pub const DEFAULT_ENROLL_POSE_RETRIES: u32 = 5;

pub(super) const MAX_CAMERA_DIMENSION: u32 = 4096;
pub(super) const MIN_CAMERA_DIMENSION: u32 = 64;
pub(super) const MAX_POLL_INTERVAL_MS: u64 = 2_000;
pub(super) const MAX_BLINK_TIMEOUT_MS: u64 = 300_000;
pub(super) const MAX_REQUIRED_BLINKS: u32 = 20;
pub(super) const MAX_VERIFY_ATTEMPTS: u32 = 10_000;
pub(super) const MAX_EMBEDDING_DIM: usize = 4096;
pub(super) const MAX_IDENTIFIER_LEN: usize = 128;

pub(super) fn default_store_path() -> PathBuf {
    env::temp_dir().join("ballotgate_store.json")
}
