pub mod app;
pub mod config;
pub mod enroll;
pub mod flow;
pub mod ipc;
pub mod liveness;
mod lock;
pub mod session;
pub mod signal;
pub mod store;
mod telemetry;
pub mod verify;
pub mod vision;

use std::time::{SystemTime, UNIX_EPOCH};

pub use app::{crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub(crate) use lock::lock_or_recover;
pub use telemetry::{init_tracing, tracing_log_path};

/// Wall-clock milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
