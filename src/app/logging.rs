use crate::config::AppConfig;
use std::{
    env, fs,
    io::Write,
    panic,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
};

const DEBUG_LOG_MAX_BYTES: u64 = 4 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static CRASH_ENABLED: AtomicBool = AtomicBool::new(false);
static DEBUG_LOG: OnceLock<Mutex<Option<CappedLog>>> = OnceLock::new();

/// Debug log location; `BALLOTGATE_DEBUG_LOG` overrides the temp-dir default.
pub fn log_file_path() -> PathBuf {
    env::var("BALLOTGATE_DEBUG_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("ballotgate_debug.log"))
}

/// Crash log location (panic metadata only).
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("ballotgate_crash.log")
}

/// Append-only file that starts over once it would grow past `max_bytes`.
struct CappedLog {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    len: u64,
}

impl CappedLog {
    fn open(path: &Path, max_bytes: u64) -> Option<Self> {
        let mut len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if len > max_bytes {
            let _ = fs::remove_file(path);
            len = 0;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()?;
        Some(Self {
            path: path.to_path_buf(),
            file,
            max_bytes,
            len,
        })
    }

    fn append(&mut self, line: &str) {
        if self.len.saturating_add(line.len() as u64) > self.max_bytes {
            if let Ok(file) = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
            {
                self.file = file;
                self.len = 0;
            }
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.len = self.len.saturating_add(line.len() as u64);
        }
    }
}

fn debug_log() -> &'static Mutex<Option<CappedLog>> {
    DEBUG_LOG.get_or_init(|| Mutex::new(None))
}

fn set_enabled(enabled: bool, content: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    CONTENT_ENABLED.store(enabled && content, Ordering::Relaxed);
    CRASH_ENABLED.store(enabled, Ordering::Relaxed);
    let mut slot = debug_log()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = if enabled {
        CappedLog::open(&log_file_path(), DEBUG_LOG_MAX_BYTES)
    } else {
        None
    };
}

/// Configure file logging from the CLI flags.
pub fn init_logging(config: &AppConfig) {
    let enabled = (config.logs || config.log_timings) && !config.no_logs;
    set_enabled(enabled, config.log_content);
}

/// Write a diagnostic line to the debug log. Never writes to stdout, which may carry IPC.
pub fn log_debug(msg: &str) {
    if !DEBUG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", crate::unix_millis());
    let mut slot = debug_log()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(log) = slot.as_mut() {
        log.append(&line);
    }
}

/// Write a line that may carry voter identifiers; dropped unless `--log-content` is set.
pub fn log_debug_content(msg: &str) {
    if !CONTENT_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    log_debug(msg);
}

/// Record a panic location in the crash log, omitting the payload unless content logging is on.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !CRASH_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let payload = if CONTENT_ENABLED.load(Ordering::Relaxed) {
        panic_payload_text(info.payload())
    } else {
        "payload omitted (log-content disabled)".to_string()
    };
    let line = format!(
        "[{}] panic at {location}: {payload} (ballotgate v{})\n",
        crate::unix_millis(),
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut log) = CappedLog::open(&crash_log_path(), CRASH_LOG_MAX_BYTES) {
        log.append(&line);
    }
}

fn panic_payload_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
