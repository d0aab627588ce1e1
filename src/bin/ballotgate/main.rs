//! BallotGate entrypoint: one-shot CLI voting or JSON IPC for a front end.
//!
//! Both modes drive the same [`VotingSession`]: the detector replays a
//! recorded detection trace against a synthetic camera, and profiles, votes,
//! elections and the audit trail live in a JSON snapshot store.

mod one_shot;

use anyhow::{Context, Result};
use ballotgate::config::AppConfig;
use ballotgate::flow::VotingSession;
use ballotgate::ipc::run_ipc_mode;
use ballotgate::store::{import_elections, BallotStore, ElectionStore, JsonFileStore};
use ballotgate::vision::{CameraSlot, FaceDetector, ReplayDetector, SharedDetector, SyntheticCamera};
use ballotgate::{init_logging, init_tracing, log_debug, log_debug_content, log_file_path, unix_millis};
use std::panic;
use std::sync::{Arc, Mutex, OnceLock};

static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    log_debug(&format!(
        "ballotgate {} starting (debug log: {})",
        env!("CARGO_PKG_VERSION"),
        log_file_path().display()
    ));

    let store = Arc::new(
        JsonFileStore::open(&config.store_path)
            .with_context(|| format!("failed to open store {}", config.store_path.display()))?,
    );

    if let Some(path) = &config.import_elections {
        let count = import_elections(store.as_ref(), path)?;
        println!("imported {count} election(s) from {}", path.display());
    }

    if config.list_elections {
        print_elections(store.as_ref())?;
        return Ok(());
    }

    let session = build_session(&config, store)?;
    if config.json_ipc {
        return run_ipc_mode(session);
    }

    match config.user.as_deref() {
        Some(user) => one_shot::run(session, &config, user),
        None if config.import_elections.is_some() => Ok(()),
        None => {
            eprintln!("nothing to do: pass --user, --list-elections or --json-ipc (see --help)");
            Ok(())
        }
    }
}

fn build_session(config: &AppConfig, store: Arc<dyn BallotStore>) -> Result<VotingSession> {
    let detector = match &config.trace {
        Some(path) => ReplayDetector::from_trace_file(path)?,
        None => ReplayDetector::from_detections([]),
    };
    log_debug(&format!(
        "detector {} loaded with {} trace entries",
        detector.name(),
        detector.remaining()
    ));
    let detector: SharedDetector = Arc::new(Mutex::new(Box::new(detector)));
    let camera = CameraSlot::new(SyntheticCamera::new());
    Ok(
        VotingSession::new(camera, detector, store, config.biometric_config())
            .with_model_dir(config.model_dir.clone()),
    )
}

fn print_elections(store: &dyn ElectionStore) -> Result<()> {
    let elections = store.list_active_elections(unix_millis())?;
    if elections.is_empty() {
        println!("no active elections");
        return Ok(());
    }
    for election in elections {
        println!("{}  {}", election.id, election.title);
        for option in &election.options {
            println!("    {}  {}", option.id, option.label);
        }
    }
    Ok(())
}

fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            ballotgate::log_panic(info);
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            log_debug(&format!("panic at {location}"));
            log_debug_content(&format!("panic: {info}"));
            previous(info);
        }));
    });
}
