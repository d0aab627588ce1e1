//! JSON IPC mode for external front ends.
//!
//! A non-blocking JSON-lines protocol over stdin/stdout that lets a UI drive
//! one voting session.
//!
//! Architecture:
//! - Stdin reader thread: parses commands and forwards them over a channel
//! - Main loop: handles quick commands inline and polls the running job
//! - Camera steps (enroll, verify, liveness) run on a worker thread that owns
//!   the session until it reports back
//!
//! Protocol:
//! - Events (runner → client): {"event": "...", ...}
//! - Commands (client → runner): {"cmd": "...", ...}

mod protocol;
mod session;


pub use protocol::{IpcCommand, IpcEvent, JobKind};
pub use session::run_ipc_mode;
