use crate::flow::{Progress, SessionSnapshot, StepError, StepReport, VotingSession};
use crate::session::Step;
use crate::vision::CancelToken;
use crate::{log_debug, log_debug_content};
use anyhow::{bail, Result};
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use super::protocol::{IpcCommand, IpcEvent, JobKind};

// ============================================================================
// IPC State
// ============================================================================

pub(super) struct IpcState {
    /// `None` while a camera job owns the session.
    pub(super) session: Option<VotingSession>,
    pub(super) current_job: Option<SessionJob>,
}

pub(super) enum JobMessage {
    Progress(Progress),
    Finished {
        session: Box<VotingSession>,
        result: Result<StepReport, StepError>,
    },
}

pub(super) struct SessionJob {
    pub(super) kind: JobKind,
    pub(super) cancel: CancelToken,
    pub(super) cancel_requested: bool,
    pub(super) receiver: Receiver<JobMessage>,
    pub(super) started_at: Instant,
    /// Session state when the job started.
    pub(super) snapshot: SessionSnapshot,
}

impl IpcState {
    pub(super) fn new(session: VotingSession) -> Self {
        Self {
            session: Some(session),
            current_job: None,
        }
    }

    pub(super) fn emit_ready(&self) {
        if let Some(session) = &self.session {
            let snapshot = session.snapshot();
            send_event(&IpcEvent::Ready {
                session_id: snapshot.session_id,
                version: env!("CARGO_PKG_VERSION").to_string(),
                detector: session.detector_name().to_string(),
                step: snapshot.step,
            });
        }
    }
}

// ============================================================================
// Event Sending
// ============================================================================

pub(super) fn send_event(event: &IpcEvent) {
    #[cfg(test)]
    if capture_test_event(event) {
        return;
    }
    if let Ok(json) = serde_json::to_string(event) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{json}");
        let _ = stdout.flush();
    }
}

#[cfg(test)]
thread_local! {
    static EVENT_SINK: std::cell::RefCell<Option<Vec<IpcEvent>>> =
        const { std::cell::RefCell::new(None) };
}

#[cfg(test)]
fn capture_test_event(event: &IpcEvent) -> bool {
    EVENT_SINK.with(|sink| match sink.borrow_mut().as_mut() {
        Some(events) => {
            events.push(event.clone());
            true
        }
        None => false,
    })
}

/// Capture events sent from this thread instead of writing them to stdout.
#[cfg(test)]
pub(super) fn init_event_sink() {
    EVENT_SINK.with(|sink| {
        sink.borrow_mut().get_or_insert_with(Vec::new);
    });
}

#[cfg(test)]
pub(super) fn take_events() -> Vec<IpcEvent> {
    EVENT_SINK.with(|sink| {
        sink.borrow_mut()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    })
}

fn send_error(err: &StepError) {
    send_event(&IpcEvent::Error {
        message: err.to_string(),
        recoverable: err.is_recoverable(),
    });
}

fn send_session_lost() {
    send_event(&IpcEvent::Error {
        message: "session is unavailable after a worker failure".to_string(),
        recoverable: false,
    });
}

fn send_report(report: &StepReport) {
    if report.from != report.step {
        send_event(&IpcEvent::StepChanged {
            from: report.from,
            to: report.step,
        });
    }
    for notice in &report.notices {
        send_event(&IpcEvent::Notice {
            level: notice.level,
            message: notice.message.clone(),
        });
    }
}

/// Report a step result, including a step change caused by a failure.
fn send_result(before: Step, after: Step, result: &Result<StepReport, StepError>) {
    match result {
        Ok(report) => send_report(report),
        Err(err) => {
            if before != after {
                send_event(&IpcEvent::StepChanged {
                    from: before,
                    to: after,
                });
            }
            send_error(err);
        }
    }
}

// ============================================================================
// Stdin Reader Thread
// ============================================================================

fn spawn_stdin_reader(tx: Sender<IpcCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        let stdin_lock = stdin.lock();

        for line in stdin_lock.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break; // Main loop has exited
                    }
                }
                Err(e) => {
                    send_event(&IpcEvent::Error {
                        message: format!("Invalid command: {e}"),
                        recoverable: true,
                    });
                }
            }
        }

        log_debug("Stdin reader thread exiting");
    })
}

// ============================================================================
// Camera Jobs
// ============================================================================

pub(super) fn start_job(state: &mut IpcState, kind: JobKind) {
    if state.current_job.is_some() {
        send_event(&IpcEvent::Error {
            message: "a camera step is already running".to_string(),
            recoverable: true,
        });
        return;
    }
    let Some(mut session) = state.session.take() else {
        send_session_lost();
        return;
    };

    let snapshot = session.snapshot();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let (tx, rx) = mpsc::channel();
    send_event(&IpcEvent::JobStart {
        job: kind.as_str().to_string(),
    });
    thread::spawn(move || {
        let progress_tx = tx.clone();
        let mut progress = move |p: Progress| {
            let _ = progress_tx.send(JobMessage::Progress(p));
        };
        let result = match kind {
            JobKind::Enroll => session.enroll(&worker_cancel, &mut progress),
            JobKind::Verify => session.verify(&worker_cancel, &mut progress),
            JobKind::Liveness => session.check_liveness(&worker_cancel, &mut progress),
        };
        let _ = tx.send(JobMessage::Finished {
            session: Box::new(session),
            result,
        });
    });

    state.current_job = Some(SessionJob {
        kind,
        cancel,
        cancel_requested: false,
        receiver: rx,
        started_at: Instant::now(),
        snapshot,
    });
}

/// Drain job messages; returns true once the job has handed the session back.
pub(super) fn process_job_events(state: &mut IpcState) -> bool {
    let Some(job) = state.current_job.as_mut() else {
        return false;
    };
    loop {
        match job.receiver.try_recv() {
            Ok(JobMessage::Progress(progress)) => {
                send_event(&IpcEvent::Progress { progress });
            }
            Ok(JobMessage::Finished { session, result }) => {
                let kind = job.kind;
                let cancel_requested = job.cancel_requested;
                log_debug(&format!(
                    "IPC job {} finished in {}ms",
                    kind.as_str(),
                    job.started_at.elapsed().as_millis()
                ));
                finish_job(state, kind, *session, result, cancel_requested);
                return true;
            }
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => {
                // Worker panicked with the session; nothing left to drive.
                send_event(&IpcEvent::JobEnd {
                    job: job.kind.as_str().to_string(),
                    success: false,
                    error: Some("session worker disconnected".to_string()),
                });
                send_event(&IpcEvent::Error {
                    message: "session worker disconnected".to_string(),
                    recoverable: false,
                });
                return true;
            }
        }
    }
}

fn finish_job(
    state: &mut IpcState,
    kind: JobKind,
    mut session: VotingSession,
    result: Result<StepReport, StepError>,
    cancel_requested: bool,
) {
    send_event(&IpcEvent::JobEnd {
        job: kind.as_str().to_string(),
        success: result.is_ok(),
        error: result.as_ref().err().map(ToString::to_string),
    });
    let before = match &result {
        Ok(report) => report.from,
        Err(_) => job_step(kind),
    };
    send_result(before, session.step(), &result);

    // Enroll has no cancel edge; the voter simply stays on the enroll step.
    if cancel_requested
        && kind != JobKind::Enroll
        && matches!(result, Err(StepError::Cancelled))
    {
        let before = session.step();
        let outcome = session.cancel();
        send_result(before, session.step(), &outcome);
    }
    state.session = Some(session);
}

fn job_step(kind: JobKind) -> Step {
    match kind {
        JobKind::Enroll => Step::Enroll,
        JobKind::Verify => Step::Verify,
        JobKind::Liveness => Step::Liveness,
    }
}

// ============================================================================
// Command Handling
// ============================================================================

pub(super) fn handle_command(state: &mut IpcState, cmd: IpcCommand) {
    if let Some(job) = state.current_job.as_mut() {
        match cmd {
            IpcCommand::Cancel => {
                job.cancel_requested = true;
                job.cancel.cancel();
                log_debug(&format!("IPC cancel requested for {}", job.kind.as_str()));
            }
            IpcCommand::GetState => send_event(&IpcEvent::State {
                snapshot: job.snapshot.clone(),
            }),
            other => send_event(&IpcEvent::Error {
                message: format!(
                    "cannot handle {other:?} while the {} step is running",
                    job.kind.as_str()
                ),
                recoverable: true,
            }),
        }
        return;
    }

    match cmd {
        IpcCommand::Enroll => start_job(state, JobKind::Enroll),
        IpcCommand::Verify => start_job(state, JobKind::Verify),
        IpcCommand::Liveness => start_job(state, JobKind::Liveness),
        other => {
            let Some(session) = state.session.as_mut() else {
                send_session_lost();
                return;
            };
            handle_session_command(session, other);
        }
    }
}

fn handle_session_command(session: &mut VotingSession, cmd: IpcCommand) {
    let before = session.step();
    let result = match cmd {
        IpcCommand::Auth { user_id } => session.authenticate(&user_id),
        IpcCommand::CastVote {
            election_id,
            option_id,
        } => {
            let result = session.cast_vote(&election_id, &option_id);
            if result.is_ok() {
                send_event(&IpcEvent::VoteRecorded {
                    election_id,
                    option_id,
                });
            }
            result
        }
        IpcCommand::VoteAgain => session.vote_again(),
        IpcCommand::Cancel => session.cancel(),
        IpcCommand::SignOut => session.sign_out(),
        IpcCommand::ListElections => {
            match session.list_elections() {
                Ok(elections) => send_event(&IpcEvent::Elections { elections }),
                Err(err) => send_error(&err),
            }
            return;
        }
        IpcCommand::GetState => {
            send_event(&IpcEvent::State {
                snapshot: session.snapshot(),
            });
            return;
        }
        IpcCommand::Enroll | IpcCommand::Verify | IpcCommand::Liveness => return,
    };
    send_result(before, session.step(), &result);
}

// ============================================================================
// Main Event Loop
// ============================================================================

pub fn run_ipc_mode(session: VotingSession) -> Result<()> {
    log_debug("Starting JSON IPC mode");

    let mut state = IpcState::new(session);
    state.emit_ready();

    let (cmd_tx, cmd_rx) = mpsc::channel();
    let _stdin_handle = spawn_stdin_reader(cmd_tx);
    run_ipc_loop(&mut state, &cmd_rx, None)
}

/// Process commands and job messages until input closes and no job is running.
pub(super) fn run_ipc_loop(
    state: &mut IpcState,
    cmd_rx: &Receiver<IpcCommand>,
    max_loops: Option<u64>,
) -> Result<()> {
    let mut loop_count: u64 = 0;
    let mut input_open = true;
    loop {
        loop_count += 1;
        if loop_count.is_multiple_of(1000) {
            log_debug(&format!(
                "IPC loop iteration {}, job active: {}",
                loop_count,
                state.current_job.is_some()
            ));
        }

        if let Some(limit) = max_loops {
            if loop_count >= limit {
                log_debug("IPC loop reached iteration limit, exiting");
                break;
            }
        }

        if input_open {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    log_debug_content(&format!("IPC command received: {cmd:?}"));
                    handle_command(state, cmd);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    log_debug("Command channel disconnected");
                    input_open = false;
                }
            }
        }

        if process_job_events(state) {
            state.current_job = None;
            if state.session.is_none() {
                log_debug("IPC session lost with its worker, exiting");
                bail!("session worker stopped without returning the session");
            }
        }

        if !input_open && state.current_job.is_none() {
            break;
        }

        // Small sleep to prevent busy-waiting
        thread::sleep(Duration::from_millis(5));
    }

    log_debug("IPC mode exiting");
    Ok(())
}
