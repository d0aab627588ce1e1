//! JSON-lines protocol between the session runner and a front end.
//!
//! One JSON object per line in each direction.

use crate::flow::{Progress, SessionSnapshot};
use crate::session::{NoticeLevel, Step};
use crate::store::Election;
use serde::{Deserialize, Serialize};

// ============================================================================
// IPC Events (runner → client)
// ============================================================================

/// Serialized with an `"event"` tag field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    /// Sent once on startup
    Ready {
        session_id: String,
        version: String,
        detector: String,
        step: Step,
    },

    StepChanged { from: Step, to: Step },

    /// Live feedback from a running camera step
    Progress { progress: Progress },

    Notice { level: NoticeLevel, message: String },

    Elections { elections: Vec<Election> },

    VoteRecorded {
        election_id: String,
        option_id: String,
    },

    State {
        #[serde(flatten)]
        snapshot: SessionSnapshot,
    },

    /// A camera step started on the worker thread
    JobStart { job: String },

    JobEnd {
        job: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Error (recoverable or fatal)
    Error { message: String, recoverable: bool },
}

// ============================================================================
// IPC Commands (client → runner)
// ============================================================================

/// Serialized with a `"cmd"` tag field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcCommand {
    Auth { user_id: String },
    Enroll,
    Verify,
    Liveness,
    CastVote {
        election_id: String,
        option_id: String,
    },
    VoteAgain,
    /// Abort the running camera step, or step back when idle
    Cancel,
    SignOut,
    ListElections,
    GetState,
}

/// Camera steps that run off the command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Enroll,
    Verify,
    Liveness,
}

impl JobKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            JobKind::Enroll => "enroll",
            JobKind::Verify => "verify",
            JobKind::Liveness => "liveness",
        }
    }
}
