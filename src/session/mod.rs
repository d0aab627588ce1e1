//! Linear voting session state machine.
//!
//! The machine is pure: [`SessionMachine::apply`] validates an event against
//! the current step and returns the [`Transition`] together with the side
//! effects the caller must carry out. Effects that can fail (persisting the
//! profile, inserting the vote) are answered with a follow-up event.

mod machine;

use crate::store::AuditKind;
use serde::Serialize;
use std::fmt;

pub use machine::SessionMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Auth,
    Enroll,
    Verify,
    Liveness,
    Vote,
    Done,
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Step::Auth => "auth",
            Step::Enroll => "enroll",
            Step::Verify => "verify",
            Step::Liveness => "liveness",
            Step::Vote => "vote",
            Step::Done => "done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

impl NoticeLevel {
    pub fn label(self) -> &'static str {
        match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "success",
            NoticeLevel::Error => "error",
        }
    }
}

/// User-facing message produced by a transition or a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Vote the machine has authorised; the caller turns it into a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub voter_id: String,
    pub election_id: String,
    pub option_id: String,
    pub face_verified: bool,
    pub blink_verified: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Store the enrollment image and embedding; answer with `EnrollmentSaved`.
    PersistProfile,
    /// Insert the vote; answer with `VoteRecorded` or `VoteDuplicate`.
    InsertVote(VoteRequest),
    Audit {
        kind: AuditKind,
        detail: serde_json::Value,
    },
    Notify(Notice),
    ReleaseCamera,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Authenticated {
        user_id: String,
        has_reference: bool,
    },
    EnrollmentReady {
        captures: usize,
    },
    EnrollmentSaved {
        captures: usize,
    },
    FaceMatched {
        distance: f32,
        threshold: f32,
        attempts: u32,
    },
    FaceRejected {
        attempts: u32,
        threshold: f32,
        best_distance: Option<f32>,
    },
    ReferenceMissing,
    LivenessPassed {
        blinks: u32,
    },
    LivenessFailed {
        blinks: u32,
        required: u32,
    },
    CastVote {
        election_id: String,
        option_id: String,
    },
    VoteRecorded {
        election_id: String,
        option_id: String,
    },
    VoteDuplicate {
        election_id: String,
    },
    VoteAgain,
    /// A step attempt failed without a dedicated event (camera, detector, store).
    StepFailed {
        message: String,
    },
    Cancel,
    SignOut,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Authenticated { .. } => "authenticated",
            SessionEvent::EnrollmentReady { .. } => "enrollment_ready",
            SessionEvent::EnrollmentSaved { .. } => "enrollment_saved",
            SessionEvent::FaceMatched { .. } => "face_matched",
            SessionEvent::FaceRejected { .. } => "face_rejected",
            SessionEvent::ReferenceMissing => "reference_missing",
            SessionEvent::LivenessPassed { .. } => "liveness_passed",
            SessionEvent::LivenessFailed { .. } => "liveness_failed",
            SessionEvent::CastVote { .. } => "cast_vote",
            SessionEvent::VoteRecorded { .. } => "vote_recorded",
            SessionEvent::VoteDuplicate { .. } => "vote_duplicate",
            SessionEvent::VoteAgain => "vote_again",
            SessionEvent::StepFailed { .. } => "step_failed",
            SessionEvent::Cancel => "cancel",
            SessionEvent::SignOut => "sign_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Step,
    pub to: Step,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    pub fn changed_step(&self) -> bool {
        self.from != self.to
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.effects.iter().filter_map(|effect| match effect {
            SideEffect::Notify(notice) => Some(notice),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    InvalidEvent { step: Step, event: &'static str },
    NotAuthenticated,
    VoteNotAuthorised { face_verified: bool, blink_verified: bool },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidEvent { step, event } => {
                write!(f, "'{event}' is not allowed during the {step} step")
            }
            SessionError::NotAuthenticated => write!(f, "no voter is signed in"),
            SessionError::VoteNotAuthorised {
                face_verified,
                blink_verified,
            } => write!(
                f,
                "vote requires face and liveness checks in this session (face={face_verified}, liveness={blink_verified})"
            ),
        }
    }
}

impl std::error::Error for SessionError {}
