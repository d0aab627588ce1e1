use super::{
    Notice, SessionError, SessionEvent, SideEffect, Step, Transition, VoteRequest,
};
use crate::store::AuditKind;
use serde_json::json;

/// Owns the current step and the per-session verification flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMachine {
    step: Step,
    user_id: Option<String>,
    face_verified: bool,
    blink_verified: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            step: Step::Auth,
            user_id: None,
            face_verified: false,
            blink_verified: false,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn face_verified(&self) -> bool {
        self.face_verified
    }

    pub fn blink_verified(&self) -> bool {
        self.blink_verified
    }

    /// Validate `event` against the current step and move the machine.
    ///
    /// Rejected events leave the machine untouched.
    pub fn apply(&mut self, event: SessionEvent) -> Result<Transition, SessionError> {
        let from = self.step;
        let invalid = SessionError::InvalidEvent {
            step: from,
            event: event.name(),
        };
        if !matches!(event, SessionEvent::Authenticated { .. } | SessionEvent::SignOut)
            && self.user_id.is_none()
        {
            return Err(SessionError::NotAuthenticated);
        }

        let (to, effects) = match (from, event) {
            (
                Step::Auth,
                SessionEvent::Authenticated {
                    user_id,
                    has_reference,
                },
            ) => {
                self.user_id = Some(user_id);
                self.clear_flags();
                if has_reference {
                    (
                        Step::Verify,
                        vec![SideEffect::Notify(Notice::info(
                            "Signed in. Look at the camera to verify your face.",
                        ))],
                    )
                } else {
                    (
                        Step::Enroll,
                        vec![SideEffect::Notify(Notice::info(
                            "Signed in. Enroll your face before voting.",
                        ))],
                    )
                }
            }

            (Step::Enroll, SessionEvent::EnrollmentReady { .. }) => {
                (Step::Enroll, vec![SideEffect::PersistProfile])
            }
            (Step::Enroll, SessionEvent::EnrollmentSaved { captures }) => (
                Step::Verify,
                vec![
                    audit(AuditKind::EnrollSuccess, json!({ "captures": captures })),
                    SideEffect::Notify(Notice::success("Face enrolled.")),
                ],
            ),

            (
                Step::Verify,
                SessionEvent::FaceMatched {
                    distance,
                    threshold,
                    attempts,
                },
            ) => {
                self.face_verified = true;
                (
                    Step::Liveness,
                    vec![
                        audit(
                            AuditKind::VerifySuccess,
                            json!({
                                "distance": distance,
                                "threshold": threshold,
                                "attempts": attempts,
                            }),
                        ),
                        SideEffect::Notify(Notice::success("Face verified.")),
                    ],
                )
            }
            (
                Step::Verify,
                SessionEvent::FaceRejected {
                    attempts,
                    threshold,
                    best_distance,
                },
            ) => (
                Step::Verify,
                vec![
                    audit(
                        AuditKind::VerifyFailed,
                        json!({
                            "reason": "timeout",
                            "attempts": attempts,
                            "threshold": threshold,
                            "best_distance": best_distance,
                        }),
                    ),
                    SideEffect::Notify(Notice::error(
                        "Face verification timed out. Please try again.",
                    )),
                ],
            ),
            (Step::Verify, SessionEvent::ReferenceMissing) => {
                self.clear_flags();
                (
                    Step::Enroll,
                    vec![SideEffect::Notify(Notice::error(
                        "No enrolled face found. Please enroll first.",
                    ))],
                )
            }

            (Step::Liveness, SessionEvent::LivenessPassed { blinks }) => {
                if !self.face_verified {
                    return Err(invalid);
                }
                self.blink_verified = true;
                (
                    Step::Vote,
                    vec![
                        audit(AuditKind::LivenessSuccess, json!({ "blinks": blinks })),
                        SideEffect::Notify(Notice::success("Liveness confirmed.")),
                    ],
                )
            }
            (Step::Liveness, SessionEvent::LivenessFailed { blinks, required }) => (
                Step::Liveness,
                vec![
                    audit(
                        AuditKind::LivenessFailed,
                        json!({ "reason": "timeout", "blinks": blinks, "required": required }),
                    ),
                    SideEffect::Notify(Notice::error(format!(
                        "Liveness check timed out after {blinks} of {required} blinks. Please try again."
                    ))),
                ],
            ),

            (
                Step::Vote,
                SessionEvent::CastVote {
                    election_id,
                    option_id,
                },
            ) => {
                if !(self.face_verified && self.blink_verified) {
                    return Err(SessionError::VoteNotAuthorised {
                        face_verified: self.face_verified,
                        blink_verified: self.blink_verified,
                    });
                }
                let voter_id = self.user_id.clone().ok_or(SessionError::NotAuthenticated)?;
                (
                    Step::Vote,
                    vec![SideEffect::InsertVote(VoteRequest {
                        voter_id,
                        election_id,
                        option_id,
                        face_verified: self.face_verified,
                        blink_verified: self.blink_verified,
                    })],
                )
            }
            (
                Step::Vote,
                SessionEvent::VoteRecorded {
                    election_id,
                    option_id,
                },
            ) => (
                Step::Done,
                vec![
                    audit(
                        AuditKind::VoteCast,
                        json!({ "election_id": election_id, "option_id": option_id }),
                    ),
                    SideEffect::Notify(Notice::success("Your vote has been recorded.")),
                ],
            ),
            (Step::Vote, SessionEvent::VoteDuplicate { election_id }) => (
                Step::Vote,
                vec![SideEffect::Notify(Notice::error(format!(
                    "You have already voted in election {election_id}."
                )))],
            ),

            (Step::Done, SessionEvent::VoteAgain) => {
                self.clear_flags();
                (
                    Step::Verify,
                    vec![SideEffect::Notify(Notice::info(
                        "Verify your face again to cast another vote.",
                    ))],
                )
            }

            (
                Step::Enroll | Step::Verify | Step::Liveness | Step::Vote,
                SessionEvent::StepFailed { message },
            ) => (from, vec![SideEffect::Notify(Notice::error(message))]),

            (Step::Verify | Step::Liveness | Step::Vote, SessionEvent::Cancel) => {
                self.clear_flags();
                let to = if from == Step::Verify {
                    Step::Enroll
                } else {
                    Step::Verify
                };
                (
                    to,
                    vec![
                        SideEffect::ReleaseCamera,
                        SideEffect::Notify(Notice::info(format!("Cancelled {from}."))),
                    ],
                )
            }

            (_, SessionEvent::SignOut) => {
                self.user_id = None;
                self.clear_flags();
                (
                    Step::Auth,
                    vec![
                        SideEffect::ReleaseCamera,
                        SideEffect::Notify(Notice::info("Signed out.")),
                    ],
                )
            }

            _ => return Err(invalid),
        };

        self.step = to;
        Ok(Transition { from, to, effects })
    }

    fn clear_flags(&mut self) {
        self.face_verified = false;
        self.blink_verified = false;
    }
}

fn audit(kind: AuditKind, detail: serde_json::Value) -> SideEffect {
    SideEffect::Audit { kind, detail }
}
