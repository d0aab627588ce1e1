//! Step runner: drives the session machine with the camera, detector and stores.
//!
//! Each public step method runs to completion on the calling thread, executes
//! the side effects of the resulting transitions and turns every failure into a
//! [`StepError`]. Failures never advance the session past its current step.


use crate::config::{is_valid_identifier, BiometricConfig};
use crate::enroll::{Enrollment, EnrollmentAggregator, Pose};
use crate::liveness::{BlinkConfig, LivenessCheck, LivenessOutcome};
use crate::session::{Notice, SessionEvent, SessionMachine, SideEffect, Step, VoteRequest};
use crate::store::{
    enrollment_image_path, AuditEvent, AuditKind, BallotStore, Election, Profile, StoreError,
    VoteContext, VoteRecord,
};
use crate::verify::{FaceVerification, MatchConfig, VerifyOutcome};
use crate::vision::{
    CameraConstraints, CameraError, CameraLease, CameraSlot, CancelToken, DetectMode,
    FrameSampler, SampleExit, SamplerError, SharedDetector,
};
use crate::{lock_or_recover, log_debug, log_debug_content, unix_millis};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// The step cannot start or continue (camera, models, wrong step, bad input).
    Precondition(String),
    /// No enrolled template; the session goes back to enrollment.
    NoReference,
    /// The blink, match or capture budget ran out.
    Timeout(String),
    AlreadyVoted { election_id: String },
    Store(StoreError),
    Cancelled,
}

impl StepError {
    /// Whether retrying the same step can succeed without other changes.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StepError::Store(_))
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Precondition(msg) => f.write_str(msg),
            StepError::NoReference => write!(f, "no enrolled face found; please enroll first"),
            StepError::Timeout(msg) => f.write_str(msg),
            StepError::AlreadyVoted { election_id } => {
                write!(f, "you have already voted in election {election_id}")
            }
            StepError::Store(err) => write!(f, "{err}"),
            StepError::Cancelled => write!(f, "step cancelled"),
        }
    }
}

impl std::error::Error for StepError {}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Store(err)
    }
}

impl From<CameraError> for StepError {
    fn from(err: CameraError) -> Self {
        StepError::Precondition(err.to_string())
    }
}

impl From<SamplerError> for StepError {
    fn from(err: SamplerError) -> Self {
        StepError::Precondition(err.to_string())
    }
}

/// Live feedback while a step samples the camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    Pose {
        pose: Pose,
        index: usize,
        total: usize,
        attempt: u32,
        prompt: &'static str,
    },
    VerifyAttempt {
        attempts: u32,
        max_attempts: u32,
        distance: Option<f32>,
    },
    Blink {
        count: u32,
        required: u32,
    },
    Settling {
        ms: u64,
    },
}

/// Outcome of a successful step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub from: Step,
    pub step: Step,
    pub notices: Vec<Notice>,
}

/// Read-only view of the session for front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub step: Step,
    pub user_id: Option<String>,
    pub face_verified: bool,
    pub blink_verified: bool,
}

/// One voter session with its capabilities.
pub struct VotingSession {
    machine: SessionMachine,
    camera: CameraSlot,
    detector: SharedDetector,
    detector_name: &'static str,
    store: Arc<dyn BallotStore>,
    config: BiometricConfig,
    model_dir: Option<PathBuf>,
    session_id: String,
    pending_enrollment: Option<Enrollment>,
}

impl VotingSession {
    pub fn new(
        camera: CameraSlot,
        detector: SharedDetector,
        store: Arc<dyn BallotStore>,
        config: BiometricConfig,
    ) -> Self {
        let detector_name = lock_or_recover(&detector, "face detector").name();
        Self {
            machine: SessionMachine::new(),
            camera,
            detector,
            detector_name,
            store,
            config,
            model_dir: None,
            session_id: next_session_id(),
            pending_enrollment: None,
        }
    }

    pub fn with_model_dir(mut self, model_dir: Option<PathBuf>) -> Self {
        self.model_dir = model_dir;
        self
    }

    pub fn step(&self) -> Step {
        self.machine.step()
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector_name
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            step: self.machine.step(),
            user_id: self.machine.user_id().map(str::to_string),
            face_verified: self.machine.face_verified(),
            blink_verified: self.machine.blink_verified(),
        }
    }

    pub fn list_elections(&self) -> Result<Vec<Election>, StepError> {
        Ok(self.store.list_active_elections(unix_millis())?)
    }

    /// Sign in as `user_id`; routes to enrollment or verification.
    pub fn authenticate(&mut self, user_id: &str) -> Result<StepReport, StepError> {
        self.expect_step(Step::Auth, "sign in")?;
        let user_id = user_id.trim();
        if !is_valid_identifier(user_id) {
            return Err(StepError::Precondition(format!(
                "'{user_id}' is not a valid voter id"
            )));
        }
        let profile = self.store.get_profile(user_id)?;
        let has_reference = profile
            .as_ref()
            .and_then(Profile::reference)
            .is_some_and(|reference| reference.len() == self.config.embedding_dim);
        log_debug_content(&format!(
            "authenticate: user={user_id} has_reference={has_reference}"
        ));
        self.run_events(SessionEvent::Authenticated {
            user_id: user_id.to_string(),
            has_reference,
        })
    }

    /// Capture the guided poses and store the averaged template.
    pub fn enroll(
        &mut self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<StepReport, StepError> {
        self.expect_step(Step::Enroll, "enroll")?;
        let enrollment = match self.capture_enrollment(cancel, progress) {
            Ok(enrollment) => enrollment,
            Err(err) => return Err(self.fail(err)),
        };
        self.pending_enrollment = Some(enrollment);
        let captures = Pose::SEQUENCE.len();
        let result = self.run_events(SessionEvent::EnrollmentReady { captures });
        self.pending_enrollment = None;
        result.map_err(|err| self.fail(err))
    }

    /// Match live embeddings against the enrolled template.
    pub fn verify(
        &mut self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<StepReport, StepError> {
        self.expect_step(Step::Verify, "verify")?;
        let reference = match self.load_reference() {
            Ok(reference) => reference,
            Err(StepError::NoReference) => {
                self.run_events(SessionEvent::ReferenceMissing)?;
                return Err(StepError::NoReference);
            }
            Err(err) => return Err(self.fail(err)),
        };

        let cfg = MatchConfig::from(&self.config);
        let threshold = cfg.threshold;
        let max_attempts = cfg.max_attempts;
        let sampler = self.sampler(DetectMode::WithEmbedding, "verify");
        let run = self.with_camera(|lease| {
            let mut verification = FaceVerification::new(cfg, &reference, |attempts, distance| {
                progress(Progress::VerifyAttempt {
                    attempts,
                    max_attempts,
                    distance,
                })
            });
            Ok(sampler.run(lease, &mut verification, cancel)?)
        });
        let run = match run {
            Ok(run) => run,
            Err(err) => return Err(self.fail(err)),
        };

        match run.exit {
            SampleExit::Cancelled => Err(StepError::Cancelled),
            SampleExit::Finished(VerifyOutcome::Matched { distance, attempts }) => {
                tracing::info!(distance, attempts, "face verified");
                self.run_events(SessionEvent::FaceMatched {
                    distance,
                    threshold,
                    attempts,
                })
            }
            SampleExit::Finished(VerifyOutcome::TimedOut {
                attempts,
                best_distance,
            }) => {
                tracing::info!(attempts, ?best_distance, "face verification timed out");
                self.run_events(SessionEvent::FaceRejected {
                    attempts,
                    threshold,
                    best_distance,
                })?;
                Err(StepError::Timeout(format!(
                    "face verification timed out after {attempts} attempts"
                )))
            }
        }
    }

    /// Count blinks until the required number is reached or the budget runs out.
    pub fn check_liveness(
        &mut self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<StepReport, StepError> {
        self.expect_step(Step::Liveness, "check liveness")?;
        let cfg = BlinkConfig::from(&self.config);
        let settle_ms = cfg.settle_ms;
        let required = cfg.required_blinks;
        let sampler = self.sampler(DetectMode::Landmarks, "liveness");
        let run = self.with_camera(|lease| {
            let mut check = LivenessCheck::new(cfg, |count, required| {
                progress(Progress::Blink { count, required })
            });
            Ok(sampler.run(lease, &mut check, cancel)?)
        });
        let run = match run {
            Ok(run) => run,
            Err(err) => return Err(self.fail(err)),
        };

        match run.exit {
            SampleExit::Cancelled => Err(StepError::Cancelled),
            SampleExit::Finished(LivenessOutcome::Passed { blinks, elapsed_ms }) => {
                tracing::info!(blinks, elapsed_ms, "liveness passed");
                progress(Progress::Settling { ms: settle_ms });
                if !cancel.sleep(Duration::from_millis(settle_ms)) {
                    return Err(StepError::Cancelled);
                }
                self.run_events(SessionEvent::LivenessPassed { blinks })
            }
            SampleExit::Finished(LivenessOutcome::TimedOut { blinks }) => {
                tracing::info!(blinks, required, "liveness timed out");
                self.run_events(SessionEvent::LivenessFailed { blinks, required })?;
                Err(StepError::Timeout(format!(
                    "liveness check timed out after {blinks} of {required} blinks"
                )))
            }
        }
    }

    /// Record a vote for `option_id` in `election_id`.
    pub fn cast_vote(
        &mut self,
        election_id: &str,
        option_id: &str,
    ) -> Result<StepReport, StepError> {
        self.expect_step(Step::Vote, "cast a vote")?;
        if let Err(err) = self.check_ballot(election_id, option_id) {
            return Err(self.fail(err));
        }
        let report = self.run_events(SessionEvent::CastVote {
            election_id: election_id.to_string(),
            option_id: option_id.to_string(),
        })?;
        // The only way to stay in Vote after a successful insert request is a duplicate.
        if report.step != Step::Done {
            return Err(StepError::AlreadyVoted {
                election_id: election_id.to_string(),
            });
        }
        Ok(report)
    }

    pub fn vote_again(&mut self) -> Result<StepReport, StepError> {
        self.run_events(SessionEvent::VoteAgain)
    }

    /// Leave the current step for the previous one and release the camera.
    pub fn cancel(&mut self) -> Result<StepReport, StepError> {
        self.run_events(SessionEvent::Cancel)
    }

    pub fn sign_out(&mut self) -> Result<StepReport, StepError> {
        self.session_id = next_session_id();
        self.run_events(SessionEvent::SignOut)
    }

    fn expect_step(&self, expected: Step, action: &str) -> Result<(), StepError> {
        let current = self.machine.step();
        if current != expected {
            return Err(StepError::Precondition(format!(
                "cannot {action} during the {current} step"
            )));
        }
        Ok(())
    }

    /// Record a generic failure notice on the machine and hand the error back.
    fn fail(&mut self, err: StepError) -> StepError {
        if matches!(err, StepError::Cancelled) {
            return err;
        }
        log_debug(&format!("step {} failed: {err}", self.machine.step()));
        if let Err(apply_err) = self.machine.apply(SessionEvent::StepFailed {
            message: err.to_string(),
        }) {
            log_debug(&format!("could not record step failure: {apply_err}"));
        }
        err
    }

    fn ensure_models(&self) -> Result<(), StepError> {
        let mut detector = lock_or_recover(&self.detector, "face detector");
        if detector.models_loaded() {
            return Ok(());
        }
        detector
            .load_models(self.model_dir.as_deref())
            .map_err(|err| StepError::Precondition(format!("failed to load face models: {err:#}")))
    }

    fn sampler(&self, mode: DetectMode, label: &'static str) -> FrameSampler {
        FrameSampler::new(self.detector.clone(), self.config.poll_interval_ms, mode)
            .with_label(label)
    }

    /// Load models, hold the camera for the duration of `body`, then release it.
    fn with_camera<T>(
        &self,
        body: impl FnOnce(&CameraLease) -> Result<T, StepError>,
    ) -> Result<T, StepError> {
        self.ensure_models()?;
        let lease = self.camera.acquire(&CameraConstraints::from(&self.config))?;
        let result = body(&lease);
        lease.release();
        result
    }

    fn capture_enrollment(
        &self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Enrollment, StepError> {
        let retries = self.config.enroll_pose_retries.max(1);
        let pause = Duration::from_millis(self.config.poll_interval_ms);
        let detector = self.detector.clone();
        self.with_camera(|lease| {
            let mut aggregator = EnrollmentAggregator::new(self.config.embedding_dim);
            let total = Pose::SEQUENCE.len();
            for (index, pose) in Pose::SEQUENCE.into_iter().enumerate() {
                let mut attempt = 0;
                loop {
                    if cancel.is_cancelled() {
                        return Err(StepError::Cancelled);
                    }
                    attempt += 1;
                    progress(Progress::Pose {
                        pose,
                        index,
                        total,
                        attempt,
                        prompt: pose.prompt(),
                    });
                    let frame = lease.grab()?;
                    let detection = lock_or_recover(&detector, "face detector")
                        .detect_with_embedding(&frame)
                        .map_err(|err| {
                            StepError::Precondition(format!("face detector failed: {err:#}"))
                        })?;
                    if cancel.is_cancelled() {
                        return Err(StepError::Cancelled);
                    }
                    match aggregator.add_capture(pose, detection.as_ref(), &frame) {
                        Ok(_) => break,
                        Err(err) if attempt >= retries => {
                            return Err(StepError::Timeout(format!(
                                "{err} after {attempt} attempts"
                            )));
                        }
                        Err(err) => {
                            log_debug(&format!("enroll {} attempt {attempt}: {err}", pose.label()));
                            if !cancel.sleep(pause) {
                                return Err(StepError::Cancelled);
                            }
                        }
                    }
                }
            }
            aggregator
                .finish()
                .map_err(|err| StepError::Precondition(err.to_string()))
        })
    }

    fn load_reference(&self) -> Result<Vec<f32>, StepError> {
        let user_id = self.current_user()?;
        let profile = self.store.get_profile(&user_id)?;
        let Some(reference) = profile.as_ref().and_then(Profile::reference) else {
            return Err(StepError::NoReference);
        };
        if reference.len() != self.config.embedding_dim {
            log_debug(&format!(
                "stored template has {} values, expected {}; treating as not enrolled",
                reference.len(),
                self.config.embedding_dim
            ));
            return Err(StepError::NoReference);
        }
        Ok(reference.to_vec())
    }

    fn check_ballot(&self, election_id: &str, option_id: &str) -> Result<(), StepError> {
        if !is_valid_identifier(election_id) || !is_valid_identifier(option_id) {
            return Err(StepError::Precondition(
                "election and option ids must be simple identifiers".to_string(),
            ));
        }
        let election = self
            .store
            .get_election(election_id)?
            .ok_or_else(|| StepError::Precondition(format!("unknown election {election_id}")))?;
        if !election.is_active(unix_millis()) {
            return Err(StepError::Precondition(format!(
                "election {election_id} is not open for voting"
            )));
        }
        if election.option(option_id).is_none() {
            return Err(StepError::Precondition(format!(
                "election {election_id} has no option {option_id}"
            )));
        }
        Ok(())
    }

    fn current_user(&self) -> Result<String, StepError> {
        self.machine
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| StepError::Precondition("no voter is signed in".to_string()))
    }

    /// Apply `event` and every follow-up event its side effects produce.
    fn run_events(&mut self, event: SessionEvent) -> Result<StepReport, StepError> {
        let from = self.machine.step();
        let mut report = StepReport {
            from,
            step: from,
            notices: Vec::new(),
        };
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let name = event.name();
            let transition = self
                .machine
                .apply(event)
                .map_err(|err| StepError::Precondition(err.to_string()))?;
            tracing::info!(
                event = name,
                from = transition.from.label(),
                to = transition.to.label(),
                "session transition"
            );
            report.step = transition.to;
            for effect in transition.effects {
                match effect {
                    SideEffect::PersistProfile => {
                        let captures = self.persist_enrollment()?;
                        queue.push_back(SessionEvent::EnrollmentSaved { captures });
                    }
                    SideEffect::InsertVote(request) => {
                        queue.push_back(self.insert_vote(request)?);
                    }
                    SideEffect::Audit { kind, detail } => self.audit(kind, detail),
                    SideEffect::Notify(notice) => report.notices.push(notice),
                    SideEffect::ReleaseCamera => {
                        if self.camera.is_held() {
                            log_debug("camera still held; the running step releases it on exit");
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    fn persist_enrollment(&mut self) -> Result<usize, StepError> {
        let user_id = self.current_user()?;
        let enrollment = self.pending_enrollment.take().ok_or_else(|| {
            StepError::Precondition("no captured enrollment to save".to_string())
        })?;
        let now = unix_millis();
        let image_ref = self
            .store
            .store_image(&enrollment_image_path(&user_id, now), &enrollment.image)?;
        let mut profile = self
            .store
            .get_profile(&user_id)?
            .unwrap_or_else(|| Profile::new(user_id.clone()));
        profile.embedding = Some(enrollment.embedding);
        profile.verified = true;
        profile.image_ref = Some(image_ref);
        profile.enrolled_at_ms = Some(now);
        self.store.upsert_profile(profile)?;
        Ok(enrollment.captures)
    }

    fn insert_vote(&self, request: VoteRequest) -> Result<SessionEvent, StepError> {
        let record = VoteRecord {
            voter_id: request.voter_id,
            election_id: request.election_id.clone(),
            option_id: request.option_id.clone(),
            face_verified: request.face_verified,
            blink_verified: request.blink_verified,
            cast_at_ms: unix_millis(),
            context: VoteContext {
                session_id: self.session_id.clone(),
                detector: self.detector_name.to_string(),
            },
        };
        match self.store.insert_vote(record) {
            Ok(()) => Ok(SessionEvent::VoteRecorded {
                election_id: request.election_id,
                option_id: request.option_id,
            }),
            Err(StoreError::Duplicate { election_id, .. }) => {
                Ok(SessionEvent::VoteDuplicate { election_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Best effort: audit failures are logged and never fail the step.
    fn audit(&self, kind: AuditKind, detail: serde_json::Value) {
        let event = AuditEvent {
            subject_id: self
                .machine
                .user_id()
                .unwrap_or("anonymous")
                .to_string(),
            kind,
            detail,
            at_ms: unix_millis(),
        };
        if let Err(err) = self.store.append(event) {
            tracing::warn!(kind = kind.label(), error = %err, "audit append failed");
            log_debug(&format!("audit {} dropped: {err}", kind.label()));
        }
    }
}

fn next_session_id() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("s{}-{n}", unix_millis())
}
