//! Face verification against the enrolled reference embedding.

mod matcher;

use crate::config::{BiometricConfig, DEFAULT_MATCH_THRESHOLD, DEFAULT_MAX_VERIFY_ATTEMPTS};
use crate::vision::{TickConsumer, TickInput};

pub use matcher::{FaceMatcher, MatchUpdate, VerificationSession, VerifyStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// Strict upper bound on the Euclidean distance of a match.
    pub threshold: f32,
    pub max_attempts: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            max_attempts: DEFAULT_MAX_VERIFY_ATTEMPTS,
        }
    }
}

impl From<&BiometricConfig> for MatchConfig {
    fn from(cfg: &BiometricConfig) -> Self {
        Self {
            threshold: cfg.match_threshold,
            max_attempts: cfg.max_verify_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyOutcome {
    Matched {
        distance: f32,
        attempts: u32,
    },
    TimedOut {
        attempts: u32,
        best_distance: Option<f32>,
    },
}

/// Sampler consumer that runs a [`FaceMatcher`] against a fixed reference.
pub struct FaceVerification<'a, F: FnMut(u32, Option<f32>)> {
    matcher: FaceMatcher,
    reference: &'a [f32],
    on_attempt: F,
}

impl<'a, F: FnMut(u32, Option<f32>)> FaceVerification<'a, F> {
    /// `on_attempt(attempts, distance)` runs after every undecided tick.
    pub fn new(cfg: MatchConfig, reference: &'a [f32], on_attempt: F) -> Self {
        let mut matcher = FaceMatcher::new(cfg);
        matcher.start();
        Self {
            matcher,
            reference,
            on_attempt,
        }
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }
}

impl<F: FnMut(u32, Option<f32>)> TickConsumer for FaceVerification<'_, F> {
    type Outcome = VerifyOutcome;

    fn on_tick(&mut self, input: TickInput<'_>, _elapsed_ms: u64) -> Option<VerifyOutcome> {
        let embedding = match input {
            TickInput::Detection(detection) => detection.and_then(|det| det.embedding.as_deref()),
            TickInput::Skipped => None,
        };
        match self.matcher.on_tick(self.reference, embedding) {
            MatchUpdate::Pending { distance } => {
                (self.on_attempt)(self.matcher.session().attempts, distance);
                None
            }
            MatchUpdate::Matched { distance, attempts } => {
                Some(VerifyOutcome::Matched { distance, attempts })
            }
            MatchUpdate::Exhausted {
                attempts,
                best_distance,
            } => Some(VerifyOutcome::TimedOut {
                attempts,
                best_distance,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_support::{face_with_ear, face_with_embedding};

    #[test]
    fn config_follows_biometric_settings() {
        assert_eq!(MatchConfig::from(&BiometricConfig::default()), MatchConfig::default());
    }

    #[test]
    fn verification_matches_on_first_detection() {
        let reference = vec![0.0; 4];
        let mut verification =
            FaceVerification::new(MatchConfig::default(), &reference, |_, _| {});
        let face = face_with_embedding(vec![0.2, 0.2, 0.2, 0.2]);
        let outcome = verification.on_tick(TickInput::Detection(Some(&face)), 0);
        assert!(matches!(
            outcome,
            Some(VerifyOutcome::Matched { attempts: 1, .. })
        ));
    }

    #[test]
    fn skipped_and_faceless_ticks_use_up_attempts() {
        let reference = vec![0.0; 4];
        let cfg = MatchConfig {
            max_attempts: 3,
            ..MatchConfig::default()
        };
        let mut attempts_seen = Vec::new();
        let mut verification =
            FaceVerification::new(cfg, &reference, |n, _| attempts_seen.push(n));
        let no_embedding = face_with_ear(0.3);
        assert!(verification.on_tick(TickInput::Skipped, 0).is_none());
        assert!(verification
            .on_tick(TickInput::Detection(Some(&no_embedding)), 100)
            .is_none());
        let outcome = verification.on_tick(TickInput::Detection(None), 200);
        assert_eq!(
            outcome,
            Some(VerifyOutcome::TimedOut {
                attempts: 3,
                best_distance: None
            })
        );
        drop(verification);
        assert_eq!(attempts_seen, vec![1, 2]);
    }
}
