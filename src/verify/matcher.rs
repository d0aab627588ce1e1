use super::MatchConfig;
use crate::log_debug;
use crate::signal::embedding_distance;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Waiting,
    Verifying,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationSession {
    pub attempts: u32,
    pub status: VerifyStatus,
    pub best_distance: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchUpdate {
    /// No decision yet; carries the distance when an embedding was compared.
    Pending { distance: Option<f32> },
    Matched { distance: f32, attempts: u32 },
    Exhausted { attempts: u32, best_distance: Option<f32> },
}

/// Compares per-tick embeddings against one reference template.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    cfg: MatchConfig,
    session: VerificationSession,
}

impl FaceMatcher {
    pub fn new(cfg: MatchConfig) -> Self {
        Self {
            cfg,
            session: VerificationSession {
                attempts: 0,
                status: VerifyStatus::Waiting,
                best_distance: None,
            },
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    pub fn status(&self) -> VerifyStatus {
        self.session.status
    }

    /// Enter `verifying` with zero attempts. Also used for retries.
    pub fn start(&mut self) {
        self.session = VerificationSession {
            attempts: 0,
            status: VerifyStatus::Verifying,
            best_distance: None,
        };
    }

    /// Count one tick. `embedding` is `None` for skipped ticks and frames without a face.
    pub fn on_tick(&mut self, reference: &[f32], embedding: Option<&[f32]>) -> MatchUpdate {
        if self.session.status != VerifyStatus::Verifying {
            return MatchUpdate::Pending { distance: None };
        }
        self.session.attempts += 1;
        let attempts = self.session.attempts;

        let distance = embedding.and_then(|candidate| {
            match embedding_distance(reference, candidate) {
                Ok(distance) => Some(distance),
                Err(err) => {
                    log_debug(&format!("verify tick {attempts}: ignoring embedding ({err})"));
                    None
                }
            }
        });
        if let Some(distance) = distance {
            let best = self.session.best_distance.map_or(distance, |b| b.min(distance));
            self.session.best_distance = Some(best);
            if distance < self.cfg.threshold {
                self.session.status = VerifyStatus::Success;
                return MatchUpdate::Matched { distance, attempts };
            }
        }
        if attempts >= self.cfg.max_attempts {
            self.session.status = VerifyStatus::Failed;
            return MatchUpdate::Exhausted {
                attempts,
                best_distance: self.session.best_distance,
            };
        }
        MatchUpdate::Pending { distance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(max_attempts: u32) -> FaceMatcher {
        let mut matcher = FaceMatcher::new(MatchConfig {
            threshold: 0.6,
            max_attempts,
        });
        matcher.start();
        matcher
    }

    const REFERENCE: [f32; 3] = [0.0, 0.0, 0.0];

    #[test]
    fn ticks_before_start_are_ignored() {
        let mut matcher = FaceMatcher::new(MatchConfig::default());
        let update = matcher.on_tick(&REFERENCE, Some(&REFERENCE));
        assert_eq!(update, MatchUpdate::Pending { distance: None });
        assert_eq!(matcher.session().attempts, 0);
        assert_eq!(matcher.status(), VerifyStatus::Waiting);
    }

    #[test]
    fn close_embedding_matches_on_first_tick() {
        let mut matcher = matcher(50);
        let update = matcher.on_tick(&REFERENCE, Some(&[0.4, 0.0, 0.0]));
        match update {
            MatchUpdate::Matched { distance, attempts } => {
                assert!((distance - 0.4).abs() < 1e-6);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert_eq!(matcher.status(), VerifyStatus::Success);
    }

    #[test]
    fn distance_at_threshold_is_not_a_match() {
        let mut matcher = matcher(50);
        let update = matcher.on_tick(&REFERENCE, Some(&[0.6, 0.0, 0.0]));
        assert!(matches!(update, MatchUpdate::Pending { distance: Some(_) }));
    }

    #[test]
    fn fifty_misses_exhaust_the_budget() {
        let mut matcher = matcher(50);
        let far = [1.0, 1.0, 1.0];
        for tick in 1..50 {
            let embedding = (tick % 2 == 0).then_some(&far[..]);
            assert!(matches!(
                matcher.on_tick(&REFERENCE, embedding),
                MatchUpdate::Pending { .. }
            ));
        }
        let last = matcher.on_tick(&REFERENCE, None);
        match last {
            MatchUpdate::Exhausted {
                attempts,
                best_distance,
            } => {
                assert_eq!(attempts, 50);
                assert!((best_distance.unwrap() - 3f32.sqrt()).abs() < 1e-5);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(matcher.status(), VerifyStatus::Failed);
    }

    #[test]
    fn match_on_final_attempt_still_succeeds() {
        let mut matcher = matcher(3);
        matcher.on_tick(&REFERENCE, None);
        matcher.on_tick(&REFERENCE, None);
        assert!(matches!(
            matcher.on_tick(&REFERENCE, Some(&[0.1, 0.1, 0.1])),
            MatchUpdate::Matched { attempts: 3, .. }
        ));
    }

    #[test]
    fn wrong_length_embedding_counts_as_miss() {
        let mut matcher = matcher(50);
        let update = matcher.on_tick(&REFERENCE, Some(&[0.0, 0.0]));
        assert_eq!(update, MatchUpdate::Pending { distance: None });
        assert_eq!(matcher.session().attempts, 1);
    }

    #[test]
    fn restart_resets_attempts() {
        let mut matcher = matcher(2);
        matcher.on_tick(&REFERENCE, None);
        matcher.on_tick(&REFERENCE, None);
        assert_eq!(matcher.status(), VerifyStatus::Failed);
        matcher.start();
        assert_eq!(matcher.session().attempts, 0);
        assert_eq!(matcher.status(), VerifyStatus::Verifying);
    }
}
