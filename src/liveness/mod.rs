//! Blink-based liveness check.

mod blink;

use crate::config::{
    BiometricConfig, DEFAULT_BLINK_CLOSE_DEBOUNCE_MS, DEFAULT_BLINK_OPEN_DEBOUNCE_MS,
    DEFAULT_BLINK_SETTLE_MS, DEFAULT_BLINK_TIMEOUT_MS, DEFAULT_EAR_THRESHOLD,
    DEFAULT_REQUIRED_BLINKS,
};
use crate::vision::{TickConsumer, TickInput};

pub use blink::{BlinkDetector, BlinkSession, BlinkStatus, BlinkUpdate};

#[derive(Debug, Clone, PartialEq)]
pub struct BlinkConfig {
    pub closed_threshold: f32,
    pub required_blinks: u32,
    pub timeout_ms: u64,
    pub close_debounce_ms: u64,
    pub open_debounce_ms: u64,
    pub settle_ms: u64,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            closed_threshold: DEFAULT_EAR_THRESHOLD,
            required_blinks: DEFAULT_REQUIRED_BLINKS,
            timeout_ms: DEFAULT_BLINK_TIMEOUT_MS,
            close_debounce_ms: DEFAULT_BLINK_CLOSE_DEBOUNCE_MS,
            open_debounce_ms: DEFAULT_BLINK_OPEN_DEBOUNCE_MS,
            settle_ms: DEFAULT_BLINK_SETTLE_MS,
        }
    }
}

impl From<&BiometricConfig> for BlinkConfig {
    fn from(cfg: &BiometricConfig) -> Self {
        Self {
            closed_threshold: cfg.ear_threshold,
            required_blinks: cfg.required_blinks,
            timeout_ms: cfg.blink_timeout_ms,
            close_debounce_ms: cfg.blink_close_debounce_ms,
            open_debounce_ms: cfg.blink_open_debounce_ms,
            settle_ms: cfg.blink_settle_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    Passed { blinks: u32, elapsed_ms: u64 },
    TimedOut { blinks: u32 },
}

/// Sampler consumer driving a [`BlinkDetector`] and reporting each counted blink.
pub struct LivenessCheck<F: FnMut(u32, u32)> {
    detector: BlinkDetector,
    on_blink: F,
}

impl<F: FnMut(u32, u32)> LivenessCheck<F> {
    /// `on_blink(count, required)` runs after every counted blink.
    pub fn new(cfg: BlinkConfig, on_blink: F) -> Self {
        let mut detector = BlinkDetector::new(cfg);
        detector.start(0);
        Self { detector, on_blink }
    }

    pub fn detector(&self) -> &BlinkDetector {
        &self.detector
    }
}

impl<F: FnMut(u32, u32)> TickConsumer for LivenessCheck<F> {
    type Outcome = LivenessOutcome;

    fn on_tick(&mut self, input: TickInput<'_>, elapsed_ms: u64) -> Option<LivenessOutcome> {
        let update = match input {
            TickInput::Detection(detection) => self
                .detector
                .on_sample(detection.and_then(|det| det.average_ear()), elapsed_ms),
            TickInput::Skipped => self.detector.check_timeout(elapsed_ms),
        };
        let required = self.detector.config().required_blinks;
        match update {
            BlinkUpdate::Blink { count } => {
                (self.on_blink)(count, required);
                None
            }
            BlinkUpdate::Completed { count } => {
                (self.on_blink)(count, required);
                Some(LivenessOutcome::Passed {
                    blinks: count,
                    elapsed_ms,
                })
            }
            BlinkUpdate::TimedOut { count } => Some(LivenessOutcome::TimedOut { blinks: count }),
            BlinkUpdate::Unchanged | BlinkUpdate::EyesClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_support::face_with_ear;

    #[test]
    fn config_follows_biometric_settings() {
        let bio = BiometricConfig {
            ear_threshold: 0.2,
            required_blinks: 2,
            ..BiometricConfig::default()
        };
        let cfg = BlinkConfig::from(&bio);
        assert!((cfg.closed_threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.required_blinks, 2);
        assert_eq!(BlinkConfig::from(&BiometricConfig::default()), BlinkConfig::default());
    }

    #[test]
    fn check_passes_after_required_blinks_and_reports_progress() {
        let mut seen = Vec::new();
        let mut check = LivenessCheck::new(BlinkConfig::default(), |count, required| {
            seen.push((count, required))
        });
        let open = face_with_ear(0.35);
        let closed = face_with_ear(0.1);
        let mut outcome = None;
        for blink in 0..3u64 {
            let base = 1_000 + blink * 1_000;
            assert!(check.on_tick(TickInput::Detection(Some(&closed)), base).is_none());
            outcome = check.on_tick(TickInput::Detection(Some(&open)), base + 300);
        }
        assert_eq!(
            outcome,
            Some(LivenessOutcome::Passed {
                blinks: 3,
                elapsed_ms: 3_300
            })
        );
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn skipped_ticks_still_enforce_timeout() {
        let mut check = LivenessCheck::new(BlinkConfig::default(), |_, _| {});
        assert!(check.on_tick(TickInput::Skipped, 29_000).is_none());
        assert_eq!(
            check.on_tick(TickInput::Skipped, 30_000),
            Some(LivenessOutcome::TimedOut { blinks: 0 })
        );
    }

    #[test]
    fn no_face_ticks_are_ignored() {
        let mut check = LivenessCheck::new(BlinkConfig::default(), |_, _| {});
        assert!(check.on_tick(TickInput::Detection(None), 100).is_none());
        assert_eq!(check.detector().status(), BlinkStatus::Detecting);
    }
}
