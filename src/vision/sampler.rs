//! Fixed-interval detection polling with a single in-flight slot.

use super::{CameraError, CameraLease, Detection, FaceDetector, Frame};
use crate::{lock_or_recover, log_debug};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long the loop sleeps before re-checking cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// How long a finished run waits for a detection still in flight.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub type SharedDetector = Arc<Mutex<Box<dyn FaceDetector>>>;

/// Shared cancellation flag for a running step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early (and `false`) if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectMode {
    /// Landmarks only (liveness).
    Landmarks,
    /// Landmarks plus recognition embedding (enrollment, verification).
    WithEmbedding,
}

/// What a consumer sees for one sampling tick.
#[derive(Debug, Clone, Copy)]
pub enum TickInput<'a> {
    /// The detector finished; `None` means no face in the frame.
    Detection(Option<&'a Detection>),
    /// The previous detection was still running, so no frame was taken.
    Skipped,
}

/// Step logic fed by the sampler. Returning `Some` ends the run.
pub trait TickConsumer {
    type Outcome;

    fn on_tick(&mut self, input: TickInput<'_>, elapsed_ms: u64) -> Option<Self::Outcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerMetrics {
    pub ticks: u64,
    pub skipped: u64,
    pub detections: u64,
    pub misses: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleExit<O> {
    Finished(O),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRun<O> {
    pub exit: SampleExit<O>,
    pub metrics: SamplerMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    Camera(CameraError),
    Detector(String),
    WorkerLost,
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::Camera(err) => write!(f, "{err}"),
            SamplerError::Detector(msg) => write!(f, "face detector failed: {msg}"),
            SamplerError::WorkerLost => write!(f, "face detector worker stopped unexpectedly"),
        }
    }
}

impl std::error::Error for SamplerError {}

type DetectResult = (Result<Option<Detection>, String>, u64);

/// Polls the camera through a detector worker thread.
pub struct FrameSampler {
    detector: SharedDetector,
    interval: Duration,
    mode: DetectMode,
    label: &'static str,
}

impl FrameSampler {
    pub fn new(detector: SharedDetector, interval_ms: u64, mode: DetectMode) -> Self {
        Self {
            detector,
            interval: Duration::from_millis(interval_ms.max(1)),
            mode,
            label: "sampler",
        }
    }

    /// Name used in the metrics log line.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Sample until the consumer decides, the token is cancelled, or a capability fails.
    pub fn run<C: TickConsumer>(
        &self,
        lease: &CameraLease,
        consumer: &mut C,
        cancel: &CancelToken,
    ) -> Result<SampleRun<C::Outcome>, SamplerError> {
        let (frame_tx, frame_rx) = bounded::<(Frame, u64)>(1);
        let (result_tx, result_rx) = bounded::<DetectResult>(1);
        let worker = spawn_detector_worker(self.detector.clone(), self.mode, frame_rx, result_tx);

        let started = Instant::now();
        let mut metrics = SamplerMetrics::default();
        let mut in_flight = false;
        let mut next_tick = started;

        let exit = loop {
            if cancel.is_cancelled() {
                break Ok(SampleExit::Cancelled);
            }
            if in_flight {
                let wait = next_tick
                    .saturating_duration_since(Instant::now())
                    .min(CANCEL_POLL);
                match result_rx.recv_timeout(wait) {
                    Ok((result, issued_ms)) => {
                        in_flight = false;
                        // Results that land after cancellation never reach the consumer.
                        if cancel.is_cancelled() {
                            break Ok(SampleExit::Cancelled);
                        }
                        match deliver(consumer, &mut metrics, result, issued_ms) {
                            Ok(Some(outcome)) => break Ok(SampleExit::Finished(outcome)),
                            Ok(None) => continue,
                            Err(err) => break Err(err),
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break Err(SamplerError::WorkerLost),
                }
            }

            let now = Instant::now();
            if now < next_tick {
                if !in_flight {
                    thread::sleep((next_tick - now).min(CANCEL_POLL));
                }
                continue;
            }
            next_tick += self.interval;
            if next_tick <= now {
                next_tick = now + self.interval;
            }
            metrics.ticks += 1;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if in_flight {
                metrics.skipped += 1;
                if let Some(outcome) = consumer.on_tick(TickInput::Skipped, elapsed_ms) {
                    break Ok(SampleExit::Finished(outcome));
                }
                continue;
            }
            let frame = match lease.grab() {
                Ok(frame) => frame,
                Err(err) => break Err(SamplerError::Camera(err)),
            };
            if frame_tx.send((frame, elapsed_ms)).is_err() {
                break Err(SamplerError::WorkerLost);
            }
            in_flight = true;
        };

        drop(frame_tx);
        // Wait out a running detection so the detector is free for the next run.
        // Its result is discarded, so a replayed trace loses that entry.
        if in_flight {
            match result_rx.recv_timeout(DRAIN_TIMEOUT) {
                Ok(_) => in_flight = false,
                Err(err) => log_debug(&format!(
                    "{}: abandoning in-flight detection ({err})",
                    self.label
                )),
            }
        }
        if !in_flight {
            let _ = worker.join();
        }

        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        log_debug(&format!(
            "{}_metrics|ticks={}|skipped={}|detections={}|misses={}|elapsed_ms={}|exit={}",
            self.label,
            metrics.ticks,
            metrics.skipped,
            metrics.detections,
            metrics.misses,
            metrics.elapsed_ms,
            match &exit {
                Ok(SampleExit::Finished(_)) => "finished",
                Ok(SampleExit::Cancelled) => "cancelled",
                Err(_) => "error",
            }
        ));
        exit.map(|exit| SampleRun { exit, metrics })
    }
}

fn deliver<C: TickConsumer>(
    consumer: &mut C,
    metrics: &mut SamplerMetrics,
    result: Result<Option<Detection>, String>,
    issued_ms: u64,
) -> Result<Option<C::Outcome>, SamplerError> {
    let detection = result.map_err(SamplerError::Detector)?;
    if detection.is_some() {
        metrics.detections += 1;
    } else {
        metrics.misses += 1;
    }
    Ok(consumer.on_tick(TickInput::Detection(detection.as_ref()), issued_ms))
}

fn spawn_detector_worker(
    detector: SharedDetector,
    mode: DetectMode,
    frames: Receiver<(Frame, u64)>,
    results: Sender<DetectResult>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for (frame, issued_ms) in frames.iter() {
            let result = {
                let mut detector = lock_or_recover(&detector, "face detector");
                match mode {
                    DetectMode::Landmarks => detector.detect_one(&frame),
                    DetectMode::WithEmbedding => detector.detect_with_embedding(&frame),
                }
            };
            if results
                .send((result.map_err(|err| format!("{err:#}")), issued_ms))
                .is_err()
            {
                break;
            }
        }
    })
}
