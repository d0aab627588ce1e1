use super::BlinkConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkStatus {
    Waiting,
    Detecting,
    Completed,
    Failed,
}

/// Mutable counters for one liveness attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlinkSession {
    pub blink_count: u32,
    pub eye_closed: bool,
    pub last_blink_ms: Option<u64>,
    pub status: BlinkStatus,
    pub started_ms: u64,
}

impl BlinkSession {
    fn waiting() -> Self {
        Self {
            blink_count: 0,
            eye_closed: false,
            last_blink_ms: None,
            status: BlinkStatus::Waiting,
            started_ms: 0,
        }
    }
}

/// Effect of feeding one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkUpdate {
    /// Sample ignored or did not cross an edge.
    Unchanged,
    EyesClosed,
    Blink { count: u32 },
    Completed { count: u32 },
    TimedOut { count: u32 },
}

/// Counts blinks from average EAR samples with time-based debounce.
///
/// A blink is a close edge followed by an open edge. A close edge is only
/// accepted once `close_debounce_ms` has passed since the last counted
/// blink, and the reopening only counts after `open_debounce_ms`.
#[derive(Debug, Clone)]
pub struct BlinkDetector {
    cfg: BlinkConfig,
    session: BlinkSession,
}

impl BlinkDetector {
    pub fn new(cfg: BlinkConfig) -> Self {
        Self {
            cfg,
            session: BlinkSession::waiting(),
        }
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.cfg
    }

    pub fn session(&self) -> &BlinkSession {
        &self.session
    }

    pub fn status(&self) -> BlinkStatus {
        self.session.status
    }

    pub fn blink_count(&self) -> u32 {
        self.session.blink_count
    }

    /// Enter `detecting` with fresh counters. Also used for retries after `failed`.
    pub fn start(&mut self, now_ms: u64) {
        self.session = BlinkSession {
            status: BlinkStatus::Detecting,
            started_ms: now_ms,
            ..BlinkSession::waiting()
        };
    }

    pub fn restart(&mut self, now_ms: u64) {
        self.start(now_ms);
    }

    /// Fail the attempt once the budget is spent. Returns `TimedOut` only on the transition.
    pub fn check_timeout(&mut self, now_ms: u64) -> BlinkUpdate {
        if self.session.status != BlinkStatus::Detecting {
            return BlinkUpdate::Unchanged;
        }
        if now_ms.saturating_sub(self.session.started_ms) >= self.cfg.timeout_ms {
            self.session.status = BlinkStatus::Failed;
            return BlinkUpdate::TimedOut {
                count: self.session.blink_count,
            };
        }
        BlinkUpdate::Unchanged
    }

    /// Feed one average-EAR sample. `None` (no face, degenerate eye) is skipped.
    pub fn on_sample(&mut self, ear: Option<f32>, now_ms: u64) -> BlinkUpdate {
        let timeout = self.check_timeout(now_ms);
        if timeout != BlinkUpdate::Unchanged || self.session.status != BlinkStatus::Detecting {
            return timeout;
        }
        let Some(ear) = ear else {
            return BlinkUpdate::Unchanged;
        };

        let since_blink = self
            .session
            .last_blink_ms
            .map(|last| now_ms.saturating_sub(last));
        let waited = |debounce_ms: u64| since_blink.map_or(true, |gap| gap >= debounce_ms);

        if ear < self.cfg.closed_threshold {
            if !self.session.eye_closed && waited(self.cfg.close_debounce_ms) {
                self.session.eye_closed = true;
                return BlinkUpdate::EyesClosed;
            }
            return BlinkUpdate::Unchanged;
        }

        if self.session.eye_closed && waited(self.cfg.open_debounce_ms) {
            self.session.eye_closed = false;
            self.session.blink_count += 1;
            self.session.last_blink_ms = Some(now_ms);
            let count = self.session.blink_count;
            if count >= self.cfg.required_blinks {
                self.session.status = BlinkStatus::Completed;
                return BlinkUpdate::Completed { count };
            }
            return BlinkUpdate::Blink { count };
        }
        BlinkUpdate::Unchanged
    }
}
