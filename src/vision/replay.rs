//! Detector that replays a recorded detection trace instead of running models.

use super::{Detection, FaceDetector, Frame};
use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Replays one trace entry per detection call.
///
/// Trace files are JSON lines: each line is a [`Detection`] object or `null`
/// for a frame without a face. Blank lines and lines starting with `#` are
/// ignored. Once the trace is exhausted every call reports no face.
pub struct ReplayDetector {
    entries: VecDeque<Option<Detection>>,
    loaded: bool,
    latency: Option<Duration>,
    calls: u64,
}

impl ReplayDetector {
    pub fn from_detections(entries: impl IntoIterator<Item = Option<Detection>>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            loaded: false,
            latency: None,
            calls: 0,
        }
    }

    pub fn from_trace_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read detection trace {}", path.display()))?;
        Self::parse_trace(&text)
            .with_context(|| format!("invalid detection trace {}", path.display()))
    }

    pub fn parse_trace(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: Option<Detection> = serde_json::from_str(line)
                .with_context(|| format!("line {}: not a detection or null", idx + 1))?;
            entries.push(entry);
        }
        Ok(Self::from_detections(entries))
    }

    /// Sleep this long inside every detection call, to emulate a slow model.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn next_entry(&mut self) -> Result<Option<Detection>> {
        if !self.loaded {
            bail!("detector models are not loaded");
        }
        self.calls += 1;
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        Ok(self.entries.pop_front().flatten())
    }
}

impl FaceDetector for ReplayDetector {
    fn load_models(&mut self, model_dir: Option<&Path>) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        if let Some(dir) = model_dir {
            if !dir.is_dir() {
                bail!("model directory {} does not exist", dir.display());
            }
        }
        self.loaded = true;
        Ok(())
    }

    fn models_loaded(&self) -> bool {
        self.loaded
    }

    fn detect_one(&mut self, _frame: &Frame) -> Result<Option<Detection>> {
        Ok(self.next_entry()?.map(Detection::without_embedding))
    }

    fn detect_with_embedding(&mut self, _frame: &Frame) -> Result<Option<Detection>> {
        self.next_entry()
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}
