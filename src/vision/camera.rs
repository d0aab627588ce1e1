//! Exclusive camera ownership.
//!
//! A camera held by one step blocks every other step, so the device is only
//! reachable through a [`CameraLease`] that closes the stream when dropped.

use super::{CameraConstraints, Frame};
use crate::{lock_or_recover, log_debug};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub type StreamId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    PermissionDenied(String),
    NotFound(String),
    Busy,
    Disconnected(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::PermissionDenied(msg) => write!(f, "camera permission denied: {msg}"),
            CameraError::NotFound(msg) => write!(f, "camera not found: {msg}"),
            CameraError::Busy => write!(f, "camera is already in use by another step"),
            CameraError::Disconnected(msg) => write!(f, "camera disconnected: {msg}"),
        }
    }
}

impl std::error::Error for CameraError {}

/// Video input capability.
pub trait CameraDevice: Send {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<StreamId, CameraError>;
    fn grab(&mut self, stream: StreamId) -> Result<Frame, CameraError>;
    fn close(&mut self, stream: StreamId);
    fn name(&self) -> &str {
        "camera"
    }
}

type SharedDevice = Arc<Mutex<Box<dyn CameraDevice>>>;

/// Owner of the single camera device.
#[derive(Clone)]
pub struct CameraSlot {
    device: SharedDevice,
    held: Arc<AtomicBool>,
}

impl CameraSlot {
    pub fn new(device: impl CameraDevice + 'static) -> Self {
        Self {
            device: Arc::new(Mutex::new(Box::new(device))),
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the device for exclusive use; fails with `Busy` while another lease is alive.
    pub fn acquire(&self, constraints: &CameraConstraints) -> Result<CameraLease, CameraError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CameraError::Busy);
        }
        let opened = {
            let mut device = lock_or_recover(&self.device, "camera open");
            device.open(constraints)
        };
        match opened {
            Ok(stream) => {
                log_debug(&format!(
                    "camera acquired: stream={stream} {}x{}",
                    constraints.width, constraints.height
                ));
                Ok(CameraLease {
                    device: self.device.clone(),
                    held: self.held.clone(),
                    stream,
                    released: false,
                })
            }
            Err(err) => {
                self.held.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// Scoped handle to an open camera stream.
pub struct CameraLease {
    device: SharedDevice,
    held: Arc<AtomicBool>,
    stream: StreamId,
    released: bool,
}

impl CameraLease {
    pub fn grab(&self) -> Result<Frame, CameraError> {
        let mut device = lock_or_recover(&self.device, "camera grab");
        device.grab(self.stream)
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Release explicitly; dropping the lease does the same.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        {
            let mut device = lock_or_recover(&self.device, "camera close");
            device.close(self.stream);
        }
        self.held.store(false, Ordering::SeqCst);
        log_debug(&format!("camera released: stream={}", self.stream));
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Camera that fabricates sequence-numbered frames.
///
/// Used by the replay pipeline, where the detector ignores pixel content.
pub struct SyntheticCamera {
    next_stream: StreamId,
    seq: u64,
    width: u32,
    height: u32,
    deny_permission: bool,
    open_streams: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            next_stream: 1,
            seq: 0,
            width: 0,
            height: 0,
            deny_permission: false,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Camera whose `open` always fails like a denied browser permission prompt.
    pub fn denied() -> Self {
        Self {
            deny_permission: true,
            ..Self::new()
        }
    }

    /// Counter of currently open streams, for leak checks.
    pub fn open_stream_counter(&self) -> Arc<AtomicUsize> {
        self.open_streams.clone()
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDevice for SyntheticCamera {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<StreamId, CameraError> {
        if self.deny_permission {
            return Err(CameraError::PermissionDenied(
                "user declined camera access".to_string(),
            ));
        }
        self.width = constraints.width;
        self.height = constraints.height;
        let stream = self.next_stream;
        self.next_stream += 1;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }

    fn grab(&mut self, stream: StreamId) -> Result<Frame, CameraError> {
        if stream + 1 != self.next_stream || self.open_streams.load(Ordering::SeqCst) == 0 {
            return Err(CameraError::Disconnected(format!("stream {stream} is closed")));
        }
        self.seq += 1;
        let captured_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut image = b"BGFRAME".to_vec();
        image.extend_from_slice(&self.seq.to_le_bytes());
        Ok(Frame {
            seq: self.seq,
            width: self.width,
            height: self.height,
            captured_at_ms,
            image,
        })
    }

    fn close(&mut self, _stream: StreamId) {
        let _ = self
            .open_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
