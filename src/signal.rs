//! Numeric primitives for the biometric pipeline.
//!
//! Eye aspect ratio (EAR) turns six eye landmarks into an open/closed signal,
//! and embedding distance/mean operate on face recognition vectors. Everything
//! here is pure so the detectors above it can be tested with synthetic data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Horizontal eye widths below this are treated as degenerate.
const MIN_EYE_WIDTH: f32 = 1e-6;

/// A 2D landmark position in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

impl From<[f32; 2]> for Point {
    fn from(raw: [f32; 2]) -> Self {
        Self::new(raw[0], raw[1])
    }
}

impl From<Point> for [f32; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// Six eye landmarks in canonical order: outer corner, two upper lid points,
/// inner corner, two lower lid points.
pub type EyePoints = [Point; 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    LengthMismatch { left: usize, right: usize },
    Empty,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::LengthMismatch { left, right } => {
                write!(f, "embedding length mismatch ({left} vs {right})")
            }
            SignalError::Empty => write!(f, "no embeddings to aggregate"),
        }
    }
}

impl std::error::Error for SignalError {}

/// EAR = (|p1-p5| + |p2-p4|) / (2 * |p0-p3|).
///
/// Returns `None` when the eye has zero width, which happens on collapsed or
/// bogus landmark sets and would otherwise divide by zero.
pub fn eye_aspect_ratio(eye: &EyePoints) -> Option<f32> {
    let horizontal = eye[0].distance(eye[3]);
    if horizontal < MIN_EYE_WIDTH {
        return None;
    }
    let vertical = eye[1].distance(eye[5]) + eye[2].distance(eye[4]);
    Some(vertical / (2.0 * horizontal))
}

/// Mean EAR of both eyes; undefined if either eye is.
pub fn average_ear(left: &EyePoints, right: &EyePoints) -> Option<f32> {
    let left = eye_aspect_ratio(left)?;
    let right = eye_aspect_ratio(right)?;
    Some((left + right) / 2.0)
}

/// Euclidean distance between two embeddings of equal length.
pub fn embedding_distance(a: &[f32], b: &[f32]) -> Result<f32, SignalError> {
    if a.len() != b.len() {
        return Err(SignalError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

/// Component-wise mean of equally sized embeddings.
pub fn mean_embedding<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Vec<f32>, SignalError> {
    let first = vectors.first().ok_or(SignalError::Empty)?.as_ref();
    let mut acc = vec![0.0f32; first.len()];
    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != acc.len() {
            return Err(SignalError::LengthMismatch {
                left: acc.len(),
                right: vector.len(),
            });
        }
        for (slot, value) in acc.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut acc {
        *slot /= count;
    }
    Ok(acc)
}

#[cfg(test)]
pub(crate) fn synthetic_eye(width: f32, opening: f32) -> EyePoints {
    // Symmetric eye centred on the origin; EAR == opening / width.
    let half = width / 2.0;
    let lid = opening / 2.0;
    [
        Point::new(-half, 0.0),
        Point::new(-half / 3.0, -lid),
        Point::new(half / 3.0, -lid),
        Point::new(half, 0.0),
        Point::new(half / 3.0, lid),
        Point::new(-half / 3.0, lid),
    ]
}
