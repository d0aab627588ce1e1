//! Reduce guided pose captures to a single reference embedding.

use crate::signal::mean_embedding;
use crate::vision::{Detection, Frame};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Frontal,
    TurnLeft,
    TurnRight,
}

impl Pose {
    /// Guided capture order.
    pub const SEQUENCE: [Pose; 3] = [Pose::Frontal, Pose::TurnLeft, Pose::TurnRight];

    pub fn label(self) -> &'static str {
        match self {
            Pose::Frontal => "frontal",
            Pose::TurnLeft => "turn_left",
            Pose::TurnRight => "turn_right",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Pose::Frontal => "Look straight at the camera",
            Pose::TurnLeft => "Turn your head slightly to the left",
            Pose::TurnRight => "Turn your head slightly to the right",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseCapture {
    pub pose: Pose,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollError {
    UnexpectedPose { expected: Option<Pose>, got: Pose },
    NoFace(Pose),
    NoEmbedding(Pose),
    DimensionMismatch { pose: Pose, expected: usize, got: usize },
    Incomplete { captured: usize, required: usize },
}

impl fmt::Display for EnrollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollError::UnexpectedPose { expected, got } => match expected {
                Some(expected) => write!(
                    f,
                    "expected {} capture, got {}",
                    expected.label(),
                    got.label()
                ),
                None => write!(f, "all poses captured; unexpected {}", got.label()),
            },
            EnrollError::NoFace(pose) => write!(f, "no face detected for {} pose", pose.label()),
            EnrollError::NoEmbedding(pose) => {
                write!(f, "face found but no embedding for {} pose", pose.label())
            }
            EnrollError::DimensionMismatch {
                pose,
                expected,
                got,
            } => write!(
                f,
                "{} embedding has {got} values, expected {expected}",
                pose.label()
            ),
            EnrollError::Incomplete { captured, required } => {
                write!(f, "captured {captured} of {required} poses")
            }
        }
    }
}

impl std::error::Error for EnrollError {}

/// Aggregated enrollment ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub embedding: Vec<f32>,
    /// Frontal frame kept as the profile image.
    pub image: Vec<u8>,
    pub captures: usize,
}

/// Collects one capture per pose in [`Pose::SEQUENCE`] order.
#[derive(Debug, Clone)]
pub struct EnrollmentAggregator {
    embedding_dim: usize,
    captures: Vec<PoseCapture>,
    image: Option<Vec<u8>>,
}

impl EnrollmentAggregator {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            captures: Vec::with_capacity(Pose::SEQUENCE.len()),
            image: None,
        }
    }

    pub fn next_pose(&self) -> Option<Pose> {
        Pose::SEQUENCE.get(self.captures.len()).copied()
    }

    pub fn captured(&self) -> usize {
        self.captures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.next_pose().is_none()
    }

    /// Accept a detection for `pose`. Failures leave the aggregator unchanged so the pose can be retried.
    pub fn add_capture(
        &mut self,
        pose: Pose,
        detection: Option<&Detection>,
        frame: &Frame,
    ) -> Result<usize, EnrollError> {
        let expected = self.next_pose();
        if expected != Some(pose) {
            return Err(EnrollError::UnexpectedPose {
                expected,
                got: pose,
            });
        }
        let detection = detection.ok_or(EnrollError::NoFace(pose))?;
        let embedding = detection
            .embedding
            .as_ref()
            .ok_or(EnrollError::NoEmbedding(pose))?;
        if embedding.len() != self.embedding_dim {
            return Err(EnrollError::DimensionMismatch {
                pose,
                expected: self.embedding_dim,
                got: embedding.len(),
            });
        }
        if pose == Pose::Frontal {
            self.image = Some(frame.image.clone());
        }
        self.captures.push(PoseCapture {
            pose,
            embedding: embedding.clone(),
        });
        Ok(self.captures.len())
    }

    /// Component-wise mean of all captures.
    pub fn finish(self) -> Result<Enrollment, EnrollError> {
        let required = Pose::SEQUENCE.len();
        let incomplete = EnrollError::Incomplete {
            captured: self.captures.len(),
            required,
        };
        if self.captures.len() < required {
            return Err(incomplete);
        }
        let vectors: Vec<&[f32]> = self.captures.iter().map(|c| c.embedding.as_slice()).collect();
        let embedding = mean_embedding(&vectors).map_err(|_| incomplete.clone())?;
        Ok(Enrollment {
            embedding,
            image: self.image.unwrap_or_default(),
            captures: self.captures.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_support::{face_with_ear, face_with_embedding, frame};

    fn capture_all(agg: &mut EnrollmentAggregator, values: [f32; 3]) {
        for (pose, value) in Pose::SEQUENCE.into_iter().zip(values) {
            let face = face_with_embedding(vec![value; 3]);
            agg.add_capture(pose, Some(&face), &frame(pose as u64 + 1))
                .expect("capture accepted");
        }
    }

    #[test]
    fn mean_of_three_poses_becomes_reference() {
        let mut agg = EnrollmentAggregator::new(3);
        capture_all(&mut agg, [1.0, 3.0, 5.0]);
        assert!(agg.is_complete());
        let enrollment = agg.finish().expect("aggregation succeeds");
        assert_eq!(enrollment.embedding, vec![3.0, 3.0, 3.0]);
        assert_eq!(enrollment.captures, 3);
        assert_eq!(enrollment.image, frame(1).image);
    }

    #[test]
    fn poses_follow_guided_order() {
        let mut agg = EnrollmentAggregator::new(3);
        let face = face_with_embedding(vec![1.0; 3]);
        let err = agg
            .add_capture(Pose::TurnLeft, Some(&face), &frame(1))
            .unwrap_err();
        assert_eq!(
            err,
            EnrollError::UnexpectedPose {
                expected: Some(Pose::Frontal),
                got: Pose::TurnLeft
            }
        );
        assert_eq!(agg.next_pose(), Some(Pose::Frontal));
    }

    #[test]
    fn missing_face_or_embedding_is_a_retryable_failure() {
        let mut agg = EnrollmentAggregator::new(3);
        assert_eq!(
            agg.add_capture(Pose::Frontal, None, &frame(1)),
            Err(EnrollError::NoFace(Pose::Frontal))
        );
        let landmarks_only = face_with_ear(0.3);
        assert_eq!(
            agg.add_capture(Pose::Frontal, Some(&landmarks_only), &frame(2)),
            Err(EnrollError::NoEmbedding(Pose::Frontal))
        );
        assert_eq!(agg.captured(), 0);
        let face = face_with_embedding(vec![1.0; 3]);
        assert_eq!(agg.add_capture(Pose::Frontal, Some(&face), &frame(3)), Ok(1));
    }

    #[test]
    fn rejects_embeddings_of_wrong_dimension() {
        let mut agg = EnrollmentAggregator::new(4);
        let face = face_with_embedding(vec![1.0; 3]);
        assert!(matches!(
            agg.add_capture(Pose::Frontal, Some(&face), &frame(1)),
            Err(EnrollError::DimensionMismatch {
                expected: 4,
                got: 3,
                ..
            })
        ));
    }

    #[test]
    fn refuses_to_finish_with_missing_poses() {
        let mut agg = EnrollmentAggregator::new(3);
        let face = face_with_embedding(vec![1.0; 3]);
        agg.add_capture(Pose::Frontal, Some(&face), &frame(1)).unwrap();
        assert_eq!(
            agg.finish(),
            Err(EnrollError::Incomplete {
                captured: 1,
                required: 3
            })
        );
    }

    #[test]
    fn extra_capture_after_completion_is_rejected() {
        let mut agg = EnrollmentAggregator::new(3);
        capture_all(&mut agg, [1.0, 1.0, 1.0]);
        let face = face_with_embedding(vec![1.0; 3]);
        assert!(matches!(
            agg.add_capture(Pose::Frontal, Some(&face), &frame(9)),
            Err(EnrollError::UnexpectedPose { expected: None, .. })
        ));
    }
}
