//! Nearest-neighbour classification of detected faces against a gallery.
//!
//! Each face is compared with every gallery vector by Euclidean distance and
//! scored as `confidence = 1 - best_distance`. The score is not clamped: it
//! drops below zero for distant vectors and can exceed one for degenerate
//! input, and the threshold comparison always sees the raw value.
//!
//! Duplicate claims follow first-claim-wins: once a student has been matched
//! in a call, any later face whose nearest neighbour is the same student is
//! dropped. It becomes neither a match nor an unknown face.

use crate::types::{BoundingBox, DetectedFace, Embedding, GalleryEntry, RecognitionMatch, StudentId};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery embedding for student {student_id} has dimension {actual}, probe has {expected}")]
    DimensionMismatch {
        student_id: StudentId,
        expected: usize,
        actual: usize,
    },
}

/// Closest gallery entry for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

impl Nearest {
    pub fn confidence(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Strategy for finding the closest enrolled face to a probe embedding.
pub trait Matcher {
    /// Returns `None` when no entry yields a comparable distance.
    fn nearest(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> Result<Option<Nearest>, MatchError>;
}

/// Exhaustive L2 search. Ties resolve to the earliest gallery entry.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> Result<Option<Nearest>, MatchError> {
        let mut best: Option<Nearest> = None;

        for (index, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() {
                return Err(MatchError::DimensionMismatch {
                    student_id: entry.student_id.clone(),
                    expected: probe.dim(),
                    actual: entry.embedding.dim(),
                });
            }

            let distance = probe.euclidean_distance(&entry.embedding);
            // NaN never wins.
            let closer = match &best {
                None => !distance.is_nan(),
                Some(current) => distance < current.distance,
            };
            if closer {
                best = Some(Nearest { index, distance });
            }
        }

        Ok(best)
    }
}

/// Face the engine could not assign, awaiting archiving.
#[derive(Debug, Clone)]
pub struct PendingUnknown {
    pub location: BoundingBox,
    pub embedding: Embedding,
    /// `None` when no distance was computed (empty gallery).
    pub best_confidence: Option<f32>,
}

/// Classification of all faces in one call, in detection order.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub matches: Vec<RecognitionMatch>,
    pub unknown: Vec<PendingUnknown>,
    /// Faces discarded because their student was already claimed.
    pub dropped: usize,
}

/// Classify `faces` against `gallery` using a fixed `threshold`.
///
/// A face is accepted when `confidence >= threshold`.
pub fn match_faces<M: Matcher + ?Sized>(
    matcher: &M,
    faces: &[DetectedFace],
    gallery: &[GalleryEntry],
    threshold: f32,
) -> Result<MatchReport, MatchError> {
    let mut report = MatchReport::default();
    let mut claimed: HashSet<&StudentId> = HashSet::new();

    for face in faces {
        if gallery.is_empty() {
            report.unknown.push(PendingUnknown {
                location: face.location,
                embedding: face.embedding.clone(),
                best_confidence: None,
            });
            continue;
        }

        let Some(nearest) = matcher.nearest(&face.embedding, gallery)? else {
            report.unknown.push(PendingUnknown {
                location: face.location,
                embedding: face.embedding.clone(),
                best_confidence: None,
            });
            continue;
        };

        let confidence = nearest.confidence();
        let student_id = &gallery[nearest.index].student_id;

        if confidence >= threshold {
            if claimed.insert(student_id) {
                tracing::debug!(student = %student_id, confidence, "face recognized");
                report.matches.push(RecognitionMatch {
                    student_id: student_id.clone(),
                    confidence,
                    location: face.location,
                });
            } else {
                tracing::debug!(
                    student = %student_id,
                    confidence,
                    "student already claimed in this call; dropping face"
                );
                report.dropped += 1;
            }
        } else {
            tracing::debug!(closest = %student_id, confidence, "face below threshold");
            report.unknown.push(PendingUnknown {
                location: face.location,
                embedding: face.embedding.clone(),
                best_confidence: Some(confidence),
            });
        }
    }

    Ok(report)
}
