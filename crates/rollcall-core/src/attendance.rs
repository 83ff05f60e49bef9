//! Enrollment and classroom recognition, end to end.
//!
//! Ties the extractor, the embedding store, the matcher and the archiver
//! together. All work is blocking file and process I/O; async callers should
//! run these methods on a blocking pool.

use crate::archive::{ArchiveError, UnknownFaceArchiver};
use crate::extractor::{ExtractorError, FaceExtractor};
use crate::matcher::{match_faces, EuclideanMatcher, MatchError, Matcher};
use crate::store::{student_key, EmbeddingStore, Lookup, StoreError};
use crate::threshold::ThresholdConfig;
use crate::types::{BoundingBox, EnrollmentRecord, GalleryEntry, RecognitionOutcome};
use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("No face detected in image")]
    NoFaceDetected,
    #[error("failed to decode image {}: {source}", .path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("matcher: {0}")]
    Match(#[from] MatchError),
    #[error("archive: {0}")]
    Archive(#[from] ArchiveError),
}

/// Result of enrolling one student photo.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub student_key: String,
    pub embedding_path: PathBuf,
    pub location: BoundingBox,
    /// Number of faces the extractor reported; only the first is enrolled.
    pub faces_detected: usize,
}

/// Recognition pipeline over a pluggable extractor and matcher.
pub struct Attendance<E, M = EuclideanMatcher> {
    extractor: E,
    matcher: M,
    store: Arc<EmbeddingStore>,
    archiver: UnknownFaceArchiver,
    threshold: Arc<ThresholdConfig>,
}

impl<E: FaceExtractor> Attendance<E, EuclideanMatcher> {
    pub fn new(
        extractor: E,
        store: Arc<EmbeddingStore>,
        archiver: UnknownFaceArchiver,
        threshold: Arc<ThresholdConfig>,
    ) -> Self {
        Self::with_matcher(extractor, EuclideanMatcher, store, archiver, threshold)
    }
}

impl<E: FaceExtractor, M: Matcher> Attendance<E, M> {
    pub fn with_matcher(
        extractor: E,
        matcher: M,
        store: Arc<EmbeddingStore>,
        archiver: UnknownFaceArchiver,
        threshold: Arc<ThresholdConfig>,
    ) -> Self {
        Self {
            extractor,
            matcher,
            store,
            archiver,
            threshold,
        }
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn threshold(&self) -> &ThresholdConfig {
        &self.threshold
    }

    /// Number of enrolled student embeddings on disk.
    pub fn embeddings_count(&self) -> Result<usize, StoreError> {
        self.store.count("student_")
    }

    /// Extract the face in a student photo and store its embedding.
    ///
    /// The student key comes from the file name prefix before the first `-`
    /// (`"17-front.jpg"` → `student_17`); names without a `-` fall back to
    /// the current time.
    pub fn enroll<Tz: TimeZone>(
        &self,
        image_path: &Path,
        now: &DateTime<Tz>,
    ) -> Result<EnrollOutcome, AttendanceError>
    where
        Tz::Offset: std::fmt::Display,
    {
        ensure_exists(image_path)?;

        let faces = self.extractor.extract(image_path)?;
        let faces_detected = faces.len();
        let face = faces
            .into_iter()
            .next()
            .ok_or(AttendanceError::NoFaceDetected)?;

        if faces_detected > 1 {
            tracing::warn!(
                image = %image_path.display(),
                faces = faces_detected,
                "multiple faces detected in enrollment photo; using the first"
            );
        }

        let key = student_key(&enrollment_id(image_path, now));
        let embedding_path = self.store.save(&face.embedding, &key)?;

        tracing::info!(
            key = %key,
            path = %embedding_path.display(),
            dim = face.embedding.dim(),
            "student embedding enrolled"
        );

        Ok(EnrollOutcome {
            student_key: key,
            embedding_path,
            location: face.location,
            faces_detected,
        })
    }

    /// Identify the students present in a classroom photo.
    ///
    /// The threshold is read once, up front; a concurrent update applies to
    /// the next call. Unknown faces archived before a failure are not rolled
    /// back.
    pub fn recognize<Tz: TimeZone>(
        &self,
        image_path: &Path,
        roster: &[EnrollmentRecord],
        now: &DateTime<Tz>,
    ) -> Result<RecognitionOutcome, AttendanceError>
    where
        Tz::Offset: std::fmt::Display,
    {
        ensure_exists(image_path)?;

        let faces = self.extractor.extract(image_path)?;
        tracing::info!(image = %image_path.display(), faces = faces.len(), "faces detected");
        if faces.is_empty() {
            return Ok(RecognitionOutcome::default());
        }

        let gallery = self.resolve_gallery(roster)?;
        tracing::info!(
            roster = roster.len(),
            usable = gallery.len(),
            "gallery resolved"
        );

        let threshold = self.threshold.current();
        let report = match_faces(&self.matcher, &faces, &gallery, threshold)?;

        let unknown_faces = if report.unknown.is_empty() {
            Vec::new()
        } else {
            let image = image::open(image_path)
                .map_err(|source| AttendanceError::ImageDecode {
                    path: image_path.to_path_buf(),
                    source,
                })?
                .to_rgb8();
            self.archiver.archive(&image, report.unknown, now)?
        };

        tracing::info!(
            threshold,
            recognized = report.matches.len(),
            unknown = unknown_faces.len(),
            dropped = report.dropped,
            "recognition complete"
        );

        Ok(RecognitionOutcome {
            matches: report.matches,
            unknown_faces,
            total_faces: faces.len(),
        })
    }

    /// Load gallery vectors for every record with a usable embedding.
    ///
    /// Records without a reference, or whose file was never written, are
    /// skipped. A corrupt file fails the whole call.
    pub fn resolve_gallery(
        &self,
        roster: &[EnrollmentRecord],
    ) -> Result<Vec<GalleryEntry>, AttendanceError> {
        let mut gallery = Vec::with_capacity(roster.len());

        for record in roster {
            let Some(path) = record.embedding_path.as_deref() else {
                tracing::debug!(student = %record.id, "no embedding reference; skipping");
                continue;
            };
            match self.store.lookup(path) {
                Lookup::Found(embedding) => gallery.push(GalleryEntry {
                    student_id: record.id.clone(),
                    embedding,
                }),
                Lookup::Absent => {
                    tracing::debug!(
                        student = %record.id,
                        path = %path.display(),
                        "embedding missing; skipping"
                    );
                }
                Lookup::Corrupt(err) => {
                    tracing::error!(student = %record.id, error = %err, "unusable gallery embedding");
                    return Err(err.into());
                }
            }
        }

        Ok(gallery)
    }
}

fn ensure_exists(image_path: &Path) -> Result<(), AttendanceError> {
    if image_path.is_file() {
        Ok(())
    } else {
        Err(AttendanceError::ImageNotFound(image_path.to_path_buf()))
    }
}

/// Student id encoded in an enrollment photo's file name.
fn enrollment_id<Tz: TimeZone>(image_path: &Path, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let file_name = image_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    match file_name.split_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}
