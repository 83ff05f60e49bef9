//! rollcall-core: face matching engine for classroom attendance.
//!
//! Compares faces found in a classroom photo against enrolled students'
//! embeddings, archives the faces nobody claims, and persists vectors in a
//! versioned on-disk format. Face detection itself is delegated to an
//! external [`FaceExtractor`].

pub mod archive;
pub mod attendance;
pub mod extractor;
pub mod matcher;
pub mod store;
pub mod threshold;
pub mod types;

pub use archive::{ArchiveError, UnknownFaceArchiver, DEFAULT_PUBLIC_PREFIX};
pub use attendance::{Attendance, AttendanceError, EnrollOutcome};
pub use extractor::{CommandExtractor, ExtractorError, FaceExtractor};
pub use matcher::{match_faces, EuclideanMatcher, MatchError, MatchReport, Matcher, PendingUnknown};
pub use store::{read_embedding, EmbeddingStore, Lookup, StoreError};
pub use threshold::{ThresholdConfig, ThresholdError, DEFAULT_THRESHOLD};
pub use types::{
    BoundingBox, DetectedFace, Embedding, EnrollmentRecord, GalleryEntry, RecognitionMatch,
    RecognitionOutcome, StudentId, UnknownFace,
};
