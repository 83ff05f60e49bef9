use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pixel region of a face, in the `(top, right, bottom, left)` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True when the box encloses a non-empty area.
    pub fn is_valid(&self) -> bool {
        self.right > self.left && self.bottom > self.top
    }

    /// `[top, right, bottom, left]`, the layout used on the wire.
    pub fn as_array(&self) -> [i32; 4] {
        [self.top, self.right, self.bottom, self.left]
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from([top, right, bottom, left]: [i32; 4]) -> Self {
        Self { top, right, bottom, left }
    }
}

/// Fixed-length face signature. Compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance. Callers must ensure both sides share a dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Student identifier as supplied by the registry.
///
/// Kept in whichever JSON form the caller used so that ids echo back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StudentId {
    Number(i64),
    Text(String),
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudentId::Number(n) => write!(f, "{n}"),
            StudentId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId::Text(s.to_string())
    }
}

impl From<i64> for StudentId {
    fn from(n: i64) -> Self {
        StudentId::Number(n)
    }
}

/// A known student as handed over by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub id: StudentId,
    #[serde(default)]
    pub roll_number: Option<String>,
    #[serde(default)]
    pub embedding_path: Option<PathBuf>,
}

/// One face reported by the extractor.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: BoundingBox,
    pub embedding: Embedding,
}

/// A gallery vector with its owner, resolved from an [`EnrollmentRecord`].
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub student_id: StudentId,
    pub embedding: Embedding,
}

/// Accepted identification.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionMatch {
    pub student_id: StudentId,
    /// `1 - distance`, unclamped. Degenerate vectors can push it outside [0, 1].
    pub confidence: f32,
    pub location: BoundingBox,
}

impl RecognitionMatch {
    /// Confidence clamped to [0, 1] for human-facing output only.
    pub fn display_confidence(&self) -> f32 {
        self.confidence.clamp(0.0, 1.0)
    }
}

/// Face that no enrolled student claimed, archived for later enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct UnknownFace {
    pub location: BoundingBox,
    pub face_image_path: String,
    pub embedding_path: PathBuf,
    /// Omitted when the gallery was empty and no distance was computed.
    pub best_confidence: Option<f32>,
}

/// Result of one recognition call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecognitionOutcome {
    pub matches: Vec<RecognitionMatch>,
    pub unknown_faces: Vec<UnknownFace>,
    pub total_faces: usize,
}

impl RecognitionOutcome {
    /// Faces that were neither matched nor archived (duplicate claims).
    pub fn dropped(&self) -> usize {
        self.total_faces
            .saturating_sub(self.matches.len() + self.unknown_faces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_array_layout() {
        let b = BoundingBox::from([10, 50, 60, 20]);
        assert_eq!(b.top, 10);
        assert_eq!(b.right, 50);
        assert_eq!(b.bottom, 60);
        assert_eq!(b.left, 20);
        assert_eq!(b.as_array(), [10, 50, 60, 20]);
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 50);
        assert!(b.is_valid());
        assert!(!BoundingBox::new(10, 20, 10, 30).is_valid());
    }

    #[test]
    fn test_student_id_keeps_json_form() {
        let ids: Vec<StudentId> = serde_json::from_str(r#"[7, "S1"]"#).unwrap();
        assert_eq!(ids[0], StudentId::Number(7));
        assert_eq!(ids[1], StudentId::Text("S1".into()));
        assert_eq!(serde_json::to_string(&ids).unwrap(), r#"[7,"S1"]"#);
        assert_eq!(ids[0].to_string(), "7");
    }

    #[test]
    fn test_enrollment_record_optional_fields() {
        let rec: EnrollmentRecord =
            serde_json::from_str(r#"{"id": 3, "embedding_path": null}"#).unwrap();
        assert_eq!(rec.id, StudentId::Number(3));
        assert!(rec.roll_number.is_none());
        assert!(rec.embedding_path.is_none());
    }

    #[test]
    fn test_display_confidence_clamps() {
        let m = RecognitionMatch {
            student_id: "S1".into(),
            confidence: -0.3,
            location: BoundingBox::new(0, 1, 1, 0),
        };
        assert_eq!(m.display_confidence(), 0.0);
        assert_eq!(m.confidence, -0.3);
    }

    #[test]
    fn test_outcome_dropped_count() {
        let outcome = RecognitionOutcome {
            matches: vec![RecognitionMatch {
                student_id: "S1".into(),
                confidence: 0.9,
                location: BoundingBox::new(0, 1, 1, 0),
            }],
            unknown_faces: vec![],
            total_faces: 2,
        };
        assert_eq!(outcome.dropped(), 1);
    }
}
