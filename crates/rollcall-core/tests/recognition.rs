use chrono::{Local, TimeZone};
use rollcall_core::{
    Attendance, AttendanceError, BoundingBox, DetectedFace, Embedding, EmbeddingStore,
    EnrollmentRecord, ExtractorError, FaceExtractor, StudentId, ThresholdConfig,
    UnknownFaceArchiver, DEFAULT_PUBLIC_PREFIX,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Returns the same faces for every image.
struct ScriptedExtractor(Vec<DetectedFace>);

impl FaceExtractor for ScriptedExtractor {
    fn extract(&self, _image_path: &Path) -> Result<Vec<DetectedFace>, ExtractorError> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    dir: TempDir,
    store: Arc<EmbeddingStore>,
    threshold: Arc<ThresholdConfig>,
    photo: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddingStore::open(dir.path().join("embeddings")).unwrap());
        let photo = dir.path().join("classroom.png");
        image::RgbImage::from_pixel(320, 240, image::Rgb([90, 120, 150]))
            .save(&photo)
            .unwrap();
        Self {
            dir,
            store,
            threshold: Arc::new(ThresholdConfig::default()),
            photo,
        }
    }

    fn engine(&self, faces: Vec<DetectedFace>) -> Attendance<ScriptedExtractor> {
        let archiver = UnknownFaceArchiver::new(
            self.dir.path().join("unknown_faces"),
            DEFAULT_PUBLIC_PREFIX,
            self.store.clone(),
        )
        .unwrap();
        Attendance::new(
            ScriptedExtractor(faces),
            self.store.clone(),
            archiver,
            self.threshold.clone(),
        )
    }

    fn enroll(&self, id: &str, values: Vec<f32>) -> EnrollmentRecord {
        let path = self
            .store
            .save(&Embedding::new(values), &format!("student_{id}"))
            .unwrap();
        EnrollmentRecord {
            id: id.into(),
            roll_number: None,
            embedding_path: Some(path),
        }
    }

    fn crop_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("unknown_faces"))
            .unwrap()
            .count()
    }
}

fn face(values: Vec<f32>, left: i32) -> DetectedFace {
    DetectedFace {
        location: BoundingBox::new(20, left + 40, 80, left),
        embedding: Embedding::new(values),
    }
}

fn now() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2024, 9, 2, 8, 30, 0).unwrap()
}

#[test]
fn single_known_face_is_matched() {
    let fx = Fixture::new();
    let v1 = vec![0.2, 0.4, 0.1, 0.3];
    let roster = vec![fx.enroll("S1", v1.clone())];

    let outcome = fx
        .engine(vec![face(v1, 10)])
        .recognize(&fx.photo, &roster, &now())
        .unwrap();

    assert_eq!(outcome.total_faces, 1);
    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].student_id, StudentId::from("S1"));
    assert!((outcome.matches[0].confidence - 1.0).abs() < 1e-6);
    assert!(outcome.unknown_faces.is_empty());
    assert_eq!(fx.crop_count(), 0);
}

#[test]
fn face_below_threshold_is_archived() {
    let fx = Fixture::new();
    let roster = vec![fx.enroll("S1", vec![0.0, 0.0])];

    let outcome = fx
        .engine(vec![face(vec![0.3, 0.4], 10)])
        .recognize(&fx.photo, &roster, &now())
        .unwrap();

    assert!(outcome.matches.is_empty());
    assert_eq!(outcome.unknown_faces.len(), 1);
    let unknown = &outcome.unknown_faces[0];
    assert!((unknown.best_confidence.unwrap() - 0.5).abs() < 1e-6);
    assert_eq!(
        unknown.face_image_path,
        "/ai-engine/unknown_faces/unknown_20240902_083000_0.jpg"
    );
    let stored = fx.store.load(&unknown.embedding_path).unwrap().unwrap();
    assert_eq!(stored.values, vec![0.3, 0.4]);
    assert_eq!(fx.crop_count(), 1);
}

#[test]
fn duplicate_claim_drops_second_face() {
    let fx = Fixture::new();
    let roster = vec![fx.enroll("S1", vec![0.0, 0.0])];

    let outcome = fx
        .engine(vec![face(vec![0.1, 0.0], 10), face(vec![0.0, 0.1], 200)])
        .recognize(&fx.photo, &roster, &now())
        .unwrap();

    assert_eq!(outcome.total_faces, 2);
    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].location.left, 10);
    assert!(outcome.unknown_faces.is_empty());
    assert_eq!(outcome.dropped(), 1);
    assert_eq!(fx.crop_count(), 0);
}

#[test]
fn empty_gallery_archives_every_face() {
    let fx = Fixture::new();
    let faces = vec![face(vec![0.1], 0), face(vec![0.2], 100), face(vec![0.3], 200)];

    let outcome = fx.engine(faces).recognize(&fx.photo, &[], &now()).unwrap();

    assert!(outcome.matches.is_empty());
    assert_eq!(outcome.unknown_faces.len(), 3);
    assert!(outcome.unknown_faces.iter().all(|u| u.best_confidence.is_none()));
    assert_eq!(fx.crop_count(), 3);
}

#[test]
fn unresolvable_roster_entries_are_skipped() {
    let fx = Fixture::new();
    let roster = vec![
        EnrollmentRecord {
            id: StudentId::Number(1),
            roll_number: Some("R-001".into()),
            embedding_path: None,
        },
        EnrollmentRecord {
            id: StudentId::Number(2),
            roll_number: None,
            embedding_path: Some(fx.dir.path().join("embeddings/student_2.emb")),
        },
        fx.enroll("3", vec![1.0, 1.0]),
    ];

    let engine = fx.engine(vec![face(vec![1.0, 1.0], 0)]);
    assert_eq!(engine.resolve_gallery(&roster).unwrap().len(), 1);

    let outcome = engine.recognize(&fx.photo, &roster, &now()).unwrap();
    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.matches[0].student_id, StudentId::from("3"));
}

#[test]
fn corrupt_gallery_embedding_fails_the_call() {
    let fx = Fixture::new();
    let record = fx.enroll("S1", vec![0.5, 0.5]);
    std::fs::write(record.embedding_path.as_ref().unwrap(), b"garbage").unwrap();

    let err = fx
        .engine(vec![face(vec![0.5, 0.5], 0)])
        .recognize(&fx.photo, &[record], &now())
        .unwrap_err();
    assert!(matches!(err, AttendanceError::Store(_)));
}

#[test]
fn dimension_mismatch_fails_loudly() {
    let fx = Fixture::new();
    let roster = vec![fx.enroll("S1", vec![0.5, 0.5, 0.5])];

    let err = fx
        .engine(vec![face(vec![0.5, 0.5], 0)])
        .recognize(&fx.photo, &roster, &now())
        .unwrap_err();
    assert!(matches!(err, AttendanceError::Match(_)));
}

#[test]
fn missing_image_is_reported() {
    let fx = Fixture::new();
    let err = fx
        .engine(vec![])
        .recognize(&fx.dir.path().join("nope.jpg"), &[], &now())
        .unwrap_err();
    assert!(matches!(err, AttendanceError::ImageNotFound(_)));
}

#[test]
fn no_faces_yields_empty_outcome() {
    let fx = Fixture::new();
    let roster = vec![fx.enroll("S1", vec![0.5])];
    let outcome = fx
        .engine(vec![])
        .recognize(&fx.photo, &roster, &now())
        .unwrap();
    assert_eq!(outcome.total_faces, 0);
    assert!(outcome.matches.is_empty());
    assert!(outcome.unknown_faces.is_empty());
}

#[test]
fn threshold_update_applies_to_next_call() {
    let fx = Fixture::new();
    let roster = vec![fx.enroll("S1", vec![0.0, 0.0])];
    let engine = fx.engine(vec![face(vec![0.0, 0.3], 0)]); // confidence 0.7

    let before = engine.recognize(&fx.photo, &roster, &now()).unwrap();
    assert_eq!(before.matches.len(), 1);

    assert!(fx.threshold.update(1.5).is_err());
    assert_eq!(fx.threshold.current(), 0.6);

    fx.threshold.update(0.75).unwrap();
    let after = engine.recognize(&fx.photo, &roster, &now()).unwrap();
    assert!(after.matches.is_empty());
    assert_eq!(after.unknown_faces.len(), 1);
}

#[test]
fn enroll_stores_first_face_under_file_prefix() {
    let fx = Fixture::new();
    let photo = fx.dir.path().join("17-portrait.png");
    std::fs::copy(&fx.photo, &photo).unwrap();

    let engine = fx.engine(vec![face(vec![0.9, 0.1], 5), face(vec![0.1, 0.9], 100)]);
    let enrolled = engine.enroll(&photo, &now()).unwrap();

    assert_eq!(enrolled.student_key, "student_17");
    assert_eq!(enrolled.faces_detected, 2);
    assert_eq!(enrolled.location.left, 5);
    let stored = fx.store.load(&enrolled.embedding_path).unwrap().unwrap();
    assert_eq!(stored.values, vec![0.9, 0.1]);
    assert_eq!(engine.embeddings_count().unwrap(), 1);
}

#[test]
fn enroll_without_face_is_rejected() {
    let fx = Fixture::new();
    let err = fx.engine(vec![]).enroll(&fx.photo, &now()).unwrap_err();
    assert!(matches!(err, AttendanceError::NoFaceDetected));
    assert_eq!(fx.store.count("student_").unwrap(), 0);
}
