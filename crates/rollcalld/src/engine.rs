use rollcall_core::{
    Attendance, AttendanceError, EnrollOutcome, EnrollmentRecord, FaceExtractor,
    RecognitionOutcome, StoreError, ThresholdConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Recognition pipeline as run by the daemon.
pub type Engine = Attendance<Box<dyn FaceExtractor>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Clone-safe handle to the engine.
///
/// Every call runs on tokio's blocking pool: the pipeline shells out to the
/// extractor and does synchronous file I/O. Requests proceed independently.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Live threshold shared with every recognition call.
    pub fn threshold(&self) -> &ThresholdConfig {
        self.engine.threshold()
    }

    /// Extract the face in a student photo and store its embedding.
    pub async fn enroll(&self, image_path: PathBuf) -> Result<EnrollOutcome, EngineError> {
        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || {
            engine.enroll(&image_path, &chrono::Local::now())
        })
        .await??;
        Ok(outcome)
    }

    /// Recognize the faces in a classroom photo against `roster`.
    pub async fn recognize(
        &self,
        image_path: PathBuf,
        roster: Vec<EnrollmentRecord>,
    ) -> Result<RecognitionOutcome, EngineError> {
        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || {
            engine.recognize(&image_path, &roster, &chrono::Local::now())
        })
        .await??;
        Ok(outcome)
    }

    /// Number of enrolled student embeddings.
    pub async fn embeddings_count(&self) -> Result<usize, EngineError> {
        let engine = Arc::clone(&self.engine);
        let count = tokio::task::spawn_blocking(move || engine.embeddings_count()).await??;
        Ok(count)
    }
}
