//! Boundary to the external face detection / embedding capability.
//!
//! rollcall never detects faces itself. An extractor turns an image on disk
//! into `(bounding box, embedding)` pairs; the order it reports them in is the
//! detection order every later rule refers to.

use crate::types::{BoundingBox, DetectedFace, Embedding};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("failed to launch extractor {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("malformed extractor output: {0}")]
    Malformed(String),
}

/// Image → detected faces.
pub trait FaceExtractor: Send + Sync {
    fn extract(&self, image_path: &Path) -> Result<Vec<DetectedFace>, ExtractorError>;
}

impl<T: FaceExtractor + ?Sized> FaceExtractor for Box<T> {
    fn extract(&self, image_path: &Path) -> Result<Vec<DetectedFace>, ExtractorError> {
        (**self).extract(image_path)
    }
}

/// Runs an external program once per image.
///
/// The program is invoked as `program [args...] <image_path>` and must print a
/// JSON array on stdout:
///
/// ```json
/// [{"location": [top, right, bottom, left], "embedding": [0.01, -0.2, ...]}]
/// ```
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl FaceExtractor for CommandExtractor {
    fn extract(&self, image_path: &Path) -> Result<Vec<DetectedFace>, ExtractorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces = parse_faces(&output.stdout)?;
        tracing::debug!(
            program = %self.program,
            image = %image_path.display(),
            faces = faces.len(),
            "extractor finished"
        );
        Ok(faces)
    }
}

#[derive(Deserialize)]
struct RawFace {
    location: [i32; 4],
    embedding: Vec<f32>,
}

/// Decode extractor stdout into detected faces, preserving order.
pub fn parse_faces(stdout: &[u8]) -> Result<Vec<DetectedFace>, ExtractorError> {
    let raw: Vec<RawFace> =
        serde_json::from_slice(stdout).map_err(|e| ExtractorError::Malformed(e.to_string()))?;

    raw.into_iter()
        .enumerate()
        .map(|(i, face)| {
            let location = BoundingBox::from(face.location);
            if !location.is_valid() {
                return Err(ExtractorError::Malformed(format!(
                    "face {i} has an empty bounding box {:?}",
                    face.location
                )));
            }
            if face.embedding.is_empty() {
                return Err(ExtractorError::Malformed(format!("face {i} has no embedding")));
            }
            Ok(DetectedFace {
                location,
                embedding: Embedding::new(face.embedding),
            })
        })
        .collect()
}
