//! HTTP surface of the daemon.
//!
//! | Method | Path                  | Purpose                               |
//! |--------|-----------------------|---------------------------------------|
//! | GET    | `/health`             | liveness and enrolled-embedding count |
//! | POST   | `/generate-embedding` | enroll a student photo                |
//! | POST   | `/recognize-faces`    | attendance from a classroom photo     |
//! | POST   | `/update-threshold`   | change the acceptance cutoff          |

use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{AttendanceError, EnrollmentRecord, RecognitionOutcome, StudentId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
}

impl AppState {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate-embedding", post(generate_embedding))
        .route("/recognize-faces", post(recognize_faces))
        .route("/update-threshold", post(update_threshold))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Failure shape shared by the enrollment and recognition endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// Caller-side problem, reported verbatim with 400.
    BadRequest(String),
    /// Anything else. Details are logged, the caller only gets a reference id.
    Internal(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Attendance(
                e @ (AttendanceError::ImageNotFound(_) | AttendanceError::NoFaceDetected),
            ) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(err) => {
                let reference = Uuid::new_v4();
                tracing::error!(%reference, error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("internal error (ref {reference})"),
                )
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    embeddings_count: usize,
    threshold: f32,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let embeddings_count = state.engine.embeddings_count().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        message: "Face recognition engine is running",
        embeddings_count,
        threshold: state.engine.threshold().current(),
    }))
}

#[derive(Deserialize)]
struct GenerateEmbeddingRequest {
    #[serde(default)]
    image_path: Option<String>,
}

#[derive(Serialize)]
struct GenerateEmbeddingResponse {
    success: bool,
    embedding_path: String,
    message: &'static str,
}

async fn generate_embedding(
    State(state): State<AppState>,
    payload: Result<Json<GenerateEmbeddingRequest>, JsonRejection>,
) -> Result<Json<GenerateEmbeddingResponse>, ApiError> {
    let Json(request) = payload?;
    let image_path = required_path(request.image_path)?;

    let outcome = state.engine.enroll(image_path).await?;

    Ok(Json(GenerateEmbeddingResponse {
        success: true,
        embedding_path: outcome.embedding_path.display().to_string(),
        message: "Face embedding generated successfully",
    }))
}

#[derive(Deserialize)]
struct RecognizeRequest {
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    students: Option<Vec<EnrollmentRecord>>,
}

#[derive(Serialize)]
struct RecognizeResponse {
    success: bool,
    recognized_students: Vec<RecognizedStudent>,
    unknown_faces: Vec<UnknownFaceEntry>,
    total_faces: usize,
}

#[derive(Serialize)]
struct RecognizedStudent {
    student_id: StudentId,
    confidence: f32,
    face_location: [i32; 4],
}

#[derive(Serialize)]
struct UnknownFaceEntry {
    face_location: [i32; 4],
    face_image_path: String,
    embedding_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    best_confidence: Option<f32>,
}

impl From<RecognitionOutcome> for RecognizeResponse {
    fn from(outcome: RecognitionOutcome) -> Self {
        Self {
            success: true,
            recognized_students: outcome
                .matches
                .into_iter()
                .map(|m| RecognizedStudent {
                    student_id: m.student_id,
                    confidence: m.confidence,
                    face_location: m.location.as_array(),
                })
                .collect(),
            unknown_faces: outcome
                .unknown_faces
                .into_iter()
                .map(|u| UnknownFaceEntry {
                    face_location: u.location.as_array(),
                    face_image_path: u.face_image_path,
                    embedding_path: u.embedding_path.display().to_string(),
                    best_confidence: u.best_confidence,
                })
                .collect(),
            total_faces: outcome.total_faces,
        }
    }
}

async fn recognize_faces(
    State(state): State<AppState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let Json(request) = payload?;
    let image_path = required_path(request.image_path)?;
    let students = request
        .students
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("students list required".into()))?;

    let outcome = state.engine.recognize(image_path, students).await?;
    Ok(Json(outcome.into()))
}

#[derive(Deserialize)]
struct UpdateThresholdRequest {
    #[serde(default)]
    threshold: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct UpdateThresholdResponse {
    success: bool,
    threshold: f32,
    message: &'static str,
}

const THRESHOLD_RANGE_MESSAGE: &str = "Threshold must be between 0 and 1";

async fn update_threshold(
    State(state): State<AppState>,
    payload: Result<Json<UpdateThresholdRequest>, JsonRejection>,
) -> Response {
    let requested = payload
        .ok()
        .and_then(|Json(request)| request.threshold)
        .and_then(|value| value.as_f64());

    let Some(value) = requested else {
        return threshold_rejected();
    };

    match state.engine.threshold().update_f64(value) {
        Ok(_) => Json(UpdateThresholdResponse {
            success: true,
            threshold: state.engine.threshold().current(),
            message: "Threshold updated successfully",
        })
        .into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "threshold update rejected");
            threshold_rejected()
        }
    }
}

fn threshold_rejected() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": THRESHOLD_RANGE_MESSAGE })),
    )
        .into_response()
}

fn required_path(value: Option<String>) -> Result<PathBuf, ApiError> {
    value
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| ApiError::BadRequest("image_path required".into()))
}
