//! HTTP surface: register, recognize, delete, health.

use crate::engine::{EngineHandle, Encoded};
use crate::error::ApiError;
use crate::store::{remove_if_exists, FaceStore};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use faceprint_core::{Embedding, MatchOutcome, Matcher, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "Face Recognition API";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FaceStore>,
    pub engine: EngineHandle,
    pub matcher: Arc<dyn Matcher>,
    /// Maximum distance accepted as a match.
    pub threshold: f64,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/face/register", post(register))
        .route("/api/face/recognize", post(recognize))
        .route("/api/face/delete/:user_id", delete(delete_face))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    user_id: Option<UserId>,
    image: Option<String>,
}

#[derive(Deserialize)]
struct RecognizeRequest {
    image: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    message: &'static str,
    user_id: UserId,
    embedding: Embedding,
    photo_url: String,
}

/// Recognition answer. Optional fields are omitted when absent.
#[derive(Serialize, Default)]
struct RecognizeResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    best_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<f64>,
}

impl RecognizeResponse {
    fn negative(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    registered_users: usize,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(req) = payload?;
    let (Some(user_id), Some(image)) = (req.user_id, non_empty(req.image)) else {
        return Err(ApiError::Validation("Missing user_id or image".into()));
    };

    let Encoded { image, embeddings } = state.engine.encode(image).await?;
    tracing::info!(%user_id, faces = embeddings.len(), "register: faces detected");

    let mut embeddings = embeddings.into_iter();
    let embedding = match (embeddings.next(), embeddings.next()) {
        (None, _) => return Err(ApiError::Validation("No face detected in image".into())),
        (Some(_), Some(_)) => {
            return Err(ApiError::Validation(
                "Multiple faces detected. Please use image with single face".into(),
            ))
        }
        (Some(embedding), None) => embedding,
    };

    let photo_path = state.store.save_photo(&user_id, image).await?;
    let record = match state.store.put(&user_id, embedding, &photo_path).await {
        Ok(record) => record,
        Err(err) => {
            remove_if_exists(&photo_path).await;
            return Err(err.into());
        }
    };

    Ok(Json(RegisterResponse {
        success: true,
        message: "Face registered successfully",
        user_id: record.user_id,
        embedding: record.embedding,
        photo_url: record.photo_path.to_string_lossy().into_owned(),
    }))
}

async fn recognize(
    State(state): State<AppState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let Json(req) = payload?;
    let Some(image) = non_empty(req.image) else {
        return Err(ApiError::Validation("Missing image".into()));
    };

    let Encoded { embeddings, .. } = state.engine.encode(image).await?;
    tracing::info!(faces = embeddings.len(), "recognize: faces detected");
    if embeddings.len() > 1 {
        // Registration rejects this case; recognition takes the most confident face.
        tracing::warn!(faces = embeddings.len(), "recognize: several faces, using the first");
    }
    let Some(probe) = embeddings.into_iter().next() else {
        return Ok(Json(RecognizeResponse::negative("No face detected")));
    };

    let candidates = state.store.get_all().await?;
    tracing::info!(candidates = candidates.len(), "recognize: comparing against registered faces");

    let response = match state.matcher.identify(&probe, &candidates, state.threshold) {
        MatchOutcome::NoCandidates => RecognizeResponse::negative("No registered faces in database"),
        MatchOutcome::Matched {
            user_id,
            confidence,
            distance,
        } => {
            let record = state.store.get(&user_id).await?.ok_or_else(|| {
                ApiError::Internal(format!("face record for user {user_id} vanished during recognition"))
            })?;
            tracing::info!(%user_id, distance, confidence, threshold = state.threshold, "recognize: matched");

            RecognizeResponse {
                success: true,
                message: "Face recognized".into(),
                user_id: Some(user_id),
                confidence: Some(round2(confidence)),
                matched_photo: Some(record.photo_path.to_string_lossy().into_owned()),
                distance: Some(distance),
                ..Default::default()
            }
        }
        MatchOutcome::NotMatched {
            confidence,
            distance,
            threshold,
        } => {
            tracing::info!(distance, confidence, threshold, "recognize: no match within threshold");
            let confidence = round2(confidence);
            RecognizeResponse {
                message: format!("Face not recognized (confidence: {confidence:?}%)"),
                confidence: Some(confidence),
                best_distance: Some(distance),
                threshold: Some(threshold),
                ..Default::default()
            }
        }
    };

    Ok(Json(response))
}

async fn delete_face(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = UserId::parse(&raw_id).map_err(|e| ApiError::Validation(e.to_string()))?;
    state.store.delete(&user_id).await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Face data deleted successfully",
    }))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        registered_users: state.store.count().await?,
    }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".into())
}
