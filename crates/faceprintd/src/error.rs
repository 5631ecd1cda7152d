use crate::engine::EngineError;
use crate::store::StoreError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request failures, rendered as `{"success": false, "message": ...}`.
///
/// Negative recognition results are not errors and never pass through here.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(message) => tracing::error!(%status, reason = %message, "request failed"),
            Self::Validation(message) | Self::NotFound(message) => {
                tracing::warn!(%status, reason = %message, "request rejected")
            }
        }

        let body = json!({ "success": false, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound("Face data not found".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceprint_core::UserId;

    #[test]
    fn test_store_errors_map_to_status() {
        let not_found: ApiError = StoreError::NotFound(UserId::Number(1)).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.to_string(), "Face data not found");

        let io: ApiError = StoreError::Io {
            op: "reading",
            path: "face_data/user_1.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(io.to_string().contains("user_1.json"));
    }

    #[test]
    fn test_engine_errors_are_internal() {
        let err: ApiError = EngineError::ChannelClosed.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
