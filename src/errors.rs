use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::services::api::{ApiError, GENERIC_ERROR, LOGIN_PATH};
use crate::services::payment::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Payment(#[from] TransitionError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, redirect) = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR.to_string(), None)
            }
            AppError::Api(ApiError::SessionExpired) | AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                Some(LOGIN_PATH),
            ),
            AppError::Api(ApiError::Backend { status, .. }) => {
                // Client errors pass through; anything else is the backend failing us.
                let status = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (status, self.to_string(), None)
            }
            AppError::Api(e) => {
                tracing::error!(error = %e, "backend unreachable");
                (StatusCode::BAD_GATEWAY, e.user_message(), None)
            }
            AppError::Payment(e) => (StatusCode::CONFLICT, e.to_string(), None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string(), None),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),
            AppError::Precondition(_) => {
                (StatusCode::PRECONDITION_FAILED, self.to_string(), None)
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string(), None),
        };

        let body = match redirect {
            Some(to) => serde_json::json!({ "error": message, "redirect": to }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}
