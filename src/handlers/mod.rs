pub mod auth;
pub mod bookings;
pub mod dashboard;
pub mod health;
pub mod payments;

use axum::http::HeaderMap;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Session;
use crate::state::AppState;

/// Resolves the `Authorization: Bearer <session id>` header to a live session.
/// A session whose tokens were cleared after a failed refresh counts as logged out.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let session_id = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let session = {
        let db = state.db.lock().unwrap();
        queries::get_session(&db, session_id)?
    };
    session
        .filter(|s| s.access_token.is_some())
        .ok_or(AppError::Unauthorized)
}
