use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{LoginRequest, Role};
use crate::services::session::new_session;
use crate::state::AppState;

use super::authenticate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    session_id: String,
    user_id: String,
    name: String,
    role: Role,
    expires_at: String,
}

// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest(
            "Email and password are required.".to_string(),
        ));
    }

    let login = state.anonymous_api().login(&body).await?;
    let session = new_session(login, state.config.session_ttl_hours);

    state.purge_expired_sessions()?;
    {
        let db = state.db.lock().unwrap();
        queries::create_session(&db, &session)?;
    }

    tracing::info!(user_id = %session.user_id, role = session.role.as_str(), "user logged in");

    Ok(Json(LoginResponse {
        session_id: session.id,
        user_id: session.user_id,
        name: session.user_name,
        role: session.role,
        expires_at: session.expires_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }))
}

// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let session = authenticate(&state, &headers)?;

    {
        let db = state.db.lock().unwrap();
        queries::delete_session(&db, &session.id)?;
    }
    state
        .drafts
        .lock()
        .unwrap()
        .retain(|(session_id, _), _| session_id != &session.id);

    tracing::info!(user_id = %session.user_id, "user logged out");
    Ok(Json(json!({ "success": true })))
}
