use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{BookingStatus, Role, Session};
use crate::services::transitions::{booking_rows, check_transition, BookingRow};
use crate::state::AppState;

use super::authenticate;
use super::bookings::ListQuery;

fn require_staff(session: &Session) -> Result<(), AppError> {
    match session.role {
        Role::Vendor | Role::Admin => Ok(()),
        Role::Customer => Err(AppError::Forbidden(
            "The dashboard is for vendors and admins.".to_string(),
        )),
    }
}

// GET /api/dashboard/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BookingRow>>, AppError> {
    let session = authenticate(&state, &headers)?;
    require_staff(&session)?;
    let status = query.status()?;

    let credentials = state.credentials(&session);
    let bookings = state.rental_api(&credentials).list_bookings(status).await?;

    Ok(Json(booking_rows(bookings, session.role)))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: BookingStatus,
    /// Status the row showed when the action was clicked.
    #[serde(default)]
    pub from: Option<BookingStatus>,
}

#[derive(Serialize)]
pub struct StatusChangeResponse {
    booking: BookingRow,
    bookings: Vec<BookingRow>,
}

// PATCH /api/dashboard/bookings/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
    Json(change): Json<StatusChange>,
) -> Result<Json<StatusChangeResponse>, AppError> {
    let session = authenticate(&state, &headers)?;
    require_staff(&session)?;
    check_transition(session.role, change.from, change.status)?;
    let filter = query.status()?;

    let credentials = state.credentials(&session);
    let api = state.rental_api(&credentials);

    let updated = api.update_booking_status(&id, change.status).await?;
    tracing::info!(
        booking_id = %id,
        role = session.role.as_str(),
        status = updated.status.as_str(),
        "booking status updated"
    );

    // The list is re-read rather than patched locally.
    let bookings = api.list_bookings(filter).await?;

    Ok(Json(StatusChangeResponse {
        booking: BookingRow::new(updated, session.role),
        bookings: booking_rows(bookings, session.role),
    }))
}
