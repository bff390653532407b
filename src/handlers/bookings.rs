use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::availability::deserialize_optional_input_datetime;
use crate::models::{BookingStatus, BookingType};
use crate::services::booking::{self, PaymentHandoff};
use crate::services::quote::{self, BookingDraft, DraftView, Place};
use crate::services::transitions::{booking_rows, BookingRow};
use crate::state::{AppState, DraftKey};

use super::authenticate;

/// The booking form as currently filled in. Missing dates mean the input is empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DraftForm {
    pub pickup: Place,
    pub dropoff: Place,
    #[serde(deserialize_with = "deserialize_optional_input_datetime")]
    pub pickup_date_time: Option<NaiveDateTime>,
    #[serde(deserialize_with = "deserialize_optional_input_datetime")]
    pub dropoff_date_time: Option<NaiveDateTime>,
    pub booking_type: Option<BookingType>,
    pub driver_id: Option<String>,
    pub promo_code: Option<String>,
    /// Check availability again for unchanged dates.
    pub recheck: bool,
}

// PUT /api/vehicles/:vehicle_id/draft
pub async fn update_draft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vehicle_id): Path<String>,
    Json(form): Json<DraftForm>,
) -> Result<Json<DraftView>, AppError> {
    let session = authenticate(&state, &headers)?;
    let key = (session.id.clone(), vehicle_id.clone());

    let pending = {
        let mut drafts = state.drafts.lock().unwrap();
        let draft = drafts
            .entry(key.clone())
            .or_insert_with(|| BookingDraft::new(vehicle_id.clone()));

        draft.pickup = form.pickup;
        draft.dropoff = form.dropoff;
        draft.booking_type = form.booking_type.unwrap_or(BookingType::SelfDrive);
        draft.driver_id = form.driver_id;
        draft.promo_code = form.promo_code;

        if draft.set_dates(form.pickup_date_time, form.dropoff_date_time) {
            tracing::debug!(%vehicle_id, generation = draft.generation(), "draft dates changed");
        } else if form.recheck {
            draft.recheck();
        }
        draft.pending_query()
    };

    if let Some((generation, query)) = pending {
        let credentials = state.credentials(&session);
        let api = state.rental_api(&credentials);
        let resolution = quote::resolve(&api, &query).await?;

        let mut drafts = state.drafts.lock().unwrap();
        if let Some(draft) = drafts.get_mut(&key) {
            draft.apply_quote(generation, resolution.availability, resolution.price);
        }
    }

    let drafts = state.drafts.lock().unwrap();
    drafts
        .get(&key)
        .map(|draft| Json(draft.view()))
        .ok_or_else(|| AppError::NotFound(format!("no booking draft for vehicle {vehicle_id}")))
}

// GET /api/vehicles/:vehicle_id/draft
pub async fn get_draft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vehicle_id): Path<String>,
) -> Result<Json<DraftView>, AppError> {
    let session = authenticate(&state, &headers)?;

    let drafts = state.drafts.lock().unwrap();
    drafts
        .get(&(session.id, vehicle_id.clone()))
        .map(|draft| Json(draft.view()))
        .ok_or_else(|| AppError::NotFound(format!("no booking draft for vehicle {vehicle_id}")))
}

/// Releases a draft claimed for submission when the request ends without
/// creating a booking, including when the client goes away mid-request.
struct Submission<'a> {
    drafts: &'a Mutex<HashMap<DraftKey, BookingDraft>>,
    key: DraftKey,
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        if let Ok(mut drafts) = self.drafts.lock() {
            if let Some(draft) = drafts.get_mut(&self.key) {
                draft.set_submitting(false);
            }
        }
    }
}

// POST /api/vehicles/:vehicle_id/book
pub async fn book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vehicle_id): Path<String>,
) -> Result<Json<PaymentHandoff>, AppError> {
    let session = authenticate(&state, &headers)?;
    let key = (session.id.clone(), vehicle_id);

    let request = {
        let mut drafts = state.drafts.lock().unwrap();
        let draft = drafts.get_mut(&key).ok_or_else(|| {
            AppError::Precondition("Select dates and check availability first.".to_string())
        })?;
        if draft.submitting() {
            return Err(AppError::Conflict(
                "This booking is already being submitted.".to_string(),
            ));
        }
        let request = draft.booking_request().map_err(AppError::Precondition)?;
        draft.set_submitting(true);
        request
    };
    let _submission = Submission {
        drafts: &state.drafts,
        key: key.clone(),
    };

    let credentials = state.credentials(&session);
    let api = state.rental_api(&credentials);
    let created = booking::create_booking(&api, &request).await?;

    state.drafts.lock().unwrap().remove(&key);
    {
        let db = state.db.lock().unwrap();
        queries::record_quoted_total(
            &db,
            &created.id,
            &session.id,
            created.price_breakdown.total_payable,
        )?;
    }

    Ok(Json(PaymentHandoff::from_booking(created)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

impl ListQuery {
    pub fn status(&self) -> Result<Option<BookingStatus>, AppError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(None),
            Some(s) => BookingStatus::parse(s)
                .map(Some)
                .ok_or_else(|| AppError::BadRequest(format!("unknown booking status: {s}"))),
        }
    }
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BookingRow>>, AppError> {
    let session = authenticate(&state, &headers)?;
    let status = query.status()?;

    let credentials = state.credentials(&session);
    let bookings = state.rental_api(&credentials).list_bookings(status).await?;

    Ok(Json(booking_rows(bookings, session.role)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingRow>, AppError> {
    let session = authenticate(&state, &headers)?;

    let credentials = state.credentials(&session);
    let booking = state.rental_api(&credentials).get_booking(&id).await?;

    Ok(Json(BookingRow::new(booking, session.role)))
}
