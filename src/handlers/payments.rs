use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;

use crate::errors::AppError;
use crate::models::{GatewayFailure, GatewaySuccess};
use crate::services::payment::{self, Begin, PaymentEntry, PaymentView, BOOKINGS_PAGE};
use crate::state::AppState;

use super::authenticate;

static PAYMENT_HTML: &str = include_str!("../web/payment.html");

// GET /payment
pub async fn payment_page() -> Html<&'static str> {
    Html(PAYMENT_HTML)
}

// POST /api/payments
pub async fn start_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(entry): Json<PaymentEntry>,
) -> Result<Response, AppError> {
    let session = authenticate(&state, &headers)?;

    match payment::begin_payment(&state, &session, entry).await? {
        Begin::Redirect => Ok(Redirect::to(BOOKINGS_PAGE).into_response()),
        Begin::Started(view) => Ok(Json(view).into_response()),
    }
}

// POST /api/payments/:booking_id/success
pub async fn gateway_success(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    Json(payload): Json<GatewaySuccess>,
) -> Result<Json<PaymentView>, AppError> {
    let session = authenticate(&state, &headers)?;
    let view = payment::complete_payment(&state, &session, &booking_id, payload).await?;
    Ok(Json(view))
}

// POST /api/payments/:booking_id/failure
pub async fn gateway_failure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    Json(failure): Json<GatewayFailure>,
) -> Result<Json<PaymentView>, AppError> {
    let session = authenticate(&state, &headers)?;
    Ok(Json(payment::fail_payment(&state, &session, &booking_id, failure)?))
}

// GET /api/payments/:booking_id
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Json<PaymentView>, AppError> {
    let session = authenticate(&state, &headers)?;
    Ok(Json(payment::payment_status(&state, &session, &booking_id)?))
}
