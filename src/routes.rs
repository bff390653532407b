use std::sync::Arc;

use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route(
            "/api/vehicles/:vehicle_id/draft",
            put(handlers::bookings::update_draft).get(handlers::bookings::get_draft),
        )
        .route(
            "/api/vehicles/:vehicle_id/book",
            post(handlers::bookings::book),
        )
        .route("/api/bookings", get(handlers::bookings::list_bookings))
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route("/payment", get(handlers::payments::payment_page))
        .route("/api/payments", post(handlers::payments::start_payment))
        .route(
            "/api/payments/:booking_id",
            get(handlers::payments::get_payment),
        )
        .route(
            "/api/payments/:booking_id/success",
            post(handlers::payments::gateway_success),
        )
        .route(
            "/api/payments/:booking_id/failure",
            post(handlers::payments::gateway_failure),
        )
        .route(
            "/api/dashboard/bookings",
            get(handlers::dashboard::list_bookings),
        )
        .route(
            "/api/dashboard/bookings/:id/status",
            patch(handlers::dashboard::update_status),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
