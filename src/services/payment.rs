//! Payment step for a booking.
//!
//! `initializing → awaiting_gateway → processing → succeeded | failed`.
//! Each attempt lives in [`PaymentRegistry`] keyed by user and booking; all
//! moves go through the transition methods on [`PaymentState`], so an
//! out-of-order callback is rejected instead of reaching the backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::booking::same_amount;
use crate::models::{
    BookingStatus, CreateOrderRequest, GatewayFailure, GatewayOrder, GatewaySuccess,
    PaymentOrder, Session, VerifyPaymentRequest,
};
use crate::services::api::ApiError;
use crate::services::checkout::{checkout_options, CheckoutOptions};
use crate::services::rental::RentalApi;
use crate::state::AppState;

pub const BOOKINGS_PAGE: &str = "/bookings";
pub const VERIFICATION_FAILED: &str = "Payment verification failed";
pub const GATEWAY_FAILED: &str = "Payment failed";

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentState {
    Initializing,
    AwaitingGateway {
        order: GatewayOrder,
        payment_id: String,
    },
    Processing {
        order_id: String,
        payment_id: String,
    },
    Succeeded,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("a payment order is already being created for this booking")]
    OrderInFlight,

    #[error("payment is already being verified")]
    VerificationInFlight,

    #[error("this booking has already been paid")]
    AlreadyPaid,

    #[error("no checkout is open for this booking")]
    NoOpenCheckout,

    #[error("gateway order does not match the open checkout")]
    OrderMismatch,
}

impl PaymentState {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentState::Initializing => "initializing",
            PaymentState::AwaitingGateway { .. } => "awaiting_gateway",
            PaymentState::Processing { .. } => "processing",
            PaymentState::Succeeded => "succeeded",
            PaymentState::Failed { .. } => "failed",
        }
    }

    /// Entering the payment step. A failed attempt or an abandoned checkout
    /// may start over with a fresh order.
    pub fn begin(current: Option<&PaymentState>) -> Result<PaymentState, TransitionError> {
        match current {
            None | Some(PaymentState::AwaitingGateway { .. }) | Some(PaymentState::Failed { .. }) => {
                Ok(PaymentState::Initializing)
            }
            Some(other) => Err(other.rejection()),
        }
    }

    pub fn order_created(&self, order: PaymentOrder) -> Result<PaymentState, TransitionError> {
        match self {
            PaymentState::Initializing => Ok(PaymentState::AwaitingGateway {
                order: order.order,
                payment_id: order.payment.id,
            }),
            other => Err(other.rejection()),
        }
    }

    pub fn order_failed(&self, message: String) -> Result<PaymentState, TransitionError> {
        match self {
            PaymentState::Initializing => Ok(PaymentState::Failed { message }),
            other => Err(other.rejection()),
        }
    }

    /// Gateway success handler fired. Yields the verification request to send.
    pub fn gateway_succeeded(
        &self,
        payload: &GatewaySuccess,
    ) -> Result<(PaymentState, VerifyPaymentRequest), TransitionError> {
        match self {
            PaymentState::AwaitingGateway { order, payment_id } => {
                if payload.razorpay_order_id != order.id {
                    return Err(TransitionError::OrderMismatch);
                }
                let request = VerifyPaymentRequest {
                    razorpay_order_id: payload.razorpay_order_id.clone(),
                    razorpay_payment_id: payload.razorpay_payment_id.clone(),
                    razorpay_signature: payload.razorpay_signature.clone(),
                    payment_id: payment_id.clone(),
                };
                let next = PaymentState::Processing {
                    order_id: order.id.clone(),
                    payment_id: payment_id.clone(),
                };
                Ok((next, request))
            }
            other => Err(other.rejection()),
        }
    }

    pub fn gateway_failed(&self, description: Option<String>) -> Result<PaymentState, TransitionError> {
        match self {
            PaymentState::AwaitingGateway { .. } => Ok(PaymentState::Failed {
                message: description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| GATEWAY_FAILED.to_string()),
            }),
            other => Err(other.rejection()),
        }
    }

    pub fn verification_finished(
        &self,
        outcome: Result<(), String>,
    ) -> Result<PaymentState, TransitionError> {
        match self {
            PaymentState::Processing { .. } => Ok(match outcome {
                Ok(()) => PaymentState::Succeeded,
                Err(message) => PaymentState::Failed { message },
            }),
            other => Err(other.rejection()),
        }
    }

    /// Whether the pay control is usable in this state.
    pub fn pay_enabled(&self) -> bool {
        matches!(
            self,
            PaymentState::AwaitingGateway { .. } | PaymentState::Failed { .. }
        )
    }

    fn rejection(&self) -> TransitionError {
        match self {
            PaymentState::Initializing => TransitionError::OrderInFlight,
            PaymentState::Processing { .. } => TransitionError::VerificationInFlight,
            PaymentState::Succeeded => TransitionError::AlreadyPaid,
            PaymentState::AwaitingGateway { .. } | PaymentState::Failed { .. } => {
                TransitionError::NoOpenCheckout
            }
        }
    }
}

type AttemptKey = (String, String);

/// Attempts untouched for this long are forgotten by [`PaymentRegistry::sweep_idle`].
pub const ATTEMPT_IDLE_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

struct Attempt {
    state: PaymentState,
    touched: Instant,
}

#[derive(Default)]
pub struct PaymentRegistry {
    attempts: Mutex<HashMap<AttemptKey, Attempt>>,
}

impl PaymentRegistry {
    pub fn get(&self, user_id: &str, booking_id: &str) -> Option<PaymentState> {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .get(&(user_id.to_string(), booking_id.to_string()))
            .map(|attempt| attempt.state.clone())
    }

    /// Like [`get`](Self::get), but a succeeded attempt is dropped once read.
    pub fn observe(&self, user_id: &str, booking_id: &str) -> Option<PaymentState> {
        let key = (user_id.to_string(), booking_id.to_string());
        let mut attempts = self.attempts.lock().unwrap();
        let state = attempts.get(&key)?.state.clone();
        if state == PaymentState::Succeeded {
            attempts.remove(&key);
            tracing::debug!(booking_id, "forgot settled payment attempt");
        }
        Some(state)
    }

    /// Applies one transition under the lock, so two callbacks racing for
    /// the same attempt cannot both succeed.
    pub fn update<T, F>(
        &self,
        user_id: &str,
        booking_id: &str,
        transition: F,
    ) -> Result<(PaymentState, T), TransitionError>
    where
        F: FnOnce(Option<&PaymentState>) -> Result<(PaymentState, T), TransitionError>,
    {
        let key = (user_id.to_string(), booking_id.to_string());
        let mut attempts = self.attempts.lock().unwrap();
        let (next, extra) = transition(attempts.get(&key).map(|attempt| &attempt.state))?;
        tracing::debug!(booking_id, state = next.name(), "payment state changed");
        attempts.insert(
            key,
            Attempt {
                state: next.clone(),
                touched: Instant::now(),
            },
        );
        Ok((next, extra))
    }

    /// Drops attempts idle for at least `max_idle`. Attempts still being
    /// verified are kept, so a late callback cannot start a second verification.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        let before = attempts.len();
        attempts.retain(|_, attempt| {
            matches!(attempt.state, PaymentState::Processing { .. })
                || attempt.touched.elapsed() < max_idle
        });
        before - attempts.len()
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Navigation state the payment page was opened with.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntry {
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub booking_id: String,
    pub state: &'static str,
    pub pay_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_after_ms: Option<u64>,
}

impl PaymentView {
    pub fn new(app: &AppState, session: &Session, booking_id: &str, state: &PaymentState) -> Self {
        let mut view = Self {
            booking_id: booking_id.to_string(),
            state: state.name(),
            pay_enabled: state.pay_enabled(),
            message: None,
            checkout: None,
            redirect_to: None,
            redirect_after_ms: None,
        };
        match state {
            PaymentState::AwaitingGateway { order, .. } => {
                view.checkout = Some(checkout_options(
                    &app.config,
                    order,
                    booking_id,
                    &session.user_name,
                ));
            }
            PaymentState::Succeeded => {
                view.message = Some("Payment successful".to_string());
                view.redirect_to = Some(BOOKINGS_PAGE);
                view.redirect_after_ms = Some(app.config.payment_redirect_delay_ms);
            }
            PaymentState::Failed { message } => view.message = Some(message.clone()),
            PaymentState::Initializing | PaymentState::Processing { .. } => {}
        }
        view
    }
}

pub enum Begin {
    /// Opened without a booking to pay for; go back to the bookings list.
    Redirect,
    Started(PaymentView),
}

/// `initializing`: checks the handoff and asks the backend for an order.
pub async fn begin_payment(
    app: &AppState,
    session: &Session,
    entry: PaymentEntry,
) -> Result<Begin, AppError> {
    let booking_id = entry.booking_id.filter(|id| !id.trim().is_empty());
    let (Some(booking_id), Some(amount)) = (booking_id, entry.amount) else {
        tracing::info!(user_id = %session.user_id, "payment step opened without a booking, redirecting");
        return Ok(Begin::Redirect);
    };

    // Reject early, before any backend call, if an attempt is already under way.
    PaymentState::begin(app.payments.get(&session.user_id, &booking_id).as_ref())?;

    let credentials = app.credentials(session);
    let api = app.rental_api(&credentials);

    let expected = expected_total(app, &api, session, &booking_id).await?;
    if !same_amount(expected, amount) {
        tracing::warn!(%booking_id, amount, expected, "payment amount does not match booking total");
        return Err(AppError::Precondition(
            "Payment amount does not match the booking total.".to_string(),
        ));
    }

    app.payments.update(&session.user_id, &booking_id, |current| {
        PaymentState::begin(current).map(|next| (next, ()))
    })?;

    let request = CreateOrderRequest {
        booking_id: booking_id.clone(),
        amount: expected,
    };
    let order = api.create_payment_order(&request).await;

    let (state, ()) = app.payments.update(&session.user_id, &booking_id, |current| {
        let current = current.ok_or(TransitionError::NoOpenCheckout)?;
        let next = match &order {
            Ok(order) => current.order_created(order.clone())?,
            Err(e) => current.order_failed(e.user_message())?,
        };
        Ok((next, ()))
    })?;

    match order {
        Ok(order) => tracing::info!(%booking_id, order_id = %order.order.id, "payment order created"),
        Err(ApiError::SessionExpired) => return Err(ApiError::SessionExpired.into()),
        Err(e) => tracing::warn!(%booking_id, error = %e, "payment order creation failed"),
    }

    Ok(Begin::Started(PaymentView::new(app, session, &booking_id, &state)))
}

/// `processing`: the overlay reported success; verify the signed payload once.
pub async fn complete_payment(
    app: &AppState,
    session: &Session,
    booking_id: &str,
    payload: GatewaySuccess,
) -> Result<PaymentView, AppError> {
    let (_, request) = app.payments.update(&session.user_id, booking_id, |current| {
        current
            .ok_or(TransitionError::NoOpenCheckout)?
            .gateway_succeeded(&payload)
    })?;

    let credentials = app.credentials(session);
    let api = app.rental_api(&credentials);

    let outcome = match api.verify_payment(&request).await {
        Ok(resp) if resp.success => Ok(()),
        Ok(resp) => Err(resp
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| VERIFICATION_FAILED.to_string())),
        Err(e) => Err(e.user_message_or(VERIFICATION_FAILED)),
    };

    match &outcome {
        Ok(()) => tracing::info!(booking_id, payment_id = %request.payment_id, "payment verified"),
        Err(message) => tracing::warn!(booking_id, payment_id = %request.payment_id, %message, "payment verification failed"),
    }

    let (state, ()) = app.payments.update(&session.user_id, booking_id, |current| {
        current
            .ok_or(TransitionError::NoOpenCheckout)?
            .verification_finished(outcome)
            .map(|next| (next, ()))
    })?;

    Ok(PaymentView::new(app, session, booking_id, &state))
}

/// The overlay's failure handler fired.
pub fn fail_payment(
    app: &AppState,
    session: &Session,
    booking_id: &str,
    failure: GatewayFailure,
) -> Result<PaymentView, AppError> {
    let (state, ()) = app.payments.update(&session.user_id, booking_id, |current| {
        current
            .ok_or(TransitionError::NoOpenCheckout)?
            .gateway_failed(failure.description)
            .map(|next| (next, ()))
    })?;

    tracing::info!(booking_id, state = state.name(), "checkout reported failure");
    Ok(PaymentView::new(app, session, booking_id, &state))
}

pub fn payment_status(
    app: &AppState,
    session: &Session,
    booking_id: &str,
) -> Result<PaymentView, AppError> {
    let state = app
        .payments
        .observe(&session.user_id, booking_id)
        .ok_or_else(|| AppError::NotFound(format!("no payment for booking {booking_id}")))?;
    Ok(PaymentView::new(app, session, booking_id, &state))
}

/// The total the order must be created for: the one recorded when the
/// booking was made, or the booking's own total if none was recorded.
/// Either way the booking must still be awaiting payment.
async fn expected_total(
    app: &AppState,
    api: &RentalApi<'_>,
    session: &Session,
    booking_id: &str,
) -> Result<f64, AppError> {
    let booking = api.get_booking(booking_id).await?;
    if booking.status != BookingStatus::PendingPayment {
        return Err(AppError::Precondition(format!(
            "Booking is {} and cannot be paid.",
            booking.status.label().to_lowercase()
        )));
    }

    let db = app.db.lock().unwrap();
    if let Some(total) = queries::get_quoted_total(&db, booking_id)? {
        return Ok(total);
    }
    let total = booking.price_breakdown.total_payable;
    queries::record_quoted_total(&db, booking_id, &session.id, total)?;
    Ok(total)
}
