use serde::Serialize;

use crate::models::{Booking, BookingStatus, CreateBookingRequest, PriceBreakdown};
use crate::services::api::ApiError;
use crate::services::rental::RentalApi;

pub const PAYMENT_PAGE: &str = "/payment";

/// What the booking page hands to the payment step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandoff {
    pub booking_id: String,
    pub booking_ref: Option<String>,
    pub amount: f64,
    pub status: BookingStatus,
    pub price_breakdown: PriceBreakdown,
    pub redirect: &'static str,
}

impl PaymentHandoff {
    pub fn from_booking(booking: Booking) -> Self {
        Self {
            amount: booking.price_breakdown.total_payable,
            booking_id: booking.id,
            booking_ref: booking.booking_ref,
            status: booking.status,
            price_breakdown: booking.price_breakdown,
            redirect: PAYMENT_PAGE,
        }
    }
}

/// Submits one booking. Errors are returned as-is for the form to show;
/// nothing is retried.
pub async fn create_booking(
    api: &RentalApi<'_>,
    request: &CreateBookingRequest,
) -> Result<Booking, ApiError> {
    let booking = api.create_booking(request).await?;

    if booking.status != BookingStatus::PendingPayment {
        tracing::warn!(
            booking_id = %booking.id,
            status = booking.status.as_str(),
            "new booking is not awaiting payment"
        );
    }

    tracing::info!(
        booking_id = %booking.id,
        vehicle_id = %request.vehicle_id,
        total = booking.price_breakdown.total_payable,
        "booking created"
    );

    Ok(booking)
}
