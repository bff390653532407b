use serde::Deserialize;

use crate::models::{
    Availability, AvailabilityQuery, Booking, BookingStatus, CreateBookingRequest,
    CreateOrderRequest, LoginRequest, LoginResponse, PaymentOrder, PriceQuote, StatusUpdate,
    VerifyPaymentRequest, VerifyPaymentResponse,
};
use crate::services::api::{ApiClient, ApiError};

/// Typed wrappers over the rental backend endpoints.
pub struct RentalApi<'a> {
    client: ApiClient<'a>,
}

/// List endpoints answer either with a bare array or `{ "bookings": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BookingList {
    Bare(Vec<Booking>),
    Wrapped { bookings: Vec<Booking> },
}

impl<'a> RentalApi<'a> {
    pub fn new(client: ApiClient<'a>) -> Self {
        Self { client }
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.client.post("/auth/login", request).await
    }

    pub async fn check_availability(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Availability, ApiError> {
        self.client.post("/bookings/check-availability", query).await
    }

    pub async fn calculate_price(&self, query: &AvailabilityQuery) -> Result<PriceQuote, ApiError> {
        self.client.post("/bookings/calculate-price", query).await
    }

    pub async fn create_booking(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError> {
        self.client.post("/bookings", request).await
    }

    pub async fn get_booking(&self, id: &str) -> Result<Booking, ApiError> {
        self.client.get(&format!("/bookings/{id}")).await
    }

    pub async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, ApiError> {
        let path = match status {
            Some(status) => format!("/bookings?status={}", status.as_str()),
            None => "/bookings".to_string(),
        };
        let list: BookingList = self.client.get(&path).await?;
        Ok(match list {
            BookingList::Bare(bookings) | BookingList::Wrapped { bookings } => bookings,
        })
    }

    pub async fn update_booking_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<Booking, ApiError> {
        self.client
            .patch(&format!("/bookings/{id}/status"), &StatusUpdate { status })
            .await
    }

    pub async fn create_payment_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<PaymentOrder, ApiError> {
        self.client.post("/payments/create-order", request).await
    }

    pub async fn verify_payment(
        &self,
        request: &VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, ApiError> {
        self.client.post("/payments/verify", request).await
    }
}
