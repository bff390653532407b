//! Availability & pricing for a booking draft.
//!
//! A draft is the booking form for one vehicle. Every change of the pickup
//! or dropoff time bumps its generation; quotes are only accepted for the
//! generation they were requested for, and the Book Now gate opens only on
//! an `available: true` answer for the current generation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{
    Availability, AvailabilityQuery, BookingType, CreateBookingRequest, PriceBreakdown,
    StopRequest,
};
use crate::services::api::ApiError;
use crate::services::rental::RentalApi;

pub const UNAVAILABLE_NOTICE: &str = "This vehicle is not available for the selected dates.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub location_name: String,
}

#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub vehicle_id: String,
    pub pickup: Place,
    pub dropoff: Place,
    pub pickup_at: Option<NaiveDateTime>,
    pub dropoff_at: Option<NaiveDateTime>,
    pub booking_type: BookingType,
    pub driver_id: Option<String>,
    pub promo_code: Option<String>,
    generation: u64,
    quoted: Option<u64>,
    available: Option<bool>,
    price: Option<PriceBreakdown>,
    notice: Option<String>,
    submitting: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub vehicle_id: String,
    pub pickup_date_time: Option<NaiveDateTime>,
    pub dropoff_date_time: Option<NaiveDateTime>,
    pub available: Option<bool>,
    pub price_breakdown: Option<PriceBreakdown>,
    pub duration: Option<String>,
    pub error: Option<String>,
    pub book_enabled: bool,
}

impl BookingDraft {
    pub fn new(vehicle_id: String) -> Self {
        Self {
            vehicle_id,
            pickup: Place::default(),
            dropoff: Place::default(),
            pickup_at: None,
            dropoff_at: None,
            booking_type: BookingType::SelfDrive,
            driver_id: None,
            promo_code: None,
            generation: 0,
            quoted: None,
            available: None,
            price: None,
            notice: None,
            submitting: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Records new pickup/dropoff times. Returns true if either changed,
    /// in which case the previous quote no longer applies.
    pub fn set_dates(
        &mut self,
        pickup_at: Option<NaiveDateTime>,
        dropoff_at: Option<NaiveDateTime>,
    ) -> bool {
        if self.pickup_at == pickup_at && self.dropoff_at == dropoff_at {
            return false;
        }
        self.pickup_at = pickup_at;
        self.dropoff_at = dropoff_at;
        self.generation += 1;
        self.quoted = None;
        self.available = None;
        self.price = None;
        self.notice = None;
        true
    }

    /// Asks again for the current dates, e.g. after a failed check.
    /// Answers still in flight for the old generation will be dropped.
    pub fn recheck(&mut self) {
        self.generation += 1;
        self.quoted = None;
        self.available = None;
        self.notice = None;
    }

    /// The query still owed for the current dates, if both are set and no
    /// answer for them has been recorded yet.
    pub fn pending_query(&self) -> Option<(u64, AvailabilityQuery)> {
        if self.quoted == Some(self.generation) {
            return None;
        }
        let (pickup, dropoff) = (self.pickup_at?, self.dropoff_at?);
        Some((
            self.generation,
            AvailabilityQuery {
                vehicle_id: self.vehicle_id.clone(),
                pickup_date_time: pickup,
                dropoff_date_time: dropoff,
            },
        ))
    }

    /// Applies a resolver answer. Answers for an older generation are
    /// dropped; returns whether the answer was applied.
    pub fn apply_quote(
        &mut self,
        generation: u64,
        availability: Result<Availability, String>,
        price: Result<PriceBreakdown, String>,
    ) -> bool {
        if generation != self.generation {
            tracing::debug!(
                vehicle_id = %self.vehicle_id,
                stale = generation,
                current = self.generation,
                "dropping stale quote"
            );
            return false;
        }

        self.quoted = Some(generation);
        self.notice = None;

        match availability {
            Ok(availability) => {
                if !availability.available {
                    self.notice = Some(
                        availability
                            .message
                            .unwrap_or_else(|| UNAVAILABLE_NOTICE.to_string()),
                    );
                }
                self.available = Some(availability.available);
            }
            Err(message) => {
                self.available = None;
                self.notice = Some(message);
            }
        }

        match price {
            Ok(price) => self.price = Some(price),
            Err(message) => {
                self.price = None;
                if self.notice.is_none() {
                    self.notice = Some(message);
                }
            }
        }

        true
    }

    pub fn book_enabled(&self) -> bool {
        !self.submitting && self.quoted == Some(self.generation) && self.available == Some(true)
    }

    /// Whether a creation request for this draft is on its way to the backend.
    pub fn submitting(&self) -> bool {
        self.submitting
    }

    pub fn set_submitting(&mut self, submitting: bool) {
        self.submitting = submitting;
    }

    pub fn price(&self) -> Option<&PriceBreakdown> {
        self.price.as_ref()
    }

    /// The creation request for the current form, only while the gate is open.
    pub fn booking_request(&self) -> Result<CreateBookingRequest, String> {
        if !self.book_enabled() {
            return Err("Check availability for the selected dates before booking.".to_string());
        }
        let (Some(pickup_at), Some(dropoff_at)) = (self.pickup_at, self.dropoff_at) else {
            return Err("Select pickup and drop-off dates.".to_string());
        };
        if self.pickup.city.trim().is_empty() || self.pickup.location_name.trim().is_empty() {
            return Err("Pickup location is required.".to_string());
        }
        if self.dropoff.city.trim().is_empty() || self.dropoff.location_name.trim().is_empty() {
            return Err("Drop-off location is required.".to_string());
        }

        Ok(CreateBookingRequest {
            vehicle_id: self.vehicle_id.clone(),
            pickup: StopRequest {
                city: self.pickup.city.clone(),
                location_name: self.pickup.location_name.clone(),
                date_time: pickup_at,
            },
            dropoff: StopRequest {
                city: self.dropoff.city.clone(),
                location_name: self.dropoff.location_name.clone(),
                date_time: dropoff_at,
            },
            booking_type: self.booking_type,
            driver_id: self.driver_id.clone().filter(|d| !d.is_empty()),
            promo_code: self.promo_code.clone().filter(|p| !p.is_empty()),
        })
    }

    pub fn view(&self) -> DraftView {
        DraftView {
            vehicle_id: self.vehicle_id.clone(),
            pickup_date_time: self.pickup_at,
            dropoff_date_time: self.dropoff_at,
            available: self.available,
            price_breakdown: self.price.clone(),
            duration: self
                .price
                .as_ref()
                .map(|p| p.duration.to_human_readable())
                .filter(|d| !d.is_empty()),
            error: self.notice.clone(),
            book_enabled: self.book_enabled(),
        }
    }
}

pub struct Resolution {
    pub availability: Result<Availability, String>,
    pub price: Result<PriceBreakdown, String>,
}

/// Asks the backend for availability and price of one date range.
///
/// A session that cannot be refreshed aborts the whole resolution; any
/// other failure is kept as the inline message for that half.
pub async fn resolve(
    api: &RentalApi<'_>,
    query: &AvailabilityQuery,
) -> Result<Resolution, ApiError> {
    let (availability, price) = tokio::join!(
        api.check_availability(query),
        api.calculate_price(query)
    );
    if matches!(availability, Err(ApiError::SessionExpired))
        || matches!(price, Err(ApiError::SessionExpired))
    {
        return Err(ApiError::SessionExpired);
    }
    let availability = availability.map_err(|e| e.user_message());
    let price = price
        .map(|quote| quote.price_breakdown)
        .map_err(|e| e.user_message());

    tracing::info!(
        vehicle_id = %query.vehicle_id,
        available = ?availability.as_ref().ok().map(|a| a.available),
        total = ?price.as_ref().ok().map(|p| p.total_payable),
        "resolved quote"
    );

    Ok(Resolution { availability, price })
}
