use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub booking_ref: Option<String>,
    #[serde(default)]
    pub customer: Option<EntityRef>,
    #[serde(default)]
    pub vendor: Option<EntityRef>,
    #[serde(default)]
    pub vehicle: Option<EntityRef>,
    #[serde(default)]
    pub driver: Option<EntityRef>,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub booking_type: BookingType,
    pub price_breakdown: PriceBreakdown,
    #[serde(default)]
    pub promo_code: Option<String>,
    pub status: BookingStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A reference the backend may return either as a bare id or populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EntityRef {
    Id(String),
    Populated {
        #[serde(rename = "_id", alias = "id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Id(id) => id,
            EntityRef::Populated { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub city: String,
    pub location_name: String,
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingType {
    #[serde(rename = "self-drive")]
    SelfDrive,
    #[serde(rename = "with-driver")]
    WithDriver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    CheckedOut,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Refunded,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::PendingPayment,
        BookingStatus::Confirmed,
        BookingStatus::CheckedOut,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
        BookingStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
            BookingStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "Pending Payment",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::CheckedOut => "Checked Out",
            BookingStatus::InProgress => "In Progress",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::NoShow => "No Show",
            BookingStatus::Refunded => "Refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::NoShow
                | BookingStatus::Refunded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    #[serde(default)]
    pub base_amount: f64,
    #[serde(default)]
    pub driver_amount: f64,
    #[serde(default)]
    pub taxes: f64,
    #[serde(default)]
    pub deposit: f64,
    #[serde(default)]
    pub discount: f64,
    pub total_payable: f64,
    #[serde(default)]
    pub duration: RentalDuration,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentalDuration {
    pub days: u32,
    pub hours: u32,
}

impl RentalDuration {
    pub fn to_human_readable(&self) -> String {
        let plural = |n: u32, unit: &str| {
            if n == 1 {
                format!("1 {unit}")
            } else {
                format!("{n} {unit}s")
            }
        };
        match (self.days, self.hours) {
            (0, 0) => String::new(),
            (d, 0) => plural(d, "day"),
            (0, h) => plural(h, "hour"),
            (d, h) => format!("{} {}", plural(d, "day"), plural(h, "hour")),
        }
    }
}

/// Two amounts are the same payable total if they agree to the paisa.
pub fn same_amount(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.005
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub city: String,
    pub location_name: String,
    pub date_time: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub vehicle_id: String,
    pub pickup: StopRequest,
    pub dropoff: StopRequest,
    pub booking_type: BookingType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub status: BookingStatus,
}
