//! Which status changes each role is offered on a booking.
//!
//! The backend stays the authority on status; this table only decides which
//! actions a dashboard row shows and which PATCH requests are forwarded.

use std::collections::HashSet;

use serde::Serialize;

use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, EntityRef, PriceBreakdown, Role};
use crate::services::booking::PAYMENT_PAGE;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub status: BookingStatus,
    pub label: &'static str,
}

fn action_label(to: BookingStatus) -> &'static str {
    match to {
        BookingStatus::Confirmed => "Confirm",
        BookingStatus::CheckedOut => "Check Out",
        BookingStatus::InProgress => "Start Trip",
        BookingStatus::Completed => "Complete",
        BookingStatus::Cancelled => "Cancel",
        other => other.label(),
    }
}

/// Target statuses a role may ever set.
fn settable(role: Role) -> &'static [BookingStatus] {
    match role {
        Role::Vendor => &[
            BookingStatus::CheckedOut,
            BookingStatus::InProgress,
            BookingStatus::Completed,
        ],
        Role::Admin => &[BookingStatus::Confirmed, BookingStatus::Cancelled],
        Role::Customer => &[],
    }
}

pub fn offered_transitions(role: Role, from: BookingStatus) -> Vec<Action> {
    use BookingStatus::*;

    let targets: Vec<BookingStatus> = match role {
        Role::Vendor => match from {
            Confirmed => vec![CheckedOut],
            CheckedOut => vec![InProgress],
            InProgress => vec![Completed],
            _ => vec![],
        },
        Role::Admin => {
            let mut targets = vec![];
            if from == PendingPayment {
                targets.push(Confirmed);
            }
            if !from.is_terminal() {
                targets.push(Cancelled);
            }
            targets
        }
        Role::Customer => vec![],
    };

    targets
        .into_iter()
        .map(|status| Action {
            status,
            label: action_label(status),
        })
        .collect()
}

/// Decides whether a status change may be forwarded to the backend.
///
/// `from` is the status the caller's row showed; when it is absent only the
/// role is checked.
pub fn check_transition(
    role: Role,
    from: Option<BookingStatus>,
    to: BookingStatus,
) -> Result<(), AppError> {
    if !settable(role).contains(&to) {
        return Err(AppError::Forbidden(format!(
            "A {} cannot mark a booking as {}.",
            role.as_str(),
            to.label().to_lowercase()
        )));
    }

    if let Some(from) = from {
        if !offered_transitions(role, from).iter().any(|a| a.status == to) {
            return Err(AppError::Conflict(format!(
                "A {} booking cannot be moved to {}.",
                from.label().to_lowercase(),
                to.label().to_lowercase()
            )));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayNow {
    pub booking_id: String,
    pub amount: f64,
    pub redirect: &'static str,
}

/// One line of a bookings list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRow {
    pub id: String,
    pub booking_ref: Option<String>,
    pub vehicle: Option<String>,
    pub customer: Option<String>,
    pub pickup: String,
    pub dropoff: String,
    pub status: BookingStatus,
    pub status_label: &'static str,
    pub price_breakdown: PriceBreakdown,
    pub duration: String,
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_now: Option<PayNow>,
}

impl BookingRow {
    pub fn new(booking: Booking, role: Role) -> Self {
        let pay_now = (role == Role::Customer && booking.status == BookingStatus::PendingPayment)
            .then(|| PayNow {
                booking_id: booking.id.clone(),
                amount: booking.price_breakdown.total_payable,
                redirect: PAYMENT_PAGE,
            });

        Self {
            vehicle: booking.vehicle.as_ref().map(display_name),
            customer: booking.customer.as_ref().map(display_name),
            pickup: format!(
                "{}, {} ({})",
                booking.pickup.location_name,
                booking.pickup.city,
                booking.pickup.date_time.format("%d %b %Y %H:%M")
            ),
            dropoff: format!(
                "{}, {} ({})",
                booking.dropoff.location_name,
                booking.dropoff.city,
                booking.dropoff.date_time.format("%d %b %Y %H:%M")
            ),
            status_label: booking.status.label(),
            actions: offered_transitions(role, booking.status),
            duration: booking.price_breakdown.duration.to_human_readable(),
            id: booking.id,
            booking_ref: booking.booking_ref,
            status: booking.status,
            price_breakdown: booking.price_breakdown,
            pay_now,
        }
    }
}

fn display_name(entity: &EntityRef) -> String {
    match entity {
        EntityRef::Populated {
            name: Some(name), ..
        } if !name.is_empty() => name.clone(),
        other => other.id().to_string(),
    }
}

/// Rows for a list response. A booking id appears at most once, so one
/// booking never shows two status badges.
pub fn booking_rows(bookings: Vec<Booking>, role: Role) -> Vec<BookingRow> {
    let mut seen = HashSet::new();
    bookings
        .into_iter()
        .filter(|b| {
            let fresh = seen.insert(b.id.clone());
            if !fresh {
                tracing::warn!(booking_id = %b.id, "duplicate booking in list response");
            }
            fresh
        })
        .map(|b| BookingRow::new(b, role))
        .collect()
}
