//! Options for the hosted checkout overlay.
//!
//! The overlay runs in the browser; this side only decides what it is
//! opened with. Its success and failure handlers post back to the payment
//! routes.

use serde::Serialize;

use crate::config::AppConfig;
use crate::models::GatewayOrder;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CheckoutOptions {
    pub key: String,
    pub amount: i64,
    pub currency: String,
    pub order_id: String,
    pub name: String,
    pub description: String,
    pub prefill: Prefill,
    pub theme: Theme,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prefill {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Theme {
    pub color: String,
}

pub fn checkout_options(
    config: &AppConfig,
    order: &GatewayOrder,
    booking_id: &str,
    customer_name: &str,
) -> CheckoutOptions {
    CheckoutOptions {
        key: config.razorpay_key_id.clone(),
        amount: order.amount,
        currency: order.currency.clone(),
        order_id: order.id.clone(),
        name: config.checkout_name.clone(),
        description: format!("Payment for booking {booking_id}"),
        prefill: Prefill {
            name: customer_name.to_string(),
        },
        theme: Theme {
            color: config.checkout_theme_color.clone(),
        },
    }
}
