use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub api_base_url: String,
    pub razorpay_key_id: String,
    pub checkout_name: String,
    pub checkout_theme_color: String,
    pub payment_redirect_delay_ms: u64,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "portal.db".to_string()),
            api_base_url: env::var("API_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5000/api".to_string()),
            razorpay_key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            checkout_name: env::var("CHECKOUT_NAME").unwrap_or_else(|_| "Rental".to_string()),
            checkout_theme_color: env::var("CHECKOUT_THEME_COLOR")
                .unwrap_or_else(|_| "#3399cc".to_string()),
            payment_redirect_delay_ms: env::var("PAYMENT_REDIRECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(168),
        }
    }
}
