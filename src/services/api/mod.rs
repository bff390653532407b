//! HTTP access to the rental backend.
//!
//! Every call goes through [`ApiClient`], which attaches the stored access
//! token and applies the [`RefreshPolicy`] on a 401. The wire itself sits
//! behind [`Transport`] so the client can be driven by a fake in tests.

pub mod client;
pub mod http;

use async_trait::async_trait;
use reqwest::Method;

pub use client::ApiClient;
pub use http::ReqwestTransport;

pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", .message.as_deref().unwrap_or(GENERIC_ERROR))]
    Backend {
        status: u16,
        message: Option<String>,
    },

    #[error("session expired")]
    SessionExpired,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text shown to the user: the backend's own message when it sent one.
    pub fn user_message_or(&self, fallback: &str) -> String {
        match self {
            ApiError::Backend {
                message: Some(message),
                ..
            } => message.clone(),
            ApiError::SessionExpired => "Your session has expired. Please log in again.".to_string(),
            _ => fallback.to_string(),
        }
    }

    pub fn user_message(&self) -> String {
        self.user_message_or(GENERIC_ERROR)
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn backend_message(&self) -> Option<String> {
        ["message", "error"]
            .iter()
            .find_map(|key| self.body.get(key).and_then(|v| v.as_str()))
            .filter(|m| !m.is_empty())
            .map(|m| m.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> anyhow::Result<ApiResponse>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Where the access/refresh token pair lives between requests.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credentials>;
    fn save(&self, credentials: &Credentials);
    fn clear(&self);
}

/// Credentials for calls made before a session exists (login).
pub struct Anonymous;

impl CredentialStore for Anonymous {
    fn load(&self) -> Option<Credentials> {
        None
    }

    fn save(&self, _credentials: &Credentials) {}

    fn clear(&self) {}
}

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub refresh_path: String,
    pub login_redirect: String,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_path: "/auth/refresh-token".to_string(),
            login_redirect: LOGIN_PATH.to_string(),
        }
    }
}
