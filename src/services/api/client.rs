use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{ApiError, ApiRequest, CredentialStore, Credentials, RefreshPolicy, Transport};

/// Backend client for one caller: their credential store plus the shared
/// transport and refresh policy.
///
/// A client refreshes at most once in its lifetime. Requests that hit a 401
/// while the refresh is running wait for it and retry with its result.
pub struct ApiClient<'a> {
    transport: &'a dyn Transport,
    credentials: &'a dyn CredentialStore,
    refresh: &'a RefreshPolicy,
    refreshed: Mutex<bool>,
}

impl<'a> ApiClient<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        credentials: &'a dyn CredentialStore,
        refresh: &'a RefreshPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            refresh,
            refreshed: Mutex::new(false),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.send(Method::GET, path, None).await?;
        decode(body)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.send(Method::POST, path, Some(encode(body)?)).await?;
        decode(body)
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.send(Method::PATCH, path, Some(encode(body)?)).await?;
        decode(body)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        // A request is retried at most once, and only after a successful refresh.
        let mut retried = false;

        loop {
            let bearer = self.credentials.load().map(|c| c.access_token);
            let request = ApiRequest {
                method: method.clone(),
                path: path.to_string(),
                body: body.clone(),
                bearer,
            };

            let resp = self.transport.execute(&request).await.map_err(|e| {
                tracing::warn!(method = %method, path, error = %e, "backend request failed");
                ApiError::Network(e.to_string())
            })?;

            // A 401 without a token is a plain rejection (bad login), not an expired session.
            if resp.status == 401 && request.bearer.is_some() && !retried {
                retried = true;
                let mut refreshed = self.refreshed.lock().await;
                // Another request may have refreshed while this one waited.
                let current = self.credentials.load().map(|c| c.access_token);
                if current.is_some() && current != request.bearer {
                    tracing::debug!(path, "retrying with credentials refreshed elsewhere");
                    continue;
                }
                if !*refreshed {
                    *refreshed = true;
                    if self.refresh_credentials().await {
                        tracing::debug!(path, "retrying after token refresh");
                        continue;
                    }
                }
                self.credentials.clear();
                tracing::info!(
                    path,
                    redirect = %self.refresh.login_redirect,
                    "token refresh failed or already spent, stored credentials cleared"
                );
                return Err(ApiError::SessionExpired);
            }

            if !resp.is_success() {
                let message = resp.backend_message();
                tracing::warn!(method = %method, path, status = resp.status, message = ?message, "backend returned error");
                return Err(ApiError::Backend {
                    status: resp.status,
                    message,
                });
            }

            return Ok(resp.body);
        }
    }

    async fn refresh_credentials(&self) -> bool {
        let Some(refresh_token) = self.credentials.load().and_then(|c| c.refresh_token) else {
            return false;
        };

        let request = ApiRequest {
            method: Method::POST,
            path: self.refresh.refresh_path.clone(),
            body: Some(json!({ "refreshToken": refresh_token })),
            bearer: None,
        };

        let resp = match self.transport.execute(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "token refresh request failed");
                return false;
            }
        };

        if !resp.is_success() {
            tracing::warn!(status = resp.status, "token refresh rejected");
            return false;
        }

        let Some(access_token) = resp.body.get("accessToken").and_then(|v| v.as_str()) else {
            tracing::warn!("token refresh response missing accessToken");
            return false;
        };
        let refresh_token = resp
            .body
            .get("refreshToken")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or(Some(refresh_token));

        self.credentials.save(&Credentials {
            access_token: access_token.to_string(),
            refresh_token,
        });
        true
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}
