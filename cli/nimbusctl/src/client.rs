//! HTTP client for a single REST service.
//!
//! A `ServiceClient` is bound to one service type; the concrete endpoint is
//! resolved through the session manager (catalog or fixed plugin endpoint)
//! and every request carries the session token.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::CliError;
use crate::session::SessionManager;

/// Header carrying the session token on every service request.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Client for one REST service (compute, network, ...).
#[derive(Clone)]
pub struct ServiceClient {
    session: Arc<SessionManager>,
    service_type: String,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service_type", &self.service_type)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    pub fn new(session: Arc<SessionManager>, service_type: impl Into<String>) -> Self {
        Self {
            session,
            service_type: service_type.into(),
        }
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Resolve the base URL for this service. Triggers session bootstrap
    /// and the single identity round trip on first use.
    async fn endpoint(&self) -> Result<String, CliError> {
        self.session
            .get_endpoint_for_service(
                &self.service_type,
                self.session.region_name(),
                self.session.interface(),
            )
            .await
    }

    async fn url(&self, path: &str) -> Result<String, CliError> {
        let endpoint = self.endpoint().await?;
        Ok(format!("{}{}", endpoint.trim_end_matches('/'), path))
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let url = self.url(path).await?;
        let token = self.session.auth_ref().await?.token.clone();
        let session = self.session.setup_auth().await?;

        let response = self
            .session
            .send_timed(
                session.http.get(&url).header(AUTH_TOKEN_HEADER, token),
                format!("GET {url}"),
            )
            .await?;

        self.handle_response(response).await
    }

    /// Make a POST request with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let url = self.url(path).await?;
        let token = self.session.auth_ref().await?.token.clone();
        let session = self.session.setup_auth().await?;

        let response = self
            .session
            .send_timed(
                session
                    .http
                    .post(&url)
                    .header(AUTH_TOKEN_HEADER, token)
                    .json(body),
                format!("POST {url}"),
            )
            .await?;

        self.handle_response(response).await
    }

    /// Make a PUT request with a JSON body.
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let url = self.url(path).await?;
        let token = self.session.auth_ref().await?.token.clone();
        let session = self.session.setup_auth().await?;

        let response = self
            .session
            .send_timed(
                session
                    .http
                    .put(&url)
                    .header(AUTH_TOKEN_HEADER, token)
                    .json(body),
                format!("PUT {url}"),
            )
            .await?;

        self.handle_response(response).await
    }

    /// Make a POST request whose response body is ignored. Used for
    /// server actions, which answer 202 with no useful payload.
    pub async fn post_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<(), CliError> {
        let url = self.url(path).await?;
        let token = self.session.auth_ref().await?.token.clone();
        let session = self.session.setup_auth().await?;

        let response = self
            .session
            .send_timed(
                session
                    .http
                    .post(&url)
                    .header(AUTH_TOKEN_HEADER, token)
                    .json(body),
                format!("POST {url}"),
            )
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    /// Make a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<(), CliError> {
        let url = self.url(path).await?;
        let token = self.session.auth_ref().await?.token.clone();
        let session = self.session.setup_auth().await?;

        let response = self
            .session
            .send_timed(
                session.http.delete(&url).header(AUTH_TOKEN_HEADER, token),
                format!("DELETE {url}"),
            )
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    /// Handle a successful or error response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            Err(api_error(response).await)
        }
    }
}

/// API error response structure.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

async fn api_error(response: reqwest::Response) -> CliError {
    let status = response.status().as_u16();

    // Error bodies come in a few shapes; take whatever is recognizable.
    let body: Value = response.json().await.unwrap_or_default();
    let parsed: ApiErrorResponse = serde_json::from_value(body.clone()).unwrap_or(
        ApiErrorResponse {
            code: None,
            message: None,
            request_id: None,
        },
    );

    let message = parsed
        .message
        .or_else(|| body["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string());

    CliError::api(
        status,
        parsed.code.unwrap_or_else(|| "unknown".to_string()),
        message,
        parsed.request_id,
    )
}
