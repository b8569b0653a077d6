//! Outbound cancellation requests.
//!
//! The lifecycle controller only needs to know whether the backend accepted
//! a cancellation and which request id it assigned. [`HttpCancellationTransport`]
//! speaks the dashboard API (`POST /api/cancel-service`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::TransportError;
use crate::models::Service;

const CANCEL_SERVICE_PATH: &str = "/api/cancel-service";

/// Request body sent to the cancellation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl From<&Service> for CancellationRequest {
    fn from(service: &Service) -> Self {
        Self {
            service_name: service.name.clone(),
            service_id: service.id.clone(),
        }
    }
}

/// Response body returned by the cancellation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResponse {
    pub success: bool,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CancellationResponse {
    /// Convert a wire response into the backend's request id.
    ///
    /// `success: false` becomes [`TransportError::Rejected`] carrying the
    /// `error` text, falling back to `message`.
    pub fn into_result(self) -> Result<Option<String>, TransportError> {
        if self.success {
            return Ok(self.request_id.filter(|id| !id.trim().is_empty()));
        }
        let reason = self
            .error
            .or(self.message)
            .unwrap_or_else(|| "cancellation was rejected".to_string());
        Err(TransportError::Rejected(reason))
    }
}

/// Performs the outbound cancellation call.
#[async_trait]
pub trait CancellationTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    /// Ask the backend to cancel a service.
    ///
    /// Returns the request id assigned by the backend, if it issued one.
    async fn cancel(&self, request: &CancellationRequest) -> Result<Option<String>, TransportError>;
}

/// HTTP client for the dashboard's cancellation endpoint.
#[derive(Debug, Clone)]
pub struct HttpCancellationTransport {
    client: Client,
    endpoint: String,
}

impl HttpCancellationTransport {
    /// Create a transport for the API rooted at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("cost-lifecycle/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Full URL of the cancellation endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{CANCEL_SERVICE_PATH}", self.endpoint)
    }
}

#[async_trait]
impl CancellationTransport for HttpCancellationTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self), fields(transport = "http"))]
    async fn cancel(&self, request: &CancellationRequest) -> Result<Option<String>, TransportError> {
        let url = self.url();
        debug!(url = %url, "Sending cancellation request");

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Error bodies usually still follow the response shape.
            let message = serde_json::from_str::<CancellationResponse>(&body)
                .ok()
                .and_then(|r| r.error.or(r.message))
                .unwrap_or(body);
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str::<CancellationResponse>(&body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?
            .into_result()
    }
}
