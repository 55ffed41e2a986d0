//! HTTP API provider

use super::{
    BulkItemResult, EmailProvider, Message, ProviderCapabilities, ProviderError, ProviderHealth,
};
use async_trait::async_trait;
use mailfleet_common::config::HttpProviderConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response to a single send
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(alias = "id")]
    message_id: String,
}

/// Batch request body
#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    messages: &'a [Message],
}

/// Response to a batch send
#[derive(Debug, Deserialize)]
struct BulkResponse {
    results: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(alias = "id")]
    message_id: Option<String>,
    error: Option<String>,
}

/// Provider speaking a JSON email API
pub struct HttpApiProvider {
    name: String,
    capabilities: ProviderCapabilities,
    config: HttpProviderConfig,
    client: Client,
}

impl HttpApiProvider {
    /// Create a new HTTP API provider.
    ///
    /// Native bulk send is enabled when a bulk endpoint is configured.
    pub fn new(
        name: impl Into<String>,
        config: HttpProviderConfig,
        capabilities: ProviderCapabilities,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {}", e)))?;

        let capabilities = ProviderCapabilities {
            supports_bulk: config.bulk_endpoint.is_some(),
            ..capabilities
        };

        Ok(Self {
            name: name.into(),
            capabilities,
            config,
            client,
        })
    }

    /// Build a request with optional auth header
    fn build_request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url);

        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        request
    }

    fn request_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(Duration::from_secs(self.config.timeout_secs))
        } else {
            ProviderError::Unavailable(format!("Request failed: {}", e))
        }
    }

    /// Map a non-success status to an error
    async fn status_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ProviderError::Unavailable(format!("{} {}", status, body))
        } else {
            ProviderError::Rejected(format!("{} {}", status, body))
        }
    }
}

#[async_trait]
impl EmailProvider for HttpApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn send(&self, message: &Message) -> Result<String, ProviderError> {
        let response = self
            .build_request(reqwest::Method::POST, &self.config.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("Invalid send response: {}", e)))?;

        debug!(provider = %self.name, message_id = %body.message_id, "Email accepted");
        Ok(body.message_id)
    }

    async fn send_bulk(&self, messages: &[Message]) -> Result<Vec<BulkItemResult>, ProviderError> {
        let Some(bulk_endpoint) = &self.config.bulk_endpoint else {
            return Err(ProviderError::Unsupported);
        };

        let response = self
            .build_request(reqwest::Method::POST, bulk_endpoint)
            .json(&BulkRequest { messages })
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: BulkResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("Invalid bulk response: {}", e)))?;

        if body.results.len() != messages.len() {
            warn!(
                provider = %self.name,
                expected = messages.len(),
                received = body.results.len(),
                "Bulk response size mismatch"
            );
            return Err(ProviderError::Other(format!(
                "Bulk response has {} results for {} messages",
                body.results.len(),
                messages.len()
            )));
        }

        Ok(body
            .results
            .into_iter()
            .map(|item| match (item.message_id, item.error) {
                (Some(id), None) => Ok(id),
                (_, Some(error)) => Err(ProviderError::Rejected(error)),
                (None, None) => Err(ProviderError::Other("Missing message id".to_string())),
            })
            .collect())
    }

    async fn check_health(&self) -> ProviderHealth {
        let url = self
            .config
            .health_url
            .as_deref()
            .unwrap_or(&self.config.endpoint);
        let started = Instant::now();

        match self.build_request(reqwest::Method::GET, url).send().await {
            Ok(response) if response.status().is_success() => {
                ProviderHealth::healthy(&self.name, started.elapsed().as_millis() as u64)
            }
            Ok(response) => ProviderHealth::unhealthy(
                &self.name,
                format!("Health endpoint returned {}", response.status()),
            ),
            Err(e) => ProviderHealth::unhealthy(&self.name, format!("Health check failed: {}", e)),
        }
    }
}
