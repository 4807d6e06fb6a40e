//! HTTP control executor

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::{ControlExecutor, ControlRequest, ControlTarget};
use crate::error::{ClientError, Result};
use crate::protocol;
use crate::transport::TransportError;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes control requests as form POSTs
#[derive(Debug, Clone)]
pub struct HttpControlExecutor {
    client: Client,
}

impl HttpControlExecutor {
    /// Create an executor with default timeouts
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create an executor with custom timeouts
    pub fn with_config(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self { client })
    }

    /// Use an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post(&self, endpoint: &Url, target: ControlTarget, body: String) -> Result<String> {
        let url = endpoint.join(target.path()).map_err(TransportError::from)?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(TransportError::from)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server { status, message }.into());
        }

        Ok(response.text().await.map_err(TransportError::from)?)
    }
}

#[async_trait]
impl ControlExecutor for HttpControlExecutor {
    #[instrument(skip(self, request), fields(operation = request.operation()))]
    async fn execute(&self, endpoint: &Url, request: &ControlRequest) -> Result<()> {
        let body = self
            .post(endpoint, request.target(), request.encode())
            .await?;
        protocol::parse_control_response(&body, request.operation())
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    async fn execute_bulk(
        &self,
        endpoint: &Url,
        requests: &[ControlRequest],
    ) -> Result<Vec<Result<()>>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        if requests.iter().any(|r| r.target() != first.target()) {
            return Err(ClientError::Config(
                "A batch must target a single endpoint".into(),
            ));
        }

        let body = requests
            .iter()
            .map(ControlRequest::encode)
            .collect::<Vec<_>>()
            .join("\r\n");
        let response = self.post(endpoint, first.target(), body).await?;

        let operations: Vec<&str> = requests.iter().map(ControlRequest::operation).collect();
        Ok(protocol::parse_bulk_response(&response, &operations))
    }
}
