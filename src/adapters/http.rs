//! reqwest-backed transport for the player control endpoint.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::protocol::USER_AGENT;
use super::traits::{Connector, Transport, TransportError};

/// Opens one pooled HTTP client per session
#[derive(Debug, Clone, Default)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn open(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Open(e.to_string()))?;

        debug!(address, ?timeout, "Opened HTTP transport");
        Ok(Arc::new(HttpTransport { client }))
    }
}

/// HTTP transport. Closing drops nothing explicitly; the pool is released
/// with the last reference.
pub struct HttpTransport {
    client: Client,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        trace!(url, body = %String::from_utf8_lossy(&body), "Player request");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Http(err)
    }
}
