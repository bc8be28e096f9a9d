//! Message Transport - outbound gateway delivery
//!
//! The transport is the external channel that actually puts a message on a
//! phone. Its contract is narrow: send one rendered body to one number and
//! return the gateway's message id; delivery/read confirmations come back
//! later through the acknowledgment webhook.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use bw_common::{SendReceipt, TransportError};

#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send one message. A timeout is reported as a failure like any other;
    /// the engine never retries (failed recipients stay Failed).
    async fn send(
        &self,
        phone: &str,
        body: &str,
        image_url: Option<&str>,
    ) -> Result<SendReceipt, TransportError>;
}

/// Configuration for the HTTP gateway transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL of the messaging gateway
    pub base_url: String,
    /// Optional bearer token for the gateway
    pub auth_token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Payload sent to the gateway
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewaySendRequest<'a> {
    phone: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

/// Response from the gateway on an accepted send
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewaySendResponse {
    message_id: String,
}

/// HTTP-based message transport
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("failed to build HTTP client");

        info!(
            gateway = %config.base_url,
            timeout_secs = config.timeout.as_secs(),
            "HttpTransport initialized"
        );

        Self { client, config }
    }

    fn send_url(&self) -> String {
        format!("{}/send", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn send(
        &self,
        phone: &str,
        body: &str,
        image_url: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        let payload = GatewaySendRequest {
            phone,
            body,
            image_url,
        };

        let mut request = self.client.post(self.send_url()).json(&payload);
        if let Some(ref token) = self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(phone = %phone, "gateway request timed out");
                return Err(TransportError::Timeout);
            }
            Err(e) => {
                warn!(phone = %phone, error = %e, "gateway request failed");
                return Err(TransportError::Request(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(phone = %phone, status = %status, "gateway rejected send");
            return Err(TransportError::Rejected(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            )));
        }

        match response.json::<GatewaySendResponse>().await {
            Ok(body) => {
                debug!(
                    phone = %phone,
                    transport_message_id = %body.message_id,
                    "message accepted by gateway"
                );
                Ok(SendReceipt {
                    transport_message_id: body.message_id,
                })
            }
            Err(e) => Err(TransportError::Rejected(format!(
                "malformed gateway response: {}",
                e
            ))),
        }
    }
}
