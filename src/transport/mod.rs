//! Outbound SMS transport — a Sendblue-style HTTP gateway.
//!
//! The provider owns delivery: we get back `{status, message_handle,
//! was_downgraded}` on send and asynchronous status callbacks later,
//! correlated by the handle.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;
use crate::model::MessageStatus;

/// What the provider reported for one outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub status: MessageStatus,
    pub transport_handle: Option<String>,
    pub was_downgraded: Option<bool>,
}

/// An outbound-message gateway.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send `content` to `phone_number`, asking the provider to post delivery
    /// updates to `callback_url`.
    async fn send(
        &self,
        phone_number: &str,
        content: &str,
        callback_url: &str,
    ) -> Result<DispatchReceipt, TransportError>;
}

/// Credentials and endpoint for the HTTP gateway.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub api_secret: SecretString,
    /// Connection-level timeout for the provider call.
    pub timeout: Duration,
}

impl TransportConfig {
    /// Build from environment variables. Returns `None` if the gateway is
    /// not configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SENDBLUE_BASE_URL").ok()?;
        let api_key = std::env::var("SENDBLUE_API_KEY").ok()?;
        let api_secret = std::env::var("SENDBLUE_API_SECRET").ok()?;

        Some(Self {
            base_url,
            api_key: SecretString::from(api_key),
            api_secret: SecretString::from(api_secret),
            timeout: Duration::from_secs(15),
        })
    }
}

/// Shape of the provider's send response.
#[derive(Debug, Deserialize)]
struct SendResponse {
    status: String,
    message_handle: Option<String>,
    was_downgraded: Option<bool>,
}

/// reqwest-based gateway client.
pub struct HttpSmsTransport {
    config: TransportConfig,
    http: reqwest::Client,
}

impl HttpSmsTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl SmsTransport for HttpSmsTransport {
    async fn send(
        &self,
        phone_number: &str,
        content: &str,
        callback_url: &str,
    ) -> Result<DispatchReceipt, TransportError> {
        let url = format!("{}/send-message", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("sb-api-key-id", self.config.api_key.expose_secret())
            .header("sb-api-secret-key", self.config.api_secret.expose_secret())
            .json(&serde_json::json!({
                "number": phone_number,
                "content": content,
                "status_callback": callback_url,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.config.timeout)
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("bad send response: {e}")))?;

        let receipt = parse_receipt(body)?;
        debug!(
            status = receipt.status.as_str(),
            handle = receipt.transport_handle.as_deref().unwrap_or("-"),
            "Outbound message accepted by transport"
        );
        Ok(receipt)
    }
}

/// Validate a provider response against our status domain.
fn parse_receipt(body: SendResponse) -> Result<DispatchReceipt, TransportError> {
    let status = MessageStatus::parse(&body.status.to_ascii_lowercase())
        .filter(MessageStatus::is_transport_status)
        .ok_or_else(|| {
            TransportError::InvalidResponse(format!("unknown transport status {:?}", body.status))
        })?;

    Ok(DispatchReceipt {
        status,
        transport_handle: body.message_handle,
        was_downgraded: body.was_downgraded,
    })
}
