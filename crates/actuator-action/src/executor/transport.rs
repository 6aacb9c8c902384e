//! Transport to the tool-invocation gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use actuator_core::error::ActuatorError;
use actuator_core::types::{AccountId, ActionIntentId, TenantId};

/// One wire-level tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRequest {
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(skip)]
    pub idempotency_key: String,
    #[serde(skip)]
    pub tool_run_ref: String,
    #[serde(skip)]
    pub action_intent_id: ActionIntentId,
    #[serde(skip)]
    pub tenant_id: TenantId,
    #[serde(skip)]
    pub account_id: AccountId,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    /// Connection refused or reset, DNS failure.
    #[error("Connection failed: {0}")]
    Connect(String),
    /// Response body could not be read to the end.
    #[error("Response body failed: {0}")]
    Body(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The request could not be built or sent for a reason a retry will not
    /// fix.
    #[error("Request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connect(_) | TransportError::Body(_) => {
                true
            }
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Request(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::Request(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Sends a tool request and returns the raw response body.
///
/// Non-2xx answers are `TransportError::Status`; parsing the body is the
/// executor's job.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn send(&self, request: &ToolRequest) -> Result<String, TransportError>;
}

/// Supplies the bearer token identifying the acting tenant and account.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, tenant_id: &TenantId, account_id: &AccountId) -> Result<String, ActuatorError>;
}

/// A fixed token for every actor.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _: &TenantId, _: &AccountId) -> Result<String, ActuatorError> {
        Ok(self.0.clone())
    }
}

/// HTTP transport posting `{name, arguments}` to the gateway.
///
/// The idempotency key travels in the `Idempotency-Key` header. The gateway
/// may honour it, but the local idempotency store stays authoritative.
pub struct HttpToolTransport {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpToolTransport {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ActuatorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActuatorError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            tokens,
        })
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn send(&self, request: &ToolRequest) -> Result<String, TransportError> {
        let token = self
            .tokens
            .token(&request.tenant_id, &request.account_id)
            .await
            .map_err(|e| TransportError::Request(format!("token unavailable: {}", e)))?;

        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &request.idempotency_key)
            .header("X-Tool-Run-Ref", &request.tool_run_ref)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(
            tool_name = %request.name,
            tool_run_ref = %request.tool_run_ref,
            status = status.as_u16(),
            "Tool gateway responded"
        );

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
