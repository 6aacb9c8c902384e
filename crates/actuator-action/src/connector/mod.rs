//! In-process connector adapters and their registry.
//!
//! Defines the `ConnectorAdapter` async trait and the `ConnectorRegistry`
//! that dispatches tool requests to registered adapters. The registry is a
//! [`ToolTransport`], so the executor drives in-process connectors exactly
//! like a remote gateway.

pub mod internal_note;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use actuator_core::types::ExternalObjectRef;
use actuator_storage::Database;

use crate::error::ConnectorError;
use crate::executor::envelope::{error_envelope, success_envelope};
use crate::executor::transport::{ToolRequest, ToolTransport, TransportError};
use crate::idempotency::IdempotencyStore;

pub use internal_note::InternalNoteAdapter;

/// One tool implemented against one external system.
#[async_trait]
pub trait ConnectorAdapter: Send + Sync {
    /// Fully qualified tool name, e.g. `internal.create_note`.
    fn tool_name(&self) -> &str;

    /// Perform the side effect and return references to what it created
    /// or changed.
    async fn invoke(&self, request: &ToolRequest) -> Result<Vec<ExternalObjectRef>, ConnectorError>;
}

/// Wraps an adapter with the external-write idempotency store.
///
/// A recorded key returns its refs without calling the inner adapter; a
/// completed side effect is recorded write-once.
pub struct IdempotentAdapter {
    inner: Arc<dyn ConnectorAdapter>,
    store: IdempotencyStore,
}

impl IdempotentAdapter {
    pub fn new(inner: Arc<dyn ConnectorAdapter>, store: IdempotencyStore) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl ConnectorAdapter for IdempotentAdapter {
    fn tool_name(&self) -> &str {
        self.inner.tool_name()
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<Vec<ExternalObjectRef>, ConnectorError> {
        if let Some(refs) = self.store.check(&request.idempotency_key)? {
            debug!(
                tool_name = %request.name,
                idempotency_key = %request.idempotency_key,
                "Adapter call skipped, side effect already recorded"
            );
            return Ok(refs);
        }
        let refs = self.inner.invoke(request).await?;
        Ok(self.store.record(
            &request.idempotency_key,
            &refs,
            &request.action_intent_id,
            &request.name,
        )?)
    }
}

/// Tool name → adapter.
#[derive(Default)]
pub struct ConnectorRegistry {
    adapters: HashMap<String, Arc<dyn ConnectorAdapter>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its tool name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ConnectorAdapter>) {
        let name = adapter.tool_name().to_string();
        info!(tool_name = %name, "Connector adapter registered");
        self.adapters.insert(name, adapter);
    }

    /// Register the built-in adapters, each behind the idempotency store.
    pub fn with_defaults(db: Arc<Database>, dedupe_ttl_days: u32) -> Self {
        let mut registry = Self::new();
        let note: Arc<dyn ConnectorAdapter> = Arc::new(InternalNoteAdapter::new(Arc::clone(&db)));
        registry.register(Arc::new(IdempotentAdapter::new(
            note,
            IdempotencyStore::new(db, dedupe_ttl_days),
        )));
        registry
    }

    pub fn get(&self, tool_name: &str) -> Option<&Arc<dyn ConnectorAdapter>> {
        self.adapters.get(tool_name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ToolTransport for ConnectorRegistry {
    async fn send(&self, request: &ToolRequest) -> Result<String, TransportError> {
        let Some(adapter) = self.get(&request.name) else {
            let err = ConnectorError::UnknownTool(request.name.clone());
            return Ok(error_envelope("UNKNOWN_TOOL", &err.to_string()));
        };

        match adapter.invoke(request).await {
            Ok(refs) => Ok(success_envelope(&json!({
                "success": true,
                "external_object_refs": refs,
            }))),
            Err(ConnectorError::InvalidArguments(message)) => Ok(success_envelope(&json!({
                "success": false,
                "error_code": "INVALID_ARGUMENTS",
                "error_message": message,
            }))),
            Err(ConnectorError::Rejected { code, message }) => Ok(success_envelope(&json!({
                "success": false,
                "error_code": code,
                "error_message": message,
            }))),
            Err(ConnectorError::UnknownTool(name)) => {
                Ok(error_envelope("UNKNOWN_TOOL", &format!("No connector registered for tool: {}", name)))
            }
            Err(ConnectorError::Unavailable(message)) => Err(TransportError::Status {
                status: 503,
                body: message,
            }),
            Err(ConnectorError::RateLimited(message)) => Err(TransportError::Status {
                status: 429,
                body: message,
            }),
            Err(ConnectorError::Storage(e)) => Err(TransportError::Status {
                status: 500,
                body: e.to_string(),
            }),
        }
    }
}
