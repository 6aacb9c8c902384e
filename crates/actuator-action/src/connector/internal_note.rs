//! Internal note connector.
//!
//! Writes a note record into the local store. Serves CREATE_NOTE actions.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use actuator_core::types::{ExternalObjectRef, Timestamp};
use actuator_storage::{Database, NoteRecord, NoteRepository};

use crate::connector::ConnectorAdapter;
use crate::error::ConnectorError;
use crate::executor::transport::ToolRequest;

pub const TOOL_NAME: &str = "internal.create_note";

const MAX_BODY_LEN: usize = 10_000;

pub struct InternalNoteAdapter {
    notes: NoteRepository,
}

impl InternalNoteAdapter {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            notes: NoteRepository::new(db),
        }
    }
}

#[async_trait]
impl ConnectorAdapter for InternalNoteAdapter {
    fn tool_name(&self) -> &str {
        TOOL_NAME
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<Vec<ExternalObjectRef>, ConnectorError> {
        let body = request
            .arguments
            .get("body")
            .or_else(|| request.arguments.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();

        if body.is_empty() {
            return Err(ConnectorError::InvalidArguments(
                "Note body must not be empty".to_string(),
            ));
        }
        if body.len() > MAX_BODY_LEN {
            return Err(ConnectorError::InvalidArguments(format!(
                "Note body exceeds {} bytes",
                MAX_BODY_LEN
            )));
        }

        let note = NoteRecord {
            id: format!("note-{}", Uuid::new_v4().simple()),
            tenant_id: request.tenant_id.clone(),
            account_id: request.account_id.clone(),
            body: body.to_string(),
            action_intent_id: request.action_intent_id.clone(),
            created_at: Timestamp::now(),
        };
        self.notes.insert(&note)?;

        tracing::info!(note_id = %note.id, body_len = body.len(), "Note created");

        Ok(vec![ExternalObjectRef {
            system: "internal".to_string(),
            object_type: "note".to_string(),
            object_id: note.id,
            object_url: None,
        }])
    }
}
