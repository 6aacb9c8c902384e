//! Tool-invocation response envelope.
//!
//! A gateway answers with either a structured error object
//! (`{"error": {"code": .., "message": ..}}`) or a result envelope whose
//! first text content item holds the connector payload as JSON:
//!
//! ```json
//! {"result": {"content": [{"type": "text", "text": "{\"success\": true, ...}"}]}}
//! ```
//!
//! The payload carries `success` and, on success, `external_object_refs`
//! (or the legacy single-ref fields `system`, `object_type`, `object_id`,
//! `object_url`).

use serde_json::Value;

use actuator_core::types::ExternalObjectRef;

/// Parsed connector payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Success(Vec<ExternalObjectRef>),
    /// `success=false`: a business failure, recorded as a normal outcome.
    Failure {
        code: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    /// The gateway returned a structured error object.
    #[error("Tool gateway error ({}): {message}", .code.as_deref().unwrap_or("no code"))]
    Protocol {
        code: Option<String>,
        message: String,
    },
    /// The body ended early or was empty.
    #[error("Truncated response: {0}")]
    Truncated(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Declared success without any external object reference.
    #[error("Success reported without external_object_refs")]
    MissingRefs,
}

impl EnvelopeError {
    /// Truncation is most likely an upstream fault that a second attempt
    /// clears. A structured error depends on what it says, so the executor
    /// runs it through its classifier; here it reads as terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnvelopeError::Truncated(_))
    }
}

pub fn parse_response(body: &str) -> Result<ToolPayload, EnvelopeError> {
    let envelope = parse_json(body, "envelope")?;

    if let Some(error) = envelope.get("error") {
        return Err(protocol_error(error));
    }

    let Some(result) = envelope.get("result") else {
        return Err(EnvelopeError::Malformed(
            "envelope has neither result nor error".to_string(),
        ));
    };

    let text = first_text(result).ok_or_else(|| {
        EnvelopeError::Malformed("result has no text content".to_string())
    })?;

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(EnvelopeError::Protocol {
            code: None,
            message: text.to_string(),
        });
    }

    let payload = parse_json(text, "payload")?;
    parse_payload(&payload)
}

/// Build a success envelope around a payload. Used by in-process transports.
pub fn success_envelope(payload: &Value) -> String {
    serde_json::json!({
        "result": {
            "content": [{"type": "text", "text": payload.to_string()}]
        }
    })
    .to_string()
}

pub fn error_envelope(code: &str, message: &str) -> String {
    serde_json::json!({"error": {"code": code, "message": message}}).to_string()
}

fn parse_json(text: &str, what: &str) -> Result<Value, EnvelopeError> {
    if text.trim().is_empty() {
        return Err(EnvelopeError::Truncated(format!("empty {}", what)));
    }
    serde_json::from_str(text).map_err(|e| {
        if e.is_eof() {
            EnvelopeError::Truncated(format!("{} ended early: {}", what, e))
        } else {
            EnvelopeError::Malformed(format!("{} is not valid JSON: {}", what, e))
        }
    })
}

fn protocol_error(error: &Value) -> EnvelopeError {
    let code = error.get("code").and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("unspecified gateway error")
        .to_string();
    EnvelopeError::Protocol { code, message }
}

fn first_text(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))?
        .get("text")?
        .as_str()
}

fn parse_payload(payload: &Value) -> Result<ToolPayload, EnvelopeError> {
    let Some(success) = payload.get("success").and_then(Value::as_bool) else {
        return Err(EnvelopeError::Malformed(
            "payload has no boolean success field".to_string(),
        ));
    };

    if !success {
        let code = payload
            .get("error_code")
            .or_else(|| payload.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = ["error_message", "error", "message"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .unwrap_or("")
            .to_string();
        return Ok(ToolPayload::Failure { code, message });
    }

    let refs = match payload.get("external_object_refs") {
        Some(Value::Array(items)) if !items.is_empty() => {
            serde_json::from_value::<Vec<ExternalObjectRef>>(Value::Array(items.clone()))
                .map_err(|_| EnvelopeError::MissingRefs)?
        }
        _ => legacy_ref(payload).into_iter().collect(),
    };

    if refs.is_empty() {
        return Err(EnvelopeError::MissingRefs);
    }
    Ok(ToolPayload::Success(refs))
}

fn legacy_ref(payload: &Value) -> Option<ExternalObjectRef> {
    let field = |k: &str| payload.get(k).and_then(Value::as_str).map(str::to_string);
    Some(ExternalObjectRef {
        system: field("system")?,
        object_type: field("object_type")?,
        object_id: field("object_id")?,
        object_url: field("object_url"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_with_refs() {
        let body = success_envelope(&json!({
            "success": true,
            "external_object_refs": [
                {"system": "crm", "object_type": "note", "object_id": "n-1"}
            ]
        }));
        let payload = parse_response(&body).unwrap();
        assert_eq!(
            payload,
            ToolPayload::Success(vec![ExternalObjectRef {
                system: "crm".to_string(),
                object_type: "note".to_string(),
                object_id: "n-1".to_string(),
                object_url: None,
            }])
        );
    }

    #[test]
    fn test_success_with_legacy_ref() {
        let body = success_envelope(&json!({
            "success": true,
            "system": "crm",
            "object_type": "contact",
            "object_id": "c-9",
            "object_url": "https://crm.example/c-9"
        }));
        let ToolPayload::Success(refs) = parse_response(&body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].object_url.as_deref(), Some("https://crm.example/c-9"));
    }

    #[test]
    fn test_success_without_refs_is_contract_violation() {
        let body = success_envelope(&json!({"success": true}));
        assert_eq!(parse_response(&body), Err(EnvelopeError::MissingRefs));

        let body = success_envelope(&json!({"success": true, "external_object_refs": []}));
        assert_eq!(parse_response(&body), Err(EnvelopeError::MissingRefs));
    }

    #[test]
    fn test_business_failure() {
        let body = success_envelope(&json!({
            "success": false,
            "error_code": "DUPLICATE",
            "error_message": "note already exists"
        }));
        assert_eq!(
            parse_response(&body).unwrap(),
            ToolPayload::Failure {
                code: Some("DUPLICATE".to_string()),
                message: "note already exists".to_string(),
            }
        );
    }

    #[test]
    fn test_structured_error_is_terminal() {
        let err = parse_response(&error_envelope("UNKNOWN_TOOL", "no such tool")).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::Protocol {
                code: Some("UNKNOWN_TOOL".to_string()),
                message: "no such tool".to_string(),
            }
        );
        assert!(!err.is_retryable());

        let err = parse_response(r#"{"error": {"code": -32602, "message": "bad params"}}"#)
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Protocol { code: Some(ref c), .. } if c == "-32602"));

        let err = parse_response(
            r#"{"error":{"code":-32001,"message":"Request timed out waiting for upstream"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::Protocol {
                code: Some("-32001".to_string()),
                message: "Request timed out waiting for upstream".to_string(),
            }
        );
    }

    #[test]
    fn test_truncated_bodies_are_retryable() {
        assert!(parse_response("").unwrap_err().is_retryable());
        assert!(parse_response(r#"{"result": {"content": [{"type": "te"#)
            .unwrap_err()
            .is_retryable());

        let body = json!({
            "result": {"content": [{"type": "text", "text": "{\"success\": tr"}]}
        })
        .to_string();
        assert!(parse_response(&body).unwrap_err().is_retryable());
    }

    #[test]
    fn test_malformed_bodies_are_terminal() {
        for body in [
            "<html>502 Bad Gateway</html>",
            r#"{"unexpected": 1}"#,
            r#"{"result": {"content": []}}"#,
        ] {
            let err = parse_response(body).unwrap_err();
            assert!(matches!(err, EnvelopeError::Malformed(_)), "{}", body);
            assert!(!err.is_retryable());
        }

        let body = success_envelope(&json!({"ok": true}));
        assert!(matches!(parse_response(&body), Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn test_is_error_result_is_protocol_error() {
        let body = json!({
            "result": {"isError": true, "content": [{"type": "text", "text": "tool crashed"}]}
        })
        .to_string();
        assert!(matches!(
            parse_response(&body),
            Err(EnvelopeError::Protocol { .. })
        ));
    }
}
