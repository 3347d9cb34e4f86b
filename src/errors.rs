use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("missing required URL parameter: {parameter}")]
    MissingParameter { parameter: &'static str },

    #[error("keyvault_name contains invalid chars: {invalid_chars:?}")]
    InvalidName {
        keyvault_name: String,
        invalid_chars: Vec<char>,
    },

    #[error("keyvault_name should be between 3 and 24 characters (got {length})")]
    InvalidNameLength { keyvault_name: String, length: usize },

    #[error("keyvault name {keyvault_name} not available")]
    NameUnavailable {
        keyvault_name: String,
        reason: Option<String>,
        detail: Option<String>,
    },

    #[error("timed out after {timeout_secs}s waiting for keyvault {keyvault_name}")]
    ProvisionTimeout {
        keyvault_name: String,
        timeout_secs: u64,
    },

    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Unprocessable Entity: well-formed request, unusable parameters
            ProvisionError::MissingParameter { .. }
            | ProvisionError::InvalidName { .. }
            | ProvisionError::InvalidNameLength { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProvisionError::NameUnavailable { .. } => StatusCode::CONFLICT,
            ProvisionError::ProvisionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProvisionError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message. Never contains text from the underlying cause.
    pub fn message(&self) -> &'static str {
        match self {
            ProvisionError::MissingParameter { .. } => "missing required URL parameter",
            ProvisionError::InvalidName { .. } => "keyvault_name contains invalid chars",
            ProvisionError::InvalidNameLength { .. } => {
                "keyvault_name should be between 3 and 24 characters"
            }
            ProvisionError::NameUnavailable { .. } => {
                "keyvault name not available (maybe previously claimed?)"
            }
            ProvisionError::ProvisionTimeout { .. } => "timed out waiting for keyvault creation",
            ProvisionError::Unexpected(_) => "unexpected error",
        }
    }

    /// Fields echoed to the caller.
    pub fn data(&self) -> Map<String, Value> {
        let value = match self {
            ProvisionError::MissingParameter { parameter } => {
                json!({ "missing_parameter": parameter })
            }
            ProvisionError::InvalidName {
                keyvault_name,
                invalid_chars,
            } => json!({
                "keyvault_name": keyvault_name,
                "invalid_chars": invalid_chars
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>(),
            }),
            ProvisionError::InvalidNameLength {
                keyvault_name,
                length,
            } => json!({ "keyvault_name": keyvault_name, "length": length }),
            ProvisionError::NameUnavailable { keyvault_name, .. } => {
                json!({ "keyvault_name": keyvault_name })
            }
            ProvisionError::ProvisionTimeout {
                keyvault_name,
                timeout_secs,
            } => json!({ "keyvault_name": keyvault_name, "timeout_secs": timeout_secs }),
            ProvisionError::Unexpected(_) => json!({}),
        };
        into_map(value)
    }

    /// Fields written to the log only. Keys never collide with `data()`.
    pub fn debug_data(&self) -> Map<String, Value> {
        let value = match self {
            ProvisionError::NameUnavailable { reason, detail, .. } => json!({
                "unavailable_reason": reason,
                "unavailable_detail": detail,
            }),
            ProvisionError::Unexpected(e) => json!({
                "error": e.to_string(),
                "error_debug": format!("{e:?}"),
                "error_chain": e.chain().map(|c| c.to_string()).collect::<Vec<_>>(),
            }),
            _ => json!({}),
        };
        into_map(value)
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, ProvisionError::Unexpected(_))
    }

    /// Pair with the invocation id to produce the HTTP response.
    pub fn with_invocation(self, invocation_id: impl Into<String>) -> InvocationError {
        InvocationError {
            invocation_id: invocation_id.into(),
            error: self,
        }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A `ProvisionError` bound to the invocation it failed in.
#[derive(Debug)]
pub struct InvocationError {
    pub invocation_id: String,
    pub error: ProvisionError,
}

impl InvocationError {
    /// Emit the structured log record for this failure.
    pub fn log(&self) {
        let status = self.error.status().as_u16();
        if self.error.is_classified() {
            let mut record = Map::new();
            record.insert("message".into(), json!(self.error.message()));
            record.insert("status_code".into(), json!(status));
            record.extend(self.error.data());
            record.extend(self.error.debug_data());
            let record = Value::Object(record);
            tracing::error!(
                invocation_id = %self.invocation_id,
                status,
                %record,
                "{}",
                self.error.message()
            );
        } else {
            let record = Value::Object(self.error.debug_data());
            tracing::error!(
                invocation_id = %self.invocation_id,
                status,
                %record,
                "unhandled error while provisioning keyvault"
            );
        }
    }

    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), json!(self.error.message()));
        body.insert("invocation_id".into(), json!(self.invocation_id));
        if self.error.is_classified() {
            body.extend(self.error.data());
        }
        Value::Object(body)
    }
}

impl IntoResponse for InvocationError {
    fn into_response(self) -> Response {
        self.log();
        (self.error.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_name_data_lists_chars_in_order() {
        let err = ProvisionError::InvalidName {
            keyvault_name: "AB_c".into(),
            invalid_chars: vec!['A', 'B', '_'],
        };
        let data = err.data();
        assert_eq!(data["invalid_chars"], json!(["A", "B", "_"]));
        assert_eq!(data["keyvault_name"], "AB_c");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_unexpected_body_hides_cause() {
        let err = ProvisionError::from(anyhow::anyhow!("secret connection string leaked"))
            .with_invocation("inv-1");
        let body = err.body();
        assert_eq!(body, json!({"message": "unexpected error", "invocation_id": "inv-1"}));
        assert!(!body.to_string().contains("leaked"));
    }

    #[test]
    fn test_name_unavailable_keeps_reason_out_of_body() {
        let err = ProvisionError::NameUnavailable {
            keyvault_name: "taken".into(),
            reason: Some("AlreadyExists".into()),
            detail: Some("owned by someone else".into()),
        }
        .with_invocation("inv-2");
        let body = err.body();
        assert_eq!(body["keyvault_name"], "taken");
        assert!(body.get("unavailable_reason").is_none());
        assert_eq!(err.error.debug_data()["unavailable_reason"], "AlreadyExists");
        assert_eq!(err.error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_log_record_for_classified_and_unexpected() {
        ProvisionError::InvalidNameLength {
            keyvault_name: "ab".into(),
            length: 2,
        }
        .with_invocation("inv-3")
        .log();
        ProvisionError::from(anyhow::anyhow!("arm down"))
            .with_invocation("inv-4")
            .log();
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = ProvisionError::ProvisionTimeout {
            keyvault_name: "slow-vault".into(),
            timeout_secs: 300,
        };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.data()["timeout_secs"], 300);
    }
}
