use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Function {0} not found")]
    NotFound(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Function {0} timed out")]
    TimedOut(String),
    #[error("Function {0} panicked")]
    Panicked(String),
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// The structured answer echoed back to the backend for every tool call.
///
/// Serializes as `{"success": true, ...data}` or
/// `{"success": false, "error": .., "sessionId": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(Map<String, Value>),
    Failure { error: String, session_id: String },
}

impl ToolResult {
    /// Wraps `data`. Objects are merged into the result; any other value is
    /// placed under `data`.
    pub fn success(data: Value) -> Self {
        match data {
            Value::Object(map) => ToolResult::Success(map),
            Value::Null => ToolResult::Success(Map::new()),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                ToolResult::Success(map)
            }
        }
    }

    pub fn failure(error: impl Into<String>, session_id: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
            session_id: session_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            ToolResult::Success(data) => {
                let mut map = Map::with_capacity(data.len() + 1);
                map.insert("success".to_string(), Value::Bool(true));
                for (key, value) in data {
                    if key != "success" {
                        map.insert(key.clone(), value.clone());
                    }
                }
                Value::Object(map)
            }
            ToolResult::Failure { error, session_id } => json!({
                "success": false,
                "error": error,
                "sessionId": session_id,
            }),
        }
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_merges_object_payload() {
        let result = ToolResult::success(json!({ "count": 3, "success": "ignored" }));
        assert_eq!(result.to_value(), json!({ "success": true, "count": 3 }));
    }

    #[test]
    fn test_success_wraps_non_object_payload() {
        let result = ToolResult::success(json!([1, 2]));
        assert_eq!(result.to_value(), json!({ "success": true, "data": [1, 2] }));
    }

    #[test]
    fn test_failure_shape() {
        let result = ToolResult::failure("boom", "sess-1");
        assert!(!result.is_success());
        let encoded = serde_json::to_string(&result).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&encoded).unwrap(),
            json!({ "success": false, "error": "boom", "sessionId": "sess-1" })
        );
    }

    #[test]
    fn test_failed_error_shows_context_chain() {
        let err = ToolError::from(anyhow::anyhow!("connection refused").context("get_variants"));
        assert_eq!(err.to_string(), "get_variants: connection refused");
    }
}
