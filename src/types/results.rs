//! Result types surfaced to callers of a turn.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{FunctionArgs, FunctionCall, FunctionResponse, ToolOutcome};
use crate::error::ToolError;
use crate::trigger::TrendRow;

/// Observable record of one resolved tool call.
///
/// Exactly one of `result` / `error` is set; the constructors are the only
/// way this crate builds records.
///
/// An absent field is omitted from the serialized record. A tool that
/// returns `null` serializes as `"result": null` with no `error` key, and
/// reads back with neither field set, which still counts as a success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: FunctionArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn succeeded(call: &FunctionCall, result: serde_json::Value) -> Self {
        Self {
            name: call.name.clone(),
            args: call.args.clone(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(call: &FunctionCall, error: impl Into<String>) -> Self {
        Self {
            name: call.name.clone(),
            args: call.args.clone(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_outcome(call: &FunctionCall, outcome: Result<serde_json::Value, ToolError>) -> Self {
        match outcome {
            Ok(value) => Self::succeeded(call, value),
            Err(err) => Self::failed(call, err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The function response fed back to the model for this record.
    pub fn to_function_response(&self) -> FunctionResponse {
        let outcome = match (&self.result, &self.error) {
            (_, Some(error)) => ToolOutcome::Error(error.clone()),
            (Some(result), None) => ToolOutcome::Result(result.clone()),
            (None, None) => ToolOutcome::Result(serde_json::Value::Null),
        };
        FunctionResponse {
            name: self.name.clone(),
            outcome,
        }
    }
}

/// Everything a caller gets back from one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResult {
    pub turn_id: Uuid,
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub valid: bool,
    pub missing_sections: Vec<String>,
    pub structured_table: Option<Vec<TrendRow>>,
    /// Tool execution rounds across the turn, corrective re-runs included.
    pub rounds: usize,
}
