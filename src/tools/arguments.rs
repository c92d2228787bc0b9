//! Typed access to function call arguments.

use crate::error::ToolError;
use crate::types::FunctionArgs;

/// Arguments of a single function call with typed getters.
///
/// Getter failures are [`ToolError::InvalidArguments`], so a tool can use `?`
/// and the failure is reported back to the model instead of aborting the turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    args: FunctionArgs,
}

impl ToolArguments {
    pub fn new(args: FunctionArgs) -> Self {
        Self { args }
    }

    pub fn raw(&self) -> &FunctionArgs {
        &self.args
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.args.clone())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.args.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// Integers sent as floats with no fractional part are accepted; models
    /// frequently emit `10.0` for an integer parameter.
    pub fn get_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.args
            .get(key)
            .and_then(|v| {
                v.as_i64().or_else(|| {
                    v.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
            })
            .ok_or_else(|| missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| missing("boolean", key))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<serde_json::Value>, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| missing("array", key))
    }

    /// Deserialize all arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, ToolError> {
        serde_json::from_value(self.to_value())
            .map_err(|e| ToolError::InvalidArguments(format!("failed to deserialize arguments: {e}")))
    }
}

impl From<FunctionArgs> for ToolArguments {
    fn from(args: FunctionArgs) -> Self {
        Self::new(args)
    }
}

fn missing(kind: &str, key: &str) -> ToolError {
    ToolError::InvalidArguments(format!("missing {kind} argument: {key}"))
}
