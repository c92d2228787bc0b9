//! Name-based routing of function calls to registered tools.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolContext};
use super::types::ToolDeclaration;
use super::validation::validate_arguments;
use crate::error::{ChatError, ToolError};
use crate::types::{FunctionArgs, FunctionCall, ToolCallRecord};

/// Registry of tools keyed by name.
///
/// A call naming an unregistered tool is a fatal [`ChatError::UnknownTool`];
/// everything a registered tool reports is a recoverable [`ToolError`].
#[derive(Clone, Default)]
pub struct ToolCallDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl std::fmt::Debug for ToolCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallDispatcher")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolCallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replacing registered tool");
        } else {
            self.order.push(name);
        }
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.declaration())
            .collect()
    }

    /// Execute one call. The outer `Result` is fatal, the inner one is the
    /// tool's own outcome.
    pub async fn execute(
        &self,
        name: &str,
        args: &FunctionArgs,
        ctx: &ToolContext,
    ) -> Result<Result<serde_json::Value, ToolError>, ChatError> {
        let tool = self.tools.get(name).ok_or_else(|| ChatError::UnknownTool {
            name: name.to_string(),
        })?;

        if let Err(err) = validate_arguments(args, &tool.parameters().schema) {
            tracing::warn!(tool = %name, error = %err, "rejecting tool call arguments");
            return Ok(Err(err));
        }

        let outcome = tool.execute(&ToolArguments::new(args.clone()), ctx).await;
        if let Err(err) = &outcome {
            tracing::warn!(tool = %name, error = %err, "tool call failed");
        }
        Ok(outcome)
    }

    /// Execute one call into a record.
    pub async fn dispatch(
        &self,
        call: &FunctionCall,
        ctx: &ToolContext,
    ) -> Result<ToolCallRecord, ChatError> {
        let outcome = self.execute(&call.name, &call.args, ctx).await?;
        Ok(ToolCallRecord::from_outcome(call, outcome))
    }

    /// Execute every call of one model response, returning records in call
    /// order. Unknown names are rejected before anything runs.
    pub async fn dispatch_batch(
        &self,
        calls: &[FunctionCall],
        parallel: bool,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolCallRecord>, ChatError> {
        if let Some(unknown) = calls.iter().find(|call| !self.contains(&call.name)) {
            return Err(ChatError::UnknownTool {
                name: unknown.name.clone(),
            });
        }

        if parallel && calls.len() > 1 {
            return join_all(calls.iter().map(|call| self.dispatch(call, ctx)))
                .await
                .into_iter()
                .collect();
        }

        let mut records = Vec::with_capacity(calls.len());
        for call in calls {
            if ctx.cancel.is_cancelled() {
                return Err(ChatError::Canceled);
            }
            records.push(self.dispatch(call, ctx).await?);
        }
        Ok(records)
    }
}
