//! Convenience re-exports for common use.

pub use crate::agent::{ChatEngine, FileHistoryStore, HistoryStore, InMemoryHistoryStore, TurnOptions};
pub use crate::agent_loop::{ChatEvent, ChatEventSink, LoopLimits, TurnEvent};
pub use crate::config::ChatConfig;
pub use crate::error::{ChatError, ProviderError, Result, ToolError};
pub use crate::provider::{ModelProvider, ProviderRequest};
pub use crate::template::{KeywordSchemaRouter, ResponseSchema, SchemaRouter};
pub use crate::tools::{FunctionTool, Tool, ToolArguments, ToolCallDispatcher, ToolContext, ToolParameters};
pub use crate::trigger::{ArtifactRenderer, TrendRow, TriggerPayload};
pub use crate::types::{
    ChatResult, ConversationHistory, FunctionCall, FunctionResponse, Message, Part, Role,
    StreamChunk, ToolCallRecord,
};
pub use crate::util::retry::{RateLimitGuard, RateLimitPolicy};
