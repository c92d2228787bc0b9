//! Error types for toolchat.
//!
//! Fatal failures travel as [`ChatError`] and abort the turn. Tool failures are
//! recoverable: they are captured as [`ToolError`] inside a tool call record and
//! fed back to the model instead of being propagated.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Raw error reported by a model provider.
///
/// Providers do not shape their errors uniformly, so every signal the rate-limit
/// classifier can use is kept: HTTP status, reason phrase, free-text message and
/// the provider's structured detail array.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub message: String,
    pub details: Vec<serde_json::Value>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            status_text: None,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = Some(status_text.into());
        self
    }

    pub fn with_details(mut self, details: Vec<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

/// Recoverable failure of a single tool call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Primary error type for all fatal toolchat failures.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Model protocol error: {0}")]
    Protocol(String),

    #[error("Tool loop exhausted after {rounds} rounds")]
    ToolLoopExhausted { rounds: usize },

    #[error("Rate limit wait budget exceeded: waited {waited_ms}ms, budget {budget_ms}ms")]
    RateLimitBudgetExceeded { waited_ms: u64, budget_ms: u64 },

    #[error("History persistence failed for conversation {conversation_id}: {message}")]
    Persistence {
        conversation_id: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Turn canceled")]
    Canceled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn persistence(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            conversation_id: conversation_id.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider(err) if crate::util::retry::classify(err).is_rate_limit => {
                ErrorCategory::RateLimit
            }
            Self::Provider(_) => ErrorCategory::Provider,
            Self::RateLimitBudgetExceeded { .. } => ErrorCategory::RateLimit,
            Self::UnknownTool { .. } => ErrorCategory::ToolRegistry,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::ToolLoopExhausted { .. } => ErrorCategory::ToolLoop,
            Self::Persistence { .. } => ErrorCategory::Persistence,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the rate-limit guard should absorb this error and retry.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Provider(err) if crate::util::retry::classify(err).is_rate_limit)
    }

    /// Whether this error ends the turn. Only rate limits are transient; the
    /// guard absorbs them before they reach a caller.
    pub fn is_fatal(&self) -> bool {
        !self.is_rate_limit()
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::RateLimit | ErrorCategory::Network => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolRegistry => RecoverySuggestion::CheckToolRegistry,
            ErrorCategory::Persistence => RecoverySuggestion::CheckHistoryStore,
            ErrorCategory::ToolLoop => RecoverySuggestion::RephraseRequest,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ChatError>;
