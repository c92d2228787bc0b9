//! Unified error classification and recovery.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Provider,
    Protocol,
    Network,
    ToolRegistry,
    ToolLoop,
    Persistence,
    Configuration,
    Serialization,
    Canceled,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckConfiguration,
    CheckToolRegistry,
    CheckHistoryStore,
    RephraseRequest,
    ContactSupport,
}
