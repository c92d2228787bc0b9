//! Tool-call loop primitives (runner, events, limits).

pub mod events;
pub mod limits;
pub mod runner;

pub use events::{ChatEvent, ChatEventSink, TurnEvent, TurnEventEmitter};
pub use limits::{LoopLimits, DEFAULT_MAX_TOOL_ROUNDS};
pub use runner::{LoopOutcome, LoopState, ToolCallLoop};
