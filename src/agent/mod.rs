//! Conversation orchestration and history persistence.

pub mod engine;
pub mod store;

pub use engine::{ChatEngine, TurnOptions};
pub use store::{FileHistoryStore, HistoryStore, InMemoryHistoryStore};
