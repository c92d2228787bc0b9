//! Turn event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FunctionCall, StreamChunk, ToolCallRecord};
use crate::util::retry::RateLimitNotice;

/// Event payloads emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    TurnStarted {
        conversation_id: String,
    },
    /// Raw streamed chunk, forwarded before aggregation.
    Chunk {
        chunk: StreamChunk,
    },
    RateLimit {
        retry_in_seconds: u64,
        message: String,
    },
    ToolCallStarted {
        round: usize,
        call: FunctionCall,
    },
    ToolCallCompleted {
        round: usize,
        record: ToolCallRecord,
    },
    TemplateCorrection {
        attempt: u32,
        missing_sections: Vec<String>,
    },
    TurnCompleted {
        valid: bool,
        rounds: usize,
    },
    TurnFailed {
        error: String,
    },
}

impl From<RateLimitNotice> for ChatEvent {
    fn from(notice: RateLimitNotice) -> Self {
        Self::RateLimit {
            retry_in_seconds: notice.retry_in_seconds,
            message: notice.message,
        }
    }
}

/// Envelope for turn events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnEvent {
    pub turn_id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: ChatEvent,
}

/// Callback receiving turn events.
pub type ChatEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// Stamps payloads with the turn id and a per-turn sequence number.
pub struct TurnEventEmitter {
    turn_id: Uuid,
    seq: AtomicU64,
    sinks: Vec<ChatEventSink>,
}

impl std::fmt::Debug for TurnEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEventEmitter")
            .field("turn_id", &self.turn_id)
            .field("seq", &self.seq)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl TurnEventEmitter {
    pub fn new(turn_id: Uuid, sinks: impl IntoIterator<Item = ChatEventSink>) -> Self {
        Self {
            turn_id,
            seq: AtomicU64::new(1),
            sinks: sinks.into_iter().collect(),
        }
    }

    /// Emitter that drops everything.
    pub fn silent(turn_id: Uuid) -> Self {
        Self {
            turn_id,
            seq: AtomicU64::new(1),
            sinks: Vec::new(),
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn emit(&self, payload: ChatEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let event = TurnEvent {
            turn_id: self.turn_id,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            payload,
        };
        for sink in &self.sinks {
            sink(event.clone());
        }
    }
}
