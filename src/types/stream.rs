//! Streaming types.

use serde::{Deserialize, Serialize};

use super::message::Part;

/// A partial slice of a model response delivered over a stream.
///
/// A logical part may be split across several chunks: text arrives as
/// fragments and function-call arguments may arrive as partial maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    pub parts: Vec<Part>,
}

impl StreamChunk {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Chunk carrying a single text fragment.
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(fragment)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
