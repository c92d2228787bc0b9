//! Stream aggregation: folds partial response chunks into one logical message.
//!
//! The aggregated message is indistinguishable from a unary response, so the
//! rest of the engine never needs to know which transport mode was used.
//!
//! Function calls are merged by name. A response can therefore carry at most
//! one call per distinct function name; two calls to the same function in one
//! streamed response are folded into a single call with unioned arguments.

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::ChatError;
use crate::types::{Message, Part, StreamChunk};

/// Accumulates stream chunks into the parts of a single model message.
#[derive(Debug, Default)]
pub struct StreamingResponseAggregator {
    parts: Vec<Part>,
    chunks_seen: usize,
}

impl StreamingResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one chunk into the accumulator.
    pub fn push(&mut self, chunk: StreamChunk) {
        self.chunks_seen += 1;
        for part in chunk.parts {
            self.merge_part(part);
        }
    }

    fn merge_part(&mut self, part: Part) {
        match part {
            Part::Text { text } => {
                let existing = self.parts.iter_mut().find_map(|part| match part {
                    Part::Text { text } => Some(text),
                    _ => None,
                });
                match existing {
                    Some(accumulated) => accumulated.push_str(&text),
                    None => self.parts.push(Part::Text { text }),
                }
            }
            Part::FunctionCall(call) => {
                let existing = self.parts.iter_mut().find_map(|part| match part {
                    Part::FunctionCall(existing) if existing.name == call.name => Some(existing),
                    _ => None,
                });
                match existing {
                    Some(existing) => existing.args.extend(call.args),
                    None => self.parts.push(Part::FunctionCall(call)),
                }
            }
            other => self.parts.push(other),
        }
    }

    pub fn chunks_seen(&self) -> usize {
        self.chunks_seen
    }

    /// Finish aggregation and produce the model message.
    pub fn finish(self) -> Message {
        Message::model(self.parts)
    }
}

/// Aggregate an in-memory chunk sequence.
pub fn aggregate(chunks: impl IntoIterator<Item = StreamChunk>) -> Message {
    let mut aggregator = StreamingResponseAggregator::new();
    for chunk in chunks {
        aggregator.push(chunk);
    }
    aggregator.finish()
}

/// Drain a provider stream, handing every raw chunk to `observer` before it is
/// merged. The first stream error aborts aggregation and is returned.
pub async fn aggregate_stream<F>(
    stream: BoxStream<'static, Result<StreamChunk, ChatError>>,
    mut observer: F,
) -> Result<Message, ChatError>
where
    F: FnMut(&StreamChunk),
{
    let mut aggregator = StreamingResponseAggregator::new();
    let mut inner = std::pin::pin!(stream);
    while let Some(item) = inner.next().await {
        let chunk = item?;
        observer(&chunk);
        aggregator.push(chunk);
    }
    tracing::debug!(chunks = aggregator.chunks_seen(), "stream aggregated");
    Ok(aggregator.finish())
}
