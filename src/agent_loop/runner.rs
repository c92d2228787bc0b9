//! The per-turn tool-call loop.
//!
//! One run appends a user message, then alternates model invocations and tool
//! rounds until the model answers with no function calls:
//!
//! ```text
//! AwaitingResponse -> HasFunctionCalls -> ExecutingTools -> AwaitingResponse
//!                  \-> FinalText
//! ```
//!
//! A model message carrying calls is appended together with its function
//! message, never alone, so the history stays paired even when a round fails.

use tokio_util::sync::CancellationToken;

use super::events::{ChatEvent, TurnEventEmitter};
use super::limits::LoopLimits;
use crate::error::ChatError;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::stream_transform::aggregate_stream;
use crate::tools::{ToolCallDispatcher, ToolContext};
use crate::types::{ConversationHistory, FunctionCall, Message, ToolCallRecord};
use crate::util::retry::RateLimitGuard;

/// Loop state between transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingResponse,
    HasFunctionCalls(Message),
    ExecutingTools(Message),
    FinalText(Message),
}

/// Result of one completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool execution rounds performed.
    pub rounds: usize,
}

/// Drives model invocations and tool rounds for one turn.
pub struct ToolCallLoop<'a> {
    provider: &'a dyn ModelProvider,
    dispatcher: &'a ToolCallDispatcher,
    guard: &'a RateLimitGuard,
    limits: LoopLimits,
    streaming: bool,
    system_instruction: Option<&'a str>,
}

impl std::fmt::Debug for ToolCallLoop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallLoop")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("limits", &self.limits)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl<'a> ToolCallLoop<'a> {
    pub fn new(
        provider: &'a dyn ModelProvider,
        dispatcher: &'a ToolCallDispatcher,
        guard: &'a RateLimitGuard,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            guard,
            limits: LoopLimits::default(),
            streaming: true,
            system_instruction: None,
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_system_instruction(mut self, instruction: Option<&'a str>) -> Self {
        self.system_instruction = instruction;
        self
    }

    /// Append `user_text` and run until the model produces final text.
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        user_text: impl Into<String>,
        emitter: &TurnEventEmitter,
        tool_ctx: &ToolContext,
    ) -> Result<LoopOutcome, ChatError> {
        history.push(Message::user(user_text));

        let mut outcome = LoopOutcome::default();
        let mut state = LoopState::AwaitingResponse;

        loop {
            state = match state {
                LoopState::AwaitingResponse => {
                    let response = self.llm_phase(history, emitter, &tool_ctx.cancel).await?;
                    if response.parts.is_empty() {
                        return Err(ChatError::protocol("model returned a response with no parts"));
                    }
                    if response.has_function_calls() {
                        LoopState::HasFunctionCalls(response)
                    } else {
                        LoopState::FinalText(response)
                    }
                }
                LoopState::HasFunctionCalls(response) => {
                    if !self.limits.allows_round(outcome.rounds) {
                        tracing::warn!(
                            turn_id = %emitter.turn_id(),
                            rounds = outcome.rounds,
                            "tool loop exhausted"
                        );
                        return Err(ChatError::ToolLoopExhausted {
                            rounds: outcome.rounds,
                        });
                    }
                    LoopState::ExecutingTools(response)
                }
                LoopState::ExecutingTools(response) => {
                    outcome.rounds += 1;
                    let records = self
                        .tool_phase(&response, outcome.rounds, emitter, tool_ctx)
                        .await?;
                    let responses = records.iter().map(ToolCallRecord::to_function_response).collect();
                    history.push(response);
                    history.push(Message::function_responses(responses));
                    outcome.tool_calls.extend(records);
                    LoopState::AwaitingResponse
                }
                LoopState::FinalText(response) => {
                    outcome.text = response.text();
                    history.push(response);
                    tracing::debug!(
                        turn_id = %emitter.turn_id(),
                        rounds = outcome.rounds,
                        tool_calls = outcome.tool_calls.len(),
                        "tool loop finished"
                    );
                    return Ok(outcome);
                }
            };
        }
    }

    async fn llm_phase(
        &self,
        history: &ConversationHistory,
        emitter: &TurnEventEmitter,
        cancel: &CancellationToken,
    ) -> Result<Message, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Canceled);
        }

        let request = ProviderRequest {
            history: history.messages().to_vec(),
            system_instruction: self.system_instruction.map(str::to_string),
            tools: self.dispatcher.declarations(),
        };
        tracing::debug!(
            turn_id = %emitter.turn_id(),
            provider = self.provider.provider_name(),
            model = self.provider.model_id(),
            messages = request.history.len(),
            streaming = self.streaming,
            "invoking model"
        );

        let request = &request;
        let provider = self.provider;
        let streaming = self.streaming;
        let invocation = self.guard.invoke("model", || async move {
            if streaming {
                let stream = provider.stream(request).await?;
                aggregate_stream(stream, |chunk| {
                    emitter.emit(ChatEvent::Chunk {
                        chunk: chunk.clone(),
                    })
                })
                .await
            } else {
                provider.generate(request).await
            }
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(ChatError::Canceled),
            response = invocation => response,
        }
    }

    async fn tool_phase(
        &self,
        response: &Message,
        round: usize,
        emitter: &TurnEventEmitter,
        tool_ctx: &ToolContext,
    ) -> Result<Vec<ToolCallRecord>, ChatError> {
        let calls: Vec<FunctionCall> = response.function_calls().into_iter().cloned().collect();
        tracing::debug!(
            turn_id = %emitter.turn_id(),
            round,
            calls = calls.len(),
            parallel = self.limits.parallel_tools,
            "executing tool round"
        );

        for call in &calls {
            emitter.emit(ChatEvent::ToolCallStarted {
                round,
                call: call.clone(),
            });
        }

        let records = tokio::select! {
            _ = tool_ctx.cancel.cancelled() => return Err(ChatError::Canceled),
            records = self.dispatcher.dispatch_batch(&calls, self.limits.parallel_tools, tool_ctx) => records?,
        };

        for record in &records {
            emitter.emit(ChatEvent::ToolCallCompleted {
                round,
                record: record.clone(),
            });
        }
        Ok(records)
    }
}
