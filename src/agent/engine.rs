//! Conversation orchestration: one turn from user message to persisted history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::HistoryStore;
use crate::agent_loop::{ChatEvent, ChatEventSink, LoopLimits, ToolCallLoop, TurnEventEmitter};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::provider::ModelProvider;
use crate::template::{CorrectableTurn, SchemaRouter, TemplateValidator};
use crate::tools::{ToolCallDispatcher, ToolContext};
use crate::trigger::{ArtifactRenderer, PendingContext, TrendRow, TriggerAdapter};
use crate::types::{ChatResult, ConversationHistory, ToolCallRecord};
use crate::util::retry::{RateLimitGuard, RateLimitNotice, RateLimitPolicy};

/// Per-call options.
#[derive(Clone, Default)]
pub struct TurnOptions {
    /// Cancels model calls, tool rounds and backoff sleeps of this turn.
    pub cancel: Option<CancellationToken>,
    /// Receives this turn's events in addition to the engine-wide sink.
    pub event_sink: Option<ChatEventSink>,
}

impl std::fmt::Debug for TurnOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOptions")
            .field("cancel", &self.cancel)
            .field("event_sink", &self.event_sink.as_ref().map(|_| ".."))
            .finish()
    }
}

/// The orchestration engine.
///
/// Schemas, the default trigger payload and the tool registry are fixed at
/// construction and shared read-only by every turn. Turns on different
/// conversations run concurrently; turns on the same conversation are
/// serialized from history load to history save.
pub struct ChatEngine {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn HistoryStore>,
    tools: ToolCallDispatcher,
    router: Arc<dyn SchemaRouter>,
    trigger: TriggerAdapter,
    validator: TemplateValidator,
    policy: RateLimitPolicy,
    limits: LoopLimits,
    streaming: bool,
    system_instruction: Option<String>,
    renderer: Option<Arc<dyn ArtifactRenderer>>,
    event_sink: Option<ChatEventSink>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("tools", &self.tools)
            .field("trigger", &self.trigger)
            .field("validator", &self.validator)
            .field("policy", &self.policy)
            .field("limits", &self.limits)
            .field("streaming", &self.streaming)
            .finish()
    }
}

#[bon::bon]
impl ChatEngine {
    #[builder]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn HistoryStore>,
        #[builder(default)] config: ChatConfig,
        #[builder(default)] tools: ToolCallDispatcher,
        // Defaults to the keyword router built from `config.template.routes`.
        router: Option<Arc<dyn SchemaRouter>>,
        default_payload: Option<serde_json::Value>,
        renderer: Option<Arc<dyn ArtifactRenderer>>,
        event_sink: Option<ChatEventSink>,
    ) -> Self {
        let router = router.unwrap_or_else(|| Arc::new(config.template.router()));
        Self {
            provider,
            store,
            tools,
            router,
            trigger: TriggerAdapter::new(config.trigger.trigger_config(), default_payload),
            validator: TemplateValidator::new(config.template.max_corrections),
            policy: config.rate_limit.policy(),
            limits: config.tool_loop.limits(),
            streaming: config.streaming,
            system_instruction: config.system_instruction,
            renderer,
            event_sink,
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl ChatEngine {
    pub fn tools(&self) -> &ToolCallDispatcher {
        &self.tools
    }

    /// Stored history of a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<ConversationHistory, ChatError> {
        self.store
            .load(conversation_id)
            .await
            .map_err(|err| into_persistence(conversation_id, err))
    }

    /// Run one turn with default options.
    pub async fn chat(&self, conversation_id: &str, message: &str) -> Result<ChatResult, ChatError> {
        self.chat_with(conversation_id, message, TurnOptions::default())
            .await
    }

    /// Run one turn. History is saved whether the turn succeeds or fails.
    pub async fn chat_with(
        &self,
        conversation_id: &str,
        message: &str,
        options: TurnOptions,
    ) -> Result<ChatResult, ChatError> {
        let lock = self.conversation_lock(conversation_id);
        let guard = lock.lock().await;
        let result = self.run_turn(conversation_id, message, options).await;
        drop(guard);
        self.release_conversation_lock(conversation_id, lock);
        result
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        message: &str,
        options: TurnOptions,
    ) -> Result<ChatResult, ChatError> {
        let turn_id = Uuid::new_v4();
        let emitter = Arc::new(TurnEventEmitter::new(
            turn_id,
            self.event_sink.iter().cloned().chain(options.event_sink),
        ));
        let cancel = options.cancel.unwrap_or_default();
        emitter.emit(ChatEvent::TurnStarted {
            conversation_id: conversation_id.to_string(),
        });

        let mut history = match self.history(conversation_id).await {
            Ok(history) => history,
            Err(err) => {
                emitter.emit(ChatEvent::TurnFailed {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };
        tracing::debug!(conversation_id, %turn_id, messages = history.len(), "turn started");

        let outcome = self
            .execute(conversation_id, message, &mut history, &emitter, cancel)
            .await;
        let saved = self
            .store
            .save(conversation_id, &history)
            .await
            .map_err(|err| into_persistence(conversation_id, err));

        match (outcome, saved) {
            (Ok(result), Ok(())) => {
                emitter.emit(ChatEvent::TurnCompleted {
                    valid: result.valid,
                    rounds: result.rounds,
                });
                tracing::debug!(
                    conversation_id,
                    %turn_id,
                    rounds = result.rounds,
                    tool_calls = result.tool_calls.len(),
                    valid = result.valid,
                    "turn completed"
                );
                Ok(result)
            }
            (Ok(_), Err(save_err)) => {
                tracing::error!(conversation_id, %turn_id, error = %save_err, "failed to persist history");
                emitter.emit(ChatEvent::TurnFailed {
                    error: save_err.to_string(),
                });
                Err(save_err)
            }
            (Err(err), saved) => {
                if let Err(save_err) = saved {
                    tracing::error!(
                        conversation_id,
                        %turn_id,
                        error = %save_err,
                        "failed to persist history of failed turn"
                    );
                }
                tracing::warn!(conversation_id, %turn_id, error = %err, "turn failed");
                emitter.emit(ChatEvent::TurnFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        conversation_id: &str,
        message: &str,
        history: &mut ConversationHistory,
        emitter: &Arc<TurnEventEmitter>,
        cancel: CancellationToken,
    ) -> Result<ChatResult, ChatError> {
        let prepared = self.trigger.prepare(message);
        let schema = self.router.route(message);
        let user_text = match &schema {
            Some(schema) => schema.inject_hint(&prepared.augmented_message),
            None => prepared.augmented_message,
        };

        let observer_emitter = Arc::clone(emitter);
        let guard = RateLimitGuard::new(self.policy.clone())
            .with_observer(Arc::new(move |notice: RateLimitNotice| {
                observer_emitter.emit(notice.into())
            }))
            .with_cancellation(cancel.clone());
        let tool_loop = ToolCallLoop::new(self.provider.as_ref(), &self.tools, &guard)
            .with_limits(self.limits)
            .with_streaming(self.streaming)
            .with_system_instruction(self.system_instruction.as_deref());
        let tool_ctx = ToolContext {
            conversation_id: conversation_id.to_string(),
            turn_id: emitter.turn_id(),
            cancel,
        };

        let first = tool_loop.run(history, user_text, emitter, &tool_ctx).await?;
        let mut turn = LoopTurn {
            tool_loop: &tool_loop,
            history,
            emitter: emitter.as_ref(),
            tool_ctx: &tool_ctx,
            tool_calls: first.tool_calls,
            rounds: first.rounds,
        };
        let template = self
            .validator
            .enforce(first.text, schema.as_ref(), &mut turn)
            .await?;
        let LoopTurn {
            tool_calls, rounds, ..
        } = turn;

        let structured_table = match prepared.pending {
            Some(pending) => {
                let rows = self.trigger.finalize(&template.text, &pending);
                self.render(&pending, &rows).await;
                Some(rows)
            }
            None => None,
        };

        Ok(ChatResult {
            turn_id: emitter.turn_id(),
            text: template.text,
            tool_calls,
            valid: template.valid,
            missing_sections: template.missing_sections,
            structured_table,
            rounds,
        })
    }

    async fn render(&self, pending: &PendingContext, rows: &[TrendRow]) {
        let Some(renderer) = &self.renderer else {
            return;
        };
        if let Err(err) = renderer.render(&pending.payload, rows).await {
            tracing::warn!(error = %err, rows = rows.len(), "artifact rendering failed");
        }
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    /// Drop the map entry once no other turn holds or awaits it.
    fn release_conversation_lock(&self, conversation_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(conversation_id);
        }
    }
}

#[cfg(feature = "google")]
impl ChatEngine {
    /// Engine with the Gemini provider, a file history store and the
    /// configured default payload.
    pub fn from_config(config: ChatConfig, tools: ToolCallDispatcher) -> Result<Self, ChatError> {
        use crate::trigger::{FilePayloadSource, PayloadSource};

        let provider = crate::provider::create_provider(&config)?;
        let history_dir = config
            .history_dir
            .clone()
            .unwrap_or_else(super::store::FileHistoryStore::default_dir);
        let default_payload = match &config.trigger.default_payload_path {
            Some(path) => FilePayloadSource::new(path).load()?,
            None => None,
        };
        Ok(Self::builder()
            .provider(provider)
            .store(Arc::new(super::store::FileHistoryStore::new(history_dir)))
            .config(config)
            .tools(tools)
            .maybe_default_payload(default_payload)
            .build())
    }
}

fn into_persistence(conversation_id: &str, err: ChatError) -> ChatError {
    match err {
        ChatError::Persistence { .. } => err,
        other => ChatError::persistence(conversation_id, other.to_string()),
    }
}

/// The current turn, re-enterable for template corrections.
struct LoopTurn<'a> {
    tool_loop: &'a ToolCallLoop<'a>,
    history: &'a mut ConversationHistory,
    emitter: &'a TurnEventEmitter,
    tool_ctx: &'a ToolContext,
    tool_calls: Vec<ToolCallRecord>,
    rounds: usize,
}

#[async_trait]
impl CorrectableTurn for LoopTurn<'_> {
    async fn rerun(&mut self, corrective: String) -> Result<String, ChatError> {
        let outcome = self
            .tool_loop
            .run(self.history, corrective, self.emitter, self.tool_ctx)
            .await?;
        self.tool_calls.extend(outcome.tool_calls);
        self.rounds += outcome.rounds;
        Ok(outcome.text)
    }

    fn on_correction(&mut self, attempt: u32, missing_sections: &[String]) {
        self.emitter.emit(ChatEvent::TemplateCorrection {
            attempt,
            missing_sections: missing_sections.to_vec(),
        });
    }
}
