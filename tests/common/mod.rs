//! Shared test helpers: scripted provider, recording tools, event capture.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use toolchat::agent::HistoryStore;
use toolchat::agent_loop::{ChatEventSink, TurnEvent};
use toolchat::error::{ChatError, ProviderError, ToolError};
use toolchat::provider::{ModelProvider, ProviderRequest};
use toolchat::stream_transform::aggregate;
use toolchat::tools::{FunctionTool, Tool, ToolParameters};
use toolchat::types::{ConversationHistory, FunctionArgs, Message, Part, StreamChunk};

/// One scripted provider response.
pub enum Step {
    Reply(Vec<Part>),
    Stream(Vec<StreamChunk>),
    Fail(ProviderError),
}

/// Provider that replays a fixed script and records every request.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    fn next(&self, request: &ProviderRequest) -> Result<Step, ChatError> {
        self.requests.lock().unwrap().push(request.clone());
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::protocol("script exhausted"))
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Message, ChatError> {
        match self.next(request)? {
            Step::Reply(parts) => Ok(Message::model(parts)),
            Step::Stream(chunks) => Ok(aggregate(chunks)),
            Step::Fail(err) => Err(err.into()),
        }
    }

    async fn stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ChatError>>, ChatError> {
        let chunks = match self.next(request)? {
            Step::Reply(parts) => vec![StreamChunk::new(parts)],
            Step::Stream(chunks) => chunks,
            Step::Fail(err) => return Err(err.into()),
        };
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

pub fn text(reply: &str) -> Step {
    Step::Reply(vec![Part::text(reply)])
}

pub fn calls(calls: &[(&str, Value)]) -> Step {
    Step::Reply(
        calls
            .iter()
            .map(|(name, value)| Part::function_call(*name, args(value.clone())))
            .collect(),
    )
}

pub fn rate_limited(retry_delay: Value) -> Step {
    Step::Fail(
        ProviderError::new("Resource has been exhausted (e.g. check quota).")
            .with_status(429)
            .with_details(vec![serde_json::json!({ "retryDelay": retry_delay })]),
    )
}

pub fn args(value: Value) -> FunctionArgs {
    value.as_object().cloned().unwrap_or_default()
}

/// Tool returning `result` and recording the arguments it was called with.
pub fn recording_tool(name: &str, result: Value) -> (Arc<dyn Tool>, Arc<Mutex<Vec<FunctionArgs>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let tool = FunctionTool::new(name, format!("{name} tool"), ToolParameters::empty(), move |args, _ctx| {
        let sink = sink.clone();
        let result = result.clone();
        async move {
            sink.lock().unwrap().push(args.raw().clone());
            Ok(result)
        }
    });
    (Arc::new(tool), seen)
}

pub fn failing_tool(name: &str, message: &str) -> Arc<dyn Tool> {
    let message = message.to_string();
    Arc::new(FunctionTool::new(name, "always fails", ToolParameters::empty(), move |_args, _ctx| {
        let message = message.clone();
        async move { Err(ToolError::failed(message)) }
    }))
}

/// Sink collecting every event.
pub fn collecting_sink() -> (ChatEventSink, Arc<Mutex<Vec<TurnEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink: ChatEventSink = Arc::new(move |event| sink_events.lock().unwrap().push(event));
    (sink, events)
}

/// Store whose saves always fail; loads return an empty history.
#[derive(Default)]
pub struct FailingStore {
    pub save_attempts: Mutex<usize>,
}

#[async_trait]
impl HistoryStore for FailingStore {
    async fn load(&self, _conversation_id: &str) -> Result<ConversationHistory, ChatError> {
        Ok(ConversationHistory::new())
    }

    async fn save(&self, conversation_id: &str, _history: &ConversationHistory) -> Result<(), ChatError> {
        *self.save_attempts.lock().unwrap() += 1;
        Err(ChatError::persistence(conversation_id, "disk full"))
    }
}
