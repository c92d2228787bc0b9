//! Message types for model communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ChatError;

/// Arguments of a function call, keyed by parameter name.
pub type FunctionArgs = serde_json::Map<String, serde_json::Value>;

/// A single part of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn function_call(name: impl Into<String>, args: FunctionArgs) -> Self {
        Self::FunctionCall(FunctionCall::new(name, args))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Self::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_function_response(&self) -> Option<&FunctionResponse> {
        match self {
            Self::FunctionResponse(response) => Some(response),
            _ => None,
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: FunctionArgs,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: FunctionArgs) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Outcome of a function call as fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(serde_json::Value),
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// The result (or error) of a function call, addressed by function name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl FunctionResponse {
    pub fn result(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Result(value),
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Error(message.into()),
        }
    }
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Function,
}

/// A message in a conversation.
///
/// `User` messages hold only text parts and `Function` messages hold only
/// function responses. The constructors uphold this; [`Message::validate`]
/// re-checks messages that were deserialized or built by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a model message from raw parts.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a model message holding only text.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::text(text)])
    }

    /// Create a function message from responses.
    pub fn function_responses(responses: Vec<FunctionResponse>) -> Self {
        Self {
            role: Role::Function,
            parts: responses
                .into_iter()
                .map(Part::FunctionResponse)
                .collect(),
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract the text content, concatenating all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function calls carried by this message, in order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts.iter().filter_map(Part::as_function_call).collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, Part::FunctionCall(_)))
    }

    /// Function responses carried by this message, in order.
    pub fn function_responses_iter(&self) -> impl Iterator<Item = &FunctionResponse> {
        self.parts.iter().filter_map(Part::as_function_response)
    }

    /// Check the role/part invariants.
    pub fn validate(&self) -> Result<(), ChatError> {
        let offending = match self.role {
            Role::User => self
                .parts
                .iter()
                .find(|part| !matches!(part, Part::Text { .. })),
            Role::Function => self
                .parts
                .iter()
                .find(|part| !matches!(part, Part::FunctionResponse(_))),
            Role::Model => None,
        };
        match offending {
            Some(part) => Err(ChatError::protocol(format!(
                "{} message carries a disallowed part: {}",
                self.role,
                part_kind(part)
            ))),
            None => Ok(()),
        }
    }
}

fn part_kind(part: &Part) -> &'static str {
    match part {
        Part::Text { .. } => "text",
        Part::FunctionCall(_) => "function_call",
        Part::FunctionResponse(_) => "function_response",
    }
}

/// Ordered conversation history owned by the engine for the span of a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Verify every message's role invariant and the call/response pairing:
    /// a model message with function calls is immediately followed by exactly
    /// one function message whose response names match the calls, in order.
    pub fn check_invariants(&self) -> Result<(), ChatError> {
        for message in &self.messages {
            message.validate()?;
        }

        let mut iter = self.messages.iter().enumerate().peekable();
        while let Some((index, message)) = iter.next() {
            match message.role {
                Role::Model if message.has_function_calls() => {
                    let expected: Vec<&str> = message
                        .function_calls()
                        .iter()
                        .map(|call| call.name.as_str())
                        .collect();
                    let Some((_, next)) = iter.next() else {
                        return Err(ChatError::protocol(format!(
                            "model message {index} has function calls but no function response follows"
                        )));
                    };
                    if next.role != Role::Function {
                        return Err(ChatError::protocol(format!(
                            "model message {index} with function calls is followed by a {} message",
                            next.role
                        )));
                    }
                    let actual: Vec<&str> = next
                        .function_responses_iter()
                        .map(|response| response.name.as_str())
                        .collect();
                    if actual != expected {
                        return Err(ChatError::protocol(format!(
                            "function responses {actual:?} do not match calls {expected:?} at message {index}"
                        )));
                    }
                }
                Role::Function => {
                    return Err(ChatError::protocol(format!(
                        "function message {index} does not follow a model message with function calls"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
