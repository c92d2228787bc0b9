//! In-band trigger handling: payload resolution, prompt augmentation and
//! extraction of the resulting trend table.

pub mod combinations;
pub mod table;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::error::ChatError;

pub use combinations::Combination;
pub use table::TrendRow;

pub const DEFAULT_TRIGGER_TOKEN: &str = "TRIGGER_MOODBOARD";
pub const DEFAULT_MAX_COMBINATIONS: usize = 6;
pub const DEFAULT_ANCHOR_HEADING: &str = "Trend Table";

/// Trigger detection and table settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub token: String,
    pub max_combinations: usize,
    pub anchor_heading: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            token: DEFAULT_TRIGGER_TOKEN.to_string(),
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            anchor_heading: DEFAULT_ANCHOR_HEADING.to_string(),
        }
    }
}

/// Where a turn's payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadOrigin {
    /// Parsed from the message body.
    Inline,
    /// Inline parse failed; the configured default was used.
    Default,
    /// Inline parse failed and no default is configured.
    Empty,
}

/// The brief attached to a triggered turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub value: Value,
    pub origin: PayloadOrigin,
}

/// Turn-scoped state carried from `prepare` to `finalize`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingContext {
    pub payload: TriggerPayload,
    pub combinations: Vec<Combination>,
}

/// Output of [`TriggerAdapter::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMessage {
    pub augmented_message: String,
    pub pending: Option<PendingContext>,
}

/// Supplies the fallback payload.
pub trait PayloadSource: Send + Sync {
    fn load(&self) -> Result<Option<Value>, ChatError>;
}

/// Fixed in-memory payload.
#[derive(Debug, Clone, Default)]
pub struct StaticPayloadSource(pub Option<Value>);

impl PayloadSource for StaticPayloadSource {
    fn load(&self) -> Result<Option<Value>, ChatError> {
        Ok(self.0.clone())
    }
}

/// Payload read from a JSON file. A missing file is no payload.
#[derive(Debug, Clone)]
pub struct FilePayloadSource {
    path: PathBuf,
}

impl FilePayloadSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PayloadSource for FilePayloadSource {
    fn load(&self) -> Result<Option<Value>, ChatError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "default trigger payload not found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            ChatError::Configuration(format!(
                "invalid default trigger payload {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// Receives the parsed table of a triggered turn.
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self, payload: &TriggerPayload, rows: &[TrendRow]) -> Result<(), ChatError>;
}

/// Detects the trigger token and manages the turn's auxiliary payload.
#[derive(Debug, Clone, Default)]
pub struct TriggerAdapter {
    config: TriggerConfig,
    default_payload: Option<Value>,
}

impl TriggerAdapter {
    pub fn new(config: TriggerConfig, default_payload: Option<Value>) -> Self {
        Self {
            config,
            default_payload,
        }
    }

    /// Load the default payload once, up front.
    pub fn from_source(config: TriggerConfig, source: &dyn PayloadSource) -> Result<Self, ChatError> {
        Ok(Self::new(config, source.load()?))
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Augment a triggered message; untriggered messages pass through unchanged.
    pub fn prepare(&self, message: &str) -> PreparedMessage {
        let Some(body) = self.body_after_token(message) else {
            return PreparedMessage {
                augmented_message: message.to_string(),
                pending: None,
            };
        };

        let payload = match parse_payload(body) {
            Some(value) => TriggerPayload {
                value,
                origin: PayloadOrigin::Inline,
            },
            None => match &self.default_payload {
                Some(value) => TriggerPayload {
                    value: value.clone(),
                    origin: PayloadOrigin::Default,
                },
                None => TriggerPayload {
                    value: Value::Object(serde_json::Map::new()),
                    origin: PayloadOrigin::Empty,
                },
            },
        };
        let combinations = combinations::enumerate(&payload.value, self.config.max_combinations);
        tracing::debug!(
            origin = %payload.origin,
            combinations = combinations.len(),
            "trigger detected"
        );

        let augmented_message = format!("{message}\n\n{}", self.instruction_block(&payload, &combinations));
        PreparedMessage {
            augmented_message,
            pending: Some(PendingContext {
                payload,
                combinations,
            }),
        }
    }

    /// Parse the trend table out of the final answer.
    pub fn finalize(&self, text: &str, pending: &PendingContext) -> Vec<TrendRow> {
        let rows = table::extract(text, &self.config.anchor_heading);
        if rows.is_empty() {
            tracing::warn!(
                anchor = %self.config.anchor_heading,
                origin = %pending.payload.origin,
                "no trend table found in answer"
            );
        }
        rows
    }

    /// Text following the trigger line, or `None` without a trigger.
    fn body_after_token<'m>(&self, message: &'m str) -> Option<&'m str> {
        let token = self.config.token.trim();
        if token.is_empty() {
            return None;
        }
        let start = find_case_insensitive(message, token)?;
        let rest = &message[start + token.len()..];
        Some(match rest.find('\n') {
            Some(newline) if rest[..newline].trim().is_empty() => &rest[newline + 1..],
            _ => rest,
        })
    }

    fn instruction_block(&self, payload: &TriggerPayload, combinations: &[Combination]) -> String {
        let brief = serde_json::to_string_pretty(&payload.value).unwrap_or_else(|_| payload.value.to_string());
        let mut block = format!("[Trend brief]\n{brief}\n");
        if !combinations.is_empty() {
            block.push_str("\nEvaluate these combinations:\n");
            for (index, combination) in combinations.iter().enumerate() {
                block.push_str(&format!("{}. {}\n", index + 1, combinations::describe(combination)));
            }
        }
        block.push_str(&format!(
            "\nEnd your answer with a section headed \"## {}\" containing exactly this table layout, one row per trend:\n{}",
            self.config.anchor_heading,
            table::header_markdown()
        ));
        block
    }
}

/// Byte offset of `needle` in `haystack`, ignoring ASCII case.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .filter(|&start| haystack.is_char_boundary(start) && haystack.is_char_boundary(start + needle.len()))
}

/// JSON from the trigger body, tolerating code fences and trailing prose.
fn parse_payload(body: &str) -> Option<Value> {
    let text = strip_code_fence(body.trim());
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let start = text.find(['{', '['])?;
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    stream.next()?.ok()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.rsplit_once("```").map_or(rest, |(inner, _)| inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn adapter(default_payload: Option<Value>) -> TriggerAdapter {
        TriggerAdapter::new(
            TriggerConfig {
                token: "TRIGGER".into(),
                ..TriggerConfig::default()
            },
            default_payload,
        )
    }

    #[test]
    fn untriggered_message_is_unchanged() {
        let prepared = adapter(None).prepare("List my tables");
        assert_eq!(prepared.augmented_message, "List my tables");
        assert!(prepared.pending.is_none());
    }

    #[test]
    fn inline_payload_is_parsed() {
        let prepared = adapter(Some(json!({"default": true}))).prepare("TRIGGER\n{\"x\":1}");
        let pending = prepared.pending.unwrap();
        assert_eq!(pending.payload.value, json!({"x": 1}));
        assert_eq!(pending.payload.origin, PayloadOrigin::Inline);
        assert!(pending.combinations.len() <= DEFAULT_MAX_COMBINATIONS);
        assert!(prepared.augmented_message.contains("## Trend Table"));
    }

    #[test]
    fn token_match_is_case_insensitive() {
        let prepared = adapter(None).prepare("please trigger\n{\"x\": 2}");
        assert_eq!(prepared.pending.unwrap().payload.value, json!({"x": 2}));
    }

    #[test]
    fn invalid_payload_falls_back_to_default() {
        let prepared = adapter(Some(json!({"season": ["SS25", "AW25"]}))).prepare("TRIGGER\nnot-json");
        let pending = prepared.pending.unwrap();
        assert_eq!(pending.payload.origin, PayloadOrigin::Default);
        assert_eq!(pending.payload.value, json!({"season": ["SS25", "AW25"]}));
        assert_eq!(pending.combinations.len(), 2);
    }

    #[test]
    fn invalid_payload_without_default_is_empty_object() {
        let pending = adapter(None).prepare("TRIGGER\nnot-json").pending.unwrap();
        assert_eq!(pending.payload.origin, PayloadOrigin::Empty);
        assert_eq!(pending.payload.value, json!({}));
        assert!(pending.combinations.is_empty());
    }

    #[test]
    fn fenced_payload_with_prose_is_parsed() {
        let message = "TRIGGER\n```json\n{\"colour\": [\"red\", \"blue\"]}\n```\nthanks!";
        let pending = adapter(None).prepare(message).pending.unwrap();
        assert_eq!(pending.payload.value, json!({"colour": ["red", "blue"]}));
    }

    #[test]
    fn payload_on_same_line_is_parsed() {
        let pending = adapter(None).prepare("TRIGGER {\"x\": 3} please").pending.unwrap();
        assert_eq!(pending.payload.value, json!({"x": 3}));
    }

    #[test]
    fn combinations_are_capped() {
        let adapter = TriggerAdapter::new(
            TriggerConfig {
                token: "TRIGGER".into(),
                max_combinations: 3,
                ..TriggerConfig::default()
            },
            None,
        );
        let pending = adapter
            .prepare("TRIGGER\n{\"a\": [1, 2, 3], \"b\": [1, 2, 3]}")
            .pending
            .unwrap();
        assert_eq!(pending.combinations.len(), 3);
    }

    #[test]
    fn finalize_reads_table_after_anchor() {
        let adapter = adapter(None);
        let pending = adapter.prepare("TRIGGER\n{}").pending.unwrap();
        let text = "## Trend Table\n| Name | Lifecycle | Momentum | Score | Rationale | Visual Ref |\n|---|---|---|---|---|---|\n| Denim | Peak | Flat | 6 | Staple | ref-1 |";
        let rows = adapter.finalize(text, &pending);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Denim");
        assert!(adapter.finalize("no table at all", &pending).is_empty());
    }

    #[test]
    fn file_source_handles_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FilePayloadSource::new(dir.path().join("missing.json"));
        assert_eq!(missing.load().unwrap(), None);

        let invalid_path = dir.path().join("invalid.json");
        std::fs::write(&invalid_path, "{not json").unwrap();
        assert!(matches!(
            FilePayloadSource::new(&invalid_path).load(),
            Err(ChatError::Configuration(_))
        ));

        let valid_path = dir.path().join("brief.json");
        std::fs::write(&valid_path, r#"{"market": "EU"}"#).unwrap();
        assert_eq!(
            FilePayloadSource::new(&valid_path).load().unwrap(),
            Some(json!({"market": "EU"}))
        );
    }

    #[test]
    fn adapter_from_source_falls_back_to_loaded_payload() {
        let config = TriggerConfig {
            token: "TRIGGER".into(),
            ..TriggerConfig::default()
        };
        let source = StaticPayloadSource(Some(json!({"market": ["EU", "US"]})));
        let adapter = TriggerAdapter::from_source(config.clone(), &source).unwrap();

        let pending = adapter.prepare("TRIGGER
not json").pending.unwrap();
        assert_eq!(pending.payload.origin, PayloadOrigin::Default);
        assert_eq!(pending.payload.value, json!({"market": ["EU", "US"]}));
        assert_eq!(pending.combinations.len(), 2);

        let empty = TriggerAdapter::from_source(config, &StaticPayloadSource::default()).unwrap();
        let pending = empty.prepare("TRIGGER").pending.unwrap();
        assert_eq!(pending.payload.origin, PayloadOrigin::Empty);
    }
}
