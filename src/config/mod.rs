//! Configuration (layered: defaults < TOML file < environment).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_loop::{LoopLimits, DEFAULT_MAX_TOOL_ROUNDS};
use crate::error::ChatError;
use crate::template::{KeywordSchemaRouter, ResponseSchema, SchemaRoute, DEFAULT_MAX_CORRECTIONS};
use crate::trigger::{TriggerConfig, DEFAULT_ANCHOR_HEADING, DEFAULT_MAX_COMBINATIONS, DEFAULT_TRIGGER_TOKEN};
use crate::util::retry::{RateLimitPolicy, DEFAULT_RATE_LIMIT_FLOOR_MS};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Engine configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub streaming: bool,
    pub system_instruction: Option<String>,
    pub history_dir: Option<PathBuf>,
    pub rate_limit: RateLimitConfig,
    pub tool_loop: ToolLoopConfig,
    pub template: TemplateConfig,
    pub trigger: TriggerSection,
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("streaming", &self.streaming)
            .field("system_instruction", &self.system_instruction)
            .field("history_dir", &self.history_dir)
            .field("rate_limit", &self.rate_limit)
            .field("tool_loop", &self.tool_loop)
            .field("template", &self.template)
            .field("trigger", &self.trigger)
            .finish()
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            streaming: true,
            system_instruction: None,
            history_dir: None,
            rate_limit: RateLimitConfig::default(),
            tool_loop: ToolLoopConfig::default(),
            template: TemplateConfig::default(),
            trigger: TriggerSection::default(),
        }
    }
}

/// `[rate_limit]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub floor_ms: u64,
    pub default_delay_ms: u64,
    /// Total backoff budget per model call; absent means retry forever.
    pub max_total_wait_ms: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            floor_ms: DEFAULT_RATE_LIMIT_FLOOR_MS,
            default_delay_ms: DEFAULT_RATE_LIMIT_FLOOR_MS,
            max_total_wait_ms: None,
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            floor: Duration::from_millis(self.floor_ms),
            default_delay: Duration::from_millis(self.default_delay_ms),
            max_total_wait: self.max_total_wait_ms.map(Duration::from_millis),
        }
    }
}

/// `[tool_loop]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLoopConfig {
    /// Tool rounds per run; 0 disables the cap.
    pub max_rounds: usize,
    pub parallel_tools: bool,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            parallel_tools: false,
        }
    }
}

impl ToolLoopConfig {
    pub fn limits(&self) -> LoopLimits {
        LoopLimits {
            max_rounds: (self.max_rounds > 0).then_some(self.max_rounds),
            parallel_tools: self.parallel_tools,
        }
    }
}

/// `[template]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub max_corrections: u32,
    pub routes: Vec<TemplateRouteConfig>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_corrections: DEFAULT_MAX_CORRECTIONS,
            routes: Vec::new(),
        }
    }
}

/// `[[template.routes]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRouteConfig {
    pub key: String,
    pub keywords: Vec<String>,
    pub required_sections: Vec<String>,
    #[serde(default)]
    pub hint: String,
}

impl TemplateConfig {
    pub fn router(&self) -> KeywordSchemaRouter {
        KeywordSchemaRouter::new(
            self.routes
                .iter()
                .map(|route| SchemaRoute {
                    keywords: route.keywords.clone(),
                    schema: ResponseSchema::new(
                        route.key.clone(),
                        route.required_sections.iter().cloned(),
                        route.hint.clone(),
                    ),
                })
                .collect(),
        )
    }
}

/// `[trigger]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    pub token: String,
    pub max_combinations: usize,
    pub anchor_heading: String,
    pub default_payload_path: Option<PathBuf>,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            token: DEFAULT_TRIGGER_TOKEN.to_string(),
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            anchor_heading: DEFAULT_ANCHOR_HEADING.to_string(),
            default_payload_path: None,
        }
    }
}

impl TriggerSection {
    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            token: self.token.clone(),
            max_combinations: self.max_combinations,
            anchor_heading: self.anchor_heading.clone(),
        }
    }
}

impl ChatConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ChatError> {
        toml::from_str(raw).map_err(|e| ChatError::Configuration(format!("invalid config: {e}")))
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, then the optional file, then `.env` and the process environment.
    pub fn from_env_and_file(path: Option<&Path>) -> Result<Self, ChatError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_env_and_file(None)
    }

    /// Apply overrides from `lookup` (an environment accessor).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = get("GOOGLE_API_KEY").or_else(|| get("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = get("TOOLCHAT_MODEL") {
            self.model = model;
        }
        if let Some(url) = get("TOOLCHAT_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(raw) = get("TOOLCHAT_STREAMING") {
            self.streaming = parse_bool("TOOLCHAT_STREAMING", &raw)?;
        }
        if let Some(raw) = get("TOOLCHAT_RATE_LIMIT_FLOOR_MS") {
            self.rate_limit.floor_ms = parse_number("TOOLCHAT_RATE_LIMIT_FLOOR_MS", &raw)?;
        }
        if let Some(raw) = get("TOOLCHAT_MAX_TOOL_ROUNDS") {
            self.tool_loop.max_rounds = parse_number("TOOLCHAT_MAX_TOOL_ROUNDS", &raw)?;
        }
        if let Some(dir) = get("TOOLCHAT_HISTORY_DIR") {
            self.history_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ChatError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ChatError::Configuration(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ChatError> {
    raw.trim()
        .parse()
        .map_err(|_| ChatError::Configuration(format!("{key}: expected a non-negative integer, got '{raw}'")))
}
