//! Structured-output contract: required sections and bounded correction.
//!
//! A [`ResponseSchema`] names the section headings a final answer must
//! contain. [`TemplateValidator::enforce`] checks the answer and, while its
//! correction budget lasts, asks the turn to try again with a corrective
//! message. An answer that is still incomplete is returned with a warning
//! suffix instead of failing the turn.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

pub const DEFAULT_MAX_CORRECTIONS: u32 = 1;

/// Sections an answer must contain, plus the template shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub key: String,
    pub required_sections: BTreeSet<String>,
    #[serde(default)]
    pub hint_text: String,
}

impl ResponseSchema {
    pub fn new(
        key: impl Into<String>,
        required_sections: impl IntoIterator<Item = impl Into<String>>,
        hint_text: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            required_sections: required_sections.into_iter().map(Into::into).collect(),
            hint_text: hint_text.into(),
        }
    }

    /// Append the template hint to an outgoing user message.
    pub fn inject_hint(&self, message: &str) -> String {
        if self.hint_text.trim().is_empty() {
            return message.to_string();
        }
        format!(
            "{message}\n\n[Response template]\nStructure your answer using this template:\n{}",
            self.hint_text.trim_end()
        )
    }
}

/// Chooses the schema, if any, that applies to a user message.
pub trait SchemaRouter: Send + Sync {
    fn route(&self, user_text: &str) -> Option<ResponseSchema>;
}

/// Router that never applies a schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchemaRouter;

impl SchemaRouter for NoSchemaRouter {
    fn route(&self, _user_text: &str) -> Option<ResponseSchema> {
        None
    }
}

/// Maps keywords to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRoute {
    pub keywords: Vec<String>,
    pub schema: ResponseSchema,
}

/// First route with a keyword occurring in the message wins; matching is
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct KeywordSchemaRouter {
    routes: Vec<SchemaRoute>,
}

impl KeywordSchemaRouter {
    pub fn new(routes: Vec<SchemaRoute>) -> Self {
        Self { routes }
    }

    pub fn with_route(mut self, route: SchemaRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(&self) -> &[SchemaRoute] {
        &self.routes
    }
}

impl SchemaRouter for KeywordSchemaRouter {
    fn route(&self, user_text: &str) -> Option<ResponseSchema> {
        let haystack = user_text.to_lowercase();
        self.routes
            .iter()
            .find(|route| {
                route
                    .keywords
                    .iter()
                    .map(|keyword| keyword.trim().to_lowercase())
                    .any(|keyword| !keyword.is_empty() && haystack.contains(&keyword))
            })
            .map(|route| route.schema.clone())
    }
}

/// Single-pass check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCheck {
    pub valid: bool,
    pub missing_sections: Vec<String>,
}

/// Final result of enforcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOutcome {
    pub text: String,
    pub valid: bool,
    pub missing_sections: Vec<String>,
    pub corrections_used: u32,
}

/// A turn that can be re-entered with a corrective user message.
#[async_trait]
pub trait CorrectableTurn: Send {
    /// Run the turn again with `corrective` as the user message and return
    /// the new final text.
    async fn rerun(&mut self, corrective: String) -> Result<String, ChatError>;

    /// Called before each corrective re-run.
    fn on_correction(&mut self, _attempt: u32, _missing_sections: &[String]) {}
}

/// Checks answers against a schema with a bounded correction budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateValidator {
    max_corrections: u32,
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CORRECTIONS)
    }
}

impl TemplateValidator {
    pub fn new(max_corrections: u32) -> Self {
        Self { max_corrections }
    }

    pub fn max_corrections(&self) -> u32 {
        self.max_corrections
    }

    /// Sections are literal, case-sensitive substrings of the text.
    pub fn check(&self, text: &str, schema: &ResponseSchema) -> TemplateCheck {
        let missing_sections: Vec<String> = schema
            .required_sections
            .iter()
            .filter(|section| !text.contains(section.as_str()))
            .cloned()
            .collect();
        TemplateCheck {
            valid: missing_sections.is_empty(),
            missing_sections,
        }
    }

    pub fn corrective_prompt(&self, missing_sections: &[String], schema: &ResponseSchema) -> String {
        let mut prompt = format!(
            "Your previous answer is missing these required sections: {}. \
             Rewrite the complete answer so that it includes every required section.",
            missing_sections.join(", ")
        );
        if !schema.hint_text.trim().is_empty() {
            prompt.push_str("\n\nFollow this template:\n");
            prompt.push_str(schema.hint_text.trim_end());
        }
        prompt
    }

    /// Validate `first_text`, re-running `turn` while sections are missing and
    /// budget remains.
    pub async fn enforce(
        &self,
        first_text: String,
        schema: Option<&ResponseSchema>,
        turn: &mut dyn CorrectableTurn,
    ) -> Result<TemplateOutcome, ChatError> {
        let Some(schema) = schema else {
            return Ok(TemplateOutcome {
                text: first_text,
                valid: true,
                missing_sections: Vec::new(),
                corrections_used: 0,
            });
        };

        let mut text = first_text;
        let mut check = self.check(&text, schema);
        let mut corrections_used = 0;

        while !check.valid && corrections_used < self.max_corrections {
            corrections_used += 1;
            tracing::debug!(
                schema = %schema.key,
                attempt = corrections_used,
                missing = ?check.missing_sections,
                "requesting template correction"
            );
            turn.on_correction(corrections_used, &check.missing_sections);
            text = turn
                .rerun(self.corrective_prompt(&check.missing_sections, schema))
                .await?;
            check = self.check(&text, schema);
        }

        if !check.valid {
            tracing::warn!(
                schema = %schema.key,
                missing = ?check.missing_sections,
                "answer still missing required sections"
            );
            text = format!(
                "{}\n\nWARNING: response is missing required sections: {}",
                text.trim_end(),
                check.missing_sections.join(", ")
            );
        }

        Ok(TemplateOutcome {
            text,
            valid: check.valid,
            missing_sections: check.missing_sections,
            corrections_used,
        })
    }
}
