//! Google Gemini API provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ChatError;
use crate::types::{FunctionArgs, Message, Part, Role, StreamChunk, ToolOutcome};

use super::http::{error_from_body, parse_sse_data, shared_client, status_to_error, SseLineBuffer};
use super::{ModelProvider, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` / `streamGenerateContent` client.
pub struct GoogleProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GoogleProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("x-goog-api-key", value);
        }
        headers
    }

    pub(crate) fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let contents: Vec<Value> = request
            .history
            .iter()
            .filter(|message| !message.parts.is_empty())
            .map(|message| {
                json!({
                    "role": gemini_role(message.role),
                    "parts": message.parts.iter().map(part_to_gemini).collect::<Vec<_>>(),
                })
            })
            .collect();

        let mut body = serde_json::Map::new();
        body.insert("contents".into(), Value::Array(contents));

        if let Some(instruction) = request
            .system_instruction
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": [{"text": instruction}]}),
            );
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }

        Value::Object(body)
    }

    async fn post(&self, url: &str, request: &ProviderRequest) -> Result<reqwest::Response, ChatError> {
        let response = shared_client()
            .post(url)
            .headers(self.headers())
            .json(&self.build_request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), status.canonical_reason(), &body).into());
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Message, ChatError> {
        debug!(model = %self.model, messages = request.history.len(), "Google generate");
        let response = self.post(&self.endpoint("generateContent"), request).await?;
        let data: GeminiResponse = response.json().await?;
        Ok(Message::model(data.into_parts()))
    }

    async fn stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ChatError>>, ChatError> {
        debug!(model = %self.model, messages = request.history.len(), "Google stream");
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request).await?;
        Ok(chunk_stream(response.bytes_stream()))
    }
}

/// Decode an SSE body into stream chunks. The first error ends the stream.
fn chunk_stream<S, B>(byte_stream: S) -> BoxStream<'static, Result<StreamChunk, ChatError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut lines = SseLineBuffer::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let complete = match chunk_result {
                Ok(bytes) => lines.push(bytes.as_ref()),
                Err(e) => {
                    yield Err(ChatError::Network(e));
                    return;
                }
            };

            for line in complete {
                let Some(data) = parse_sse_data(&line) else {
                    continue;
                };
                match decode_stream_event(data) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        if let Some(tail) = lines.finish() {
            if let Some(data) = parse_sse_data(&tail) {
                match decode_stream_event(data) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => {}
                    Err(err) => yield Err(err),
                }
            }
        }
    };
    Box::pin(stream)
}

fn decode_stream_event(data: &str) -> Result<Option<StreamChunk>, ChatError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ChatError::protocol(format!("malformed Gemini stream event: {e}")))?;
    if let Some(error) = error_from_body(&value) {
        return Err(error.into());
    }
    let response: GeminiResponse = serde_json::from_value(value)?;
    let parts = response.into_parts();
    Ok((!parts.is_empty()).then(|| StreamChunk::new(parts)))
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
        Role::Function => "function",
    }
}

fn part_to_gemini(part: &Part) -> Value {
    match part {
        Part::Text { text } => json!({"text": text}),
        Part::FunctionCall(call) => json!({
            "functionCall": {"name": call.name, "args": call.args}
        }),
        Part::FunctionResponse(response) => {
            let content = match &response.outcome {
                ToolOutcome::Result(value) => json!({"result": value}),
                ToolOutcome::Error(message) => json!({"error": message}),
            };
            json!({
                "functionResponse": {"name": response.name, "response": content}
            })
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

impl GeminiResponse {
    /// Parts of the first candidate.
    fn into_parts(self) -> Vec<Part> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(GeminiPart::into_part).collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
    #[serde(default)]
    thought: bool,
}

impl GeminiPart {
    fn into_part(self) -> Option<Part> {
        if let Some(call) = self.function_call {
            let args = match call.args {
                Some(Value::Object(map)) => map,
                _ => FunctionArgs::new(),
            };
            return Some(Part::function_call(call.name, args));
        }
        if self.thought {
            return None;
        }
        self.text.filter(|t| !t.is_empty()).map(Part::text)
    }
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDeclaration;
    use crate::types::FunctionResponse;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_body_maps_all_part_kinds() {
        let provider = GoogleProvider::new("gemini-2.0-flash", "key");
        let request = ProviderRequest {
            history: vec![
                Message::user("List my tables"),
                Message::model(vec![Part::function_call("list_tables", FunctionArgs::new())]),
                Message::function_responses(vec![
                    FunctionResponse::result("list_tables", json!(["t1", "t2"])),
                ]),
            ],
            system_instruction: Some("Be terse.".into()),
            tools: vec![ToolDeclaration {
                name: "list_tables".into(),
                description: "List tables".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        };

        let body = provider.build_request_body(&request);
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "List my tables"}]},
                    {"role": "model", "parts": [{"functionCall": {"name": "list_tables", "args": {}}}]},
                    {"role": "function", "parts": [{"functionResponse": {
                        "name": "list_tables",
                        "response": {"result": ["t1", "t2"]}
                    }}]},
                ],
                "systemInstruction": {"parts": [{"text": "Be terse."}]},
                "tools": [{"functionDeclarations": [{
                    "name": "list_tables",
                    "description": "List tables",
                    "parameters": {"type": "object", "properties": {}}
                }]}],
            })
        );
    }

    #[test]
    fn error_outcome_maps_to_error_response() {
        let part = Part::FunctionResponse(FunctionResponse::error("run_query", "boom"));
        assert_eq!(
            part_to_gemini(&part),
            json!({"functionResponse": {"name": "run_query", "response": {"error": "boom"}}})
        );
    }

    #[tokio::test]
    async fn character_split_across_network_chunks_is_preserved() {
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"café\"}]}}]}\n\n".as_bytes();
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(body[..split].to_vec()), Ok(body[split..].to_vec())];

        let message = crate::stream_transform::aggregate_stream(
            chunk_stream(futures::stream::iter(chunks)),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(message.text(), "café");
    }

    #[tokio::test]
    async fn final_event_without_trailing_newline_is_decoded() {
        let chunks: Vec<Result<&'static [u8], reqwest::Error>> = vec![Ok(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"end\"}]}}]}",
        )];
        let items: Vec<_> = chunk_stream(futures::stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().parts, vec![Part::text("end")]);
    }

    #[test]
    fn stream_event_with_thought_parts_skips_them() {
        let chunk = decode_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"hmm","thought":true},{"text":"Hi"}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.parts, vec![Part::text("Hi")]);
    }

    #[test]
    fn stream_event_with_error_is_provider_error() {
        let err = decode_stream_event(r#"{"error":{"code":429,"message":"quota exceeded"}}"#)
            .unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[test]
    fn stream_event_without_parts_is_skipped() {
        assert!(decode_stream_event(r#"{"usageMetadata":{"totalTokenCount":3}}"#)
            .unwrap()
            .is_none());
    }
}
