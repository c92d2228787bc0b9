//! Gemini transport against a mock HTTP server.
#![cfg(feature = "google")]

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolchat::config::ChatConfig;
use toolchat::error::ChatError;
use toolchat::provider::google::GoogleProvider;
use toolchat::provider::{create_provider, ModelProvider, ProviderRequest};
use toolchat::stream_transform::aggregate_stream;
use toolchat::tools::{ToolDeclaration, ToolParameters};
use toolchat::types::{Message, Part};
use toolchat::util::retry::classify;

const MODEL: &str = "gemini-test";

fn provider(server: &MockServer) -> GoogleProvider {
    GoogleProvider::new(MODEL, "test-key").with_base_url(format!("{}/v1beta/", server.uri()))
}

fn request(text: &str) -> ProviderRequest {
    ProviderRequest {
        history: vec![Message::user(text)],
        system_instruction: None,
        tools: vec![ToolDeclaration {
            name: "list_tables".into(),
            description: "List tables".into(),
            parameters: ToolParameters::empty().schema,
        }],
    }
}

#[tokio::test]
async fn generate_parses_function_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "List my tables"}]}],
            "tools": [{"functionDeclarations": [{"name": "list_tables"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check."},
                        {"functionCall": {"name": "list_tables", "args": {"schema": "public"}}}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let message = provider(&server).generate(&request("List my tables")).await.unwrap();

    assert_eq!(message.text(), "Let me check.");
    let calls = message.function_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "list_tables");
    assert_eq!(calls[0].args.get("schema"), Some(&json!("public")));
}

#[tokio::test]
async fn stream_yields_one_chunk_per_event() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"You have \"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"2 tables\"}]}}]}\n\n",
        "data: {\"usageMetadata\":{\"totalTokenCount\":12}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
        .and(query_param("alt", "sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = provider(&server).stream(&request("hi")).await.unwrap();
    let mut fragments = Vec::new();
    let message = aggregate_stream(stream, |chunk| {
        fragments.extend(chunk.parts.iter().filter_map(Part::as_text).map(str::to_string))
    })
    .await
    .unwrap();

    assert_eq!(fragments, vec!["You have ".to_string(), "2 tables".to_string()]);
    assert_eq!(message.text(), "You have 2 tables");
}

#[tokio::test]
async fn error_event_mid_stream_ends_the_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n",
        "data: {\"error\":{\"code\":500,\"message\":\"backend failure\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let items: Vec<_> = provider(&server).stream(&request("hi")).await.unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(&items[1], Err(ChatError::Provider(e)) if e.status == Some(500)));
}

#[tokio::test]
async fn quota_error_carries_retry_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "code": 429,
                "message": "You exceeded your current quota.",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "37s"
                }]
            }
        })))
        .mount(&server)
        .await;

    let err = provider(&server).generate(&request("hi")).await.unwrap_err();

    assert!(err.is_rate_limit());
    let ChatError::Provider(provider_error) = err else {
        panic!("expected provider error");
    };
    assert_eq!(provider_error.status, Some(429));
    let info = classify(&provider_error);
    assert!(info.is_rate_limit);
    assert_eq!(info.suggested_delay_ms, Some(37_000));
}

#[tokio::test]
async fn plain_text_error_body_becomes_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = provider(&server).generate(&request("hi")).await.unwrap_err();

    assert!(!err.is_rate_limit());
    assert!(matches!(
        err,
        ChatError::Provider(ref e) if e.status == Some(503) && e.message == "upstream unavailable"
    ));
}

#[tokio::test]
async fn create_provider_honours_base_url_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .and(header("x-goog-api-key", "from-config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "pong"}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ChatConfig {
        model: MODEL.to_string(),
        api_key: Some("from-config".to_string()),
        base_url: Some(format!("{}/v1beta", server.uri())),
        ..ChatConfig::default()
    };
    let provider = create_provider(&config).unwrap();

    assert_eq!(provider.provider_name(), "google");
    assert_eq!(provider.model_id(), MODEL);
    let message = provider.generate(&request("ping")).await.unwrap();
    assert_eq!(message.text(), "pong");
}

#[test]
fn create_provider_requires_api_key() {
    let err = match create_provider(&ChatConfig::default()) {
        Ok(_) => panic!("expected missing key error"),
        Err(err) => err,
    };
    assert!(matches!(err, ChatError::Configuration(ref text) if text.contains("GOOGLE_API_KEY")));
}
