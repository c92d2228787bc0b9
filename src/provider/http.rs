//! Shared HTTP client, SSE parsing and error mapping.

use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ProviderError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to default HTTP client");
                reqwest::Client::new()
            })
    })
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and other fields.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Splits an SSE byte stream into trimmed lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// split across network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// The unterminated tail, if it holds anything but whitespace.
    pub fn finish(self) -> Option<String> {
        let tail = decode_line(&self.pending);
        (!tail.is_empty()).then_some(tail)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Build a provider error from a non-success HTTP response.
///
/// Google-style bodies (`{"error": {"message", "status", "details"}}`) are
/// unpacked; anything else becomes the error message verbatim.
pub fn status_to_error(status: u16, reason: Option<&str>, body: &str) -> ProviderError {
    let mut error = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => error_from_body(&value).unwrap_or_else(|| ProviderError::new(body.trim())),
        Err(_) if body.trim().is_empty() => {
            ProviderError::new(format!("HTTP {status}{}", reason.map(|r| format!(" {r}")).unwrap_or_default()))
        }
        Err(_) => ProviderError::new(body.trim()),
    };
    error.status = Some(status);
    if error.status_text.is_none() {
        error.status_text = reason.map(str::to_string);
    }
    error
}

/// Extract the `error` object of a Google API body, if present.
pub fn error_from_body(value: &serde_json::Value) -> Option<ProviderError> {
    let error = value.get("error")?;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown provider error");
    let mut provider_error = ProviderError::new(message);
    if let Some(code) = error.get("code").and_then(|c| c.as_u64()) {
        provider_error.status = u16::try_from(code).ok();
    }
    if let Some(details) = error.get("details").and_then(|d| d.as_array()) {
        provider_error.details = details.clone();
    }
    Some(provider_error)
}
