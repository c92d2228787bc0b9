//! Model provider contract and the bundled Gemini transport.

pub mod http;

#[cfg(feature = "google")]
pub mod google;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ChatError;
use crate::tools::ToolDeclaration;
use crate::types::{Message, StreamChunk};

/// A request sent to a model provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRequest {
    /// Full conversation so far, ending with the message to answer.
    pub history: Vec<Message>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
}

/// Core trait implemented by model backends.
///
/// Failures the backend reports about the request itself travel as
/// [`ChatError::Provider`] so the rate-limit guard can classify them.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g. "google").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Produce one complete model message.
    async fn generate(&self, request: &ProviderRequest) -> Result<Message, ChatError>;

    /// Produce the model message as a stream of partial chunks.
    ///
    /// The default delivers the unary response as a single chunk.
    async fn stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ChatError>>, ChatError> {
        let message = self.generate(request).await?;
        let chunk = StreamChunk::new(message.parts);
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }
}

/// Create the configured provider.
#[cfg(feature = "google")]
pub fn create_provider(
    config: &crate::config::ChatConfig,
) -> Result<std::sync::Arc<dyn ModelProvider>, ChatError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ChatError::Configuration("missing API key: set GOOGLE_API_KEY or GEMINI_API_KEY".into())
    })?;
    let mut provider = google::GoogleProvider::new(config.model.clone(), api_key);
    if let Some(base_url) = &config.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    Ok(std::sync::Arc::new(provider))
}
