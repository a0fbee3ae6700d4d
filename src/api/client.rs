use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::AssistantError;

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// One chat completion call: the assembled context plus the user's question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_reply_tokens: u32,
}

/// Core trait that all language-model backends must implement
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get the provider name (e.g., "openai")
    fn provider_name(&self) -> &str;

    /// Run a chat completion and return the assistant text.
    ///
    /// Implementations enforce their own timeout and classify every
    /// failure into an [`AssistantError`].
    async fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<String, AssistantError>;
}
