use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use crate::api::{
    client::{CompletionRequest, ModelProvider, RateLimitConfig},
    error::AssistantError,
    rate_limiter::RateLimiter,
};
use crate::config::ProviderConfig;

const CHAT_COMPLETIONS_ENDPOINT: &str = "/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ProviderErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatClient {
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl OpenAiCompatClient {
    pub fn new(config: &ProviderConfig) -> Self {
        let rate_limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: config.requests_per_second,
            burst_size: config.burst_size,
        });

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            http_client: reqwest::Client::new(),
            rate_limiter,
        }
    }

    async fn send(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<String, AssistantError> {
        let body = ChatCompletionBody {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_reply_tokens,
        };

        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_ENDPOINT);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(classify_provider_failure(
                status.as_u16(),
                retry_after,
                &response_text,
            ));
        }

        parse_completion(&response_text)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<String, AssistantError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AssistantError::NoCredential);
        }

        // The limiter wait and the HTTP call share one deadline
        let deadline = tokio::time::Instant::now() + self.timeout;
        if !self.rate_limiter.acquire_before(deadline).await {
            return Err(AssistantError::RateLimited { retry_after: None });
        }

        log::debug!(
            "Sending chat completion to {} via {} (model {}, max {} reply tokens)",
            self.base_url,
            self.provider_name(),
            request.model,
            request.max_reply_tokens
        );

        // Dropping the request future on timeout aborts the HTTP call
        match tokio::time::timeout_at(deadline, self.send(credential, request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(AssistantError::Timeout(_))) | Err(_) => {
                log::warn!("Chat completion timed out after {:?}", self.timeout);
                Err(AssistantError::Timeout(self.timeout))
            }
            Ok(Err(e)) => {
                log::warn!("Chat completion failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Map a non-success HTTP response onto the error taxonomy.
pub fn classify_provider_failure(
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> AssistantError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        format!("HTTP {}", status)
    } else {
        detail.message.clone()
    };

    match status {
        401 | 403 => AssistantError::InvalidCredential(message),
        429 => {
            let quota = [detail.code.as_deref(), detail.kind.as_deref()]
                .into_iter()
                .flatten()
                .any(|v| v == "insufficient_quota");
            if quota {
                AssistantError::QuotaExceeded(message)
            } else {
                AssistantError::RateLimited { retry_after }
            }
        }
        500..=599 => AssistantError::NetworkError(format!("provider returned {}: {}", status, message)),
        _ => AssistantError::Unknown(format!("HTTP {}: {}", status, message)),
    }
}

/// Extract `choices[0].message.content` from a success body.
pub fn parse_completion(body: &str) -> Result<String, AssistantError> {
    let response: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        AssistantError::MalformedProviderResponse(format!("Failed to parse response: {}", e))
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            AssistantError::MalformedProviderResponse(
                "choices[0].message.content missing".to_string(),
            )
        })
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
