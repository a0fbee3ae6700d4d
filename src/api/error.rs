use std::time::Duration;
use thiserror::Error;

/// Every failure the assistant can run into, from storage to the model provider.
///
/// The chat service recovers all of them and turns each into exactly one
/// user-facing reply (see [`AssistantError::user_message`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssistantError {
    #[error("No model API key configured")]
    NoCredential,

    #[error("Model API key rejected: {0}")]
    InvalidCredential(String),

    #[error("Trade storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Context still exceeds the token budget after switching to simplified mode")]
    BudgetExceededAfterRetry,

    #[error("Model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed provider response: {0}")]
    MalformedProviderResponse(String),

    #[error("Credential storage error: {0}")]
    CredentialStorage(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AssistantError {
    /// Transient failures are worth retrying by the caller; the assistant never retries them itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AssistantError::RateLimited { .. }
                | AssistantError::NetworkError(_)
                | AssistantError::Timeout(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AssistantError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Text shown in the chat when a turn ends with this error.
    pub fn user_message(&self) -> String {
        match self {
            AssistantError::NoCredential => {
                "Add your OpenAI API key in the assistant settings to start asking questions about your trades.".to_string()
            }
            AssistantError::InvalidCredential(_) => {
                "Your API key was rejected by the provider. Check the key in the assistant settings and try again.".to_string()
            }
            AssistantError::StorageUnavailable(_) => {
                "I could not load your trade data right now. Please try again in a moment.".to_string()
            }
            AssistantError::BudgetExceededAfterRetry => {
                "Your question needs more trade data than I can process at once. Try asking about a narrower set of trades.".to_string()
            }
            AssistantError::Timeout(_) => {
                "The AI service took too long to answer. Please try again.".to_string()
            }
            AssistantError::RateLimited { .. } => match self.retry_after() {
                Some(wait) => format!(
                    "The AI service is receiving too many requests. Please wait about {} seconds and try again.",
                    wait.as_secs().max(1)
                ),
                None => {
                    "The AI service is receiving too many requests. Please wait a moment and try again.".to_string()
                }
            },
            AssistantError::QuotaExceeded(_) => {
                "Your API account has run out of quota. Check your plan and billing details with the provider.".to_string()
            }
            AssistantError::NetworkError(_) => {
                "I could not reach the AI service. Check your internet connection and try again.".to_string()
            }
            AssistantError::MalformedProviderResponse(_) => {
                "The AI service returned an unexpected response. Please try again.".to_string()
            }
            AssistantError::CredentialStorage(_) => {
                "I could not read your saved API key. Please enter it again in the assistant settings.".to_string()
            }
            AssistantError::Unknown(_) => {
                "Something went wrong while answering your question. Please try again.".to_string()
            }
        }
    }
}

impl From<rusqlite::Error> for AssistantError {
    fn from(err: rusqlite::Error) -> Self {
        AssistantError::StorageUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AssistantError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            AssistantError::MalformedProviderResponse(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            AssistantError::NetworkError(err.to_string())
        } else {
            AssistantError::Unknown(err.to_string())
        }
    }
}

impl From<aes_gcm::Error> for AssistantError {
    fn from(err: aes_gcm::Error) -> Self {
        AssistantError::CredentialStorage(err.to_string())
    }
}
