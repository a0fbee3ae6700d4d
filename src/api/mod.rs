pub mod client;
pub mod credentials;
pub mod error;
pub mod openai;
pub mod rate_limiter;
pub mod secure_storage;

pub use client::{CompletionRequest, ModelProvider, RateLimitConfig};
pub use credentials::{CredentialStore, KeyringCredentialStore};
pub use error::AssistantError;
pub use openai::OpenAiCompatClient;
pub use rate_limiter::RateLimiter;
pub use secure_storage::EncryptedFileCredentialStore;
