//! Runtime configuration for the assistant.
//!
//! Every value has a default; `JOURNAL_AI_*` environment variables override
//! them. Parsing goes through [`AssistantConfig::from_lookup`] so tests can
//! feed a map instead of touching the process environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ai_chat::token_estimator::TokenBudget;

/// Connection settings for the chat completion provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_reply_tokens: u32,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_reply_tokens: 1_000,
            request_timeout: Duration::from_secs(120),
            requests_per_second: 1,
            burst_size: 3,
        }
    }
}

/// Cache freshness and the bounded wait used while another build runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "duration_ms")]
    pub freshness: Duration,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(100),
            poll_attempts: 30,
        }
    }
}

/// Where the provider API key is kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    #[default]
    Keychain,
    EncryptedFile,
}

impl CredentialBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keychain" | "keyring" => Some(CredentialBackend::Keychain),
            "file" | "encrypted_file" => Some(CredentialBackend::EncryptedFile),
            _ => None,
        }
    }
}

/// A metric rendered verbatim into every prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedMetric {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub provider: ProviderConfig,
    pub budget: TokenBudget,
    pub cache: CacheConfig,
    /// Consecutive over-budget builds before simplified mode is persisted
    pub auto_simplify_after: u32,
    pub known_strategies: Vec<String>,
    pub known_symbols: Vec<String>,
    pub pinned_metrics: Vec<PinnedMetric>,
    pub credential_backend: CredentialBackend,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            budget: TokenBudget::default(),
            cache: CacheConfig::default(),
            auto_simplify_after: 2,
            known_strategies: default_strategies(),
            known_symbols: Vec::new(),
            pinned_metrics: Vec::new(),
            credential_backend: CredentialBackend::default(),
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `lookup` returns for the
    /// `JOURNAL_AI_*` keys. Unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(url) = get("JOURNAL_AI_BASE_URL") {
            cfg.provider.base_url = url;
        }
        if let Some(model) = get("JOURNAL_AI_MODEL") {
            cfg.provider.model = model;
        }
        if let Some(t) = get("JOURNAL_AI_TEMPERATURE").and_then(|v| v.parse().ok()) {
            cfg.provider.temperature = t;
        }
        if let Some(n) = get("JOURNAL_AI_MAX_REPLY_TOKENS").and_then(|v| v.parse().ok()) {
            cfg.provider.max_reply_tokens = n;
            cfg.budget.reply_reserve = n as usize;
        }
        if let Some(ms) = get("JOURNAL_AI_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            cfg.provider.request_timeout = Duration::from_millis(ms);
        }
        if let Some(window) = get("JOURNAL_AI_CONTEXT_WINDOW").and_then(|v| v.parse().ok()) {
            cfg.budget.context_window = window;
        }
        if let Some(secs) = get("JOURNAL_AI_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            cfg.cache.freshness = Duration::from_secs(secs);
        }
        if let Some(list) = get("JOURNAL_AI_STRATEGIES") {
            cfg.known_strategies = split_list(&list);
        }
        if let Some(list) = get("JOURNAL_AI_SYMBOLS") {
            cfg.known_symbols = split_list(&list);
        }
        if let Some(backend) = get("JOURNAL_AI_CREDENTIAL_STORE") {
            match CredentialBackend::parse(&backend) {
                Some(b) => cfg.credential_backend = b,
                None => log::warn!("Unknown credential store '{}', using keychain", backend),
            }
        }

        cfg
    }
}

fn default_strategies() -> Vec<String> {
    [
        "breakout",
        "pullback",
        "scalp",
        "swing",
        "reversal",
        "mean reversion",
        "trend following",
        "momentum",
        "range",
        "news",
        "gap",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
