//! Chat entry point.
//!
//! Every call ends in exactly one reply text. Errors are recovered here and
//! carried alongside the text so the UI can decide whether to offer a retry.

use std::sync::Arc;

use crate::api::{AssistantError, CompletionRequest, CredentialStore, ModelProvider};
use crate::config::{AssistantConfig, ProviderConfig};

use super::cache::{ContextCache, ContextSnapshot};
use super::context_builder::ContextBuilder;
use super::intent::IntentExtractor;
use super::storage::{DataMutation, MutationObserver, PreferenceStore, TradeStore};
use super::token_estimator;

pub const EMPTY_JOURNAL_REPLY: &str = "Your journal does not have any trades yet, so there is nothing to analyse. Add a few trades to the journal and ask me again.";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub error: Option<AssistantError>,
    pub simplified_mode: bool,
    pub retried: bool, // Rebuilt once in simplified mode to fit the budget
}

impl ChatReply {
    fn failure(error: AssistantError, simplified_mode: bool, retried: bool) -> Self {
        log::warn!("Chat turn ended with error: {}", error);
        Self {
            text: error.user_message(),
            error: Some(error),
            simplified_mode,
            retried,
        }
    }
}

pub struct ChatService {
    builder: ContextBuilder,
    cache: Arc<ContextCache>,
    extractor: Arc<IntentExtractor>,
    preferences: Arc<dyn PreferenceStore>,
    credentials: Arc<dyn CredentialStore>,
    model: Arc<dyn ModelProvider>,
    provider: ProviderConfig,
}

impl ChatService {
    pub fn new(
        config: &AssistantConfig,
        store: Arc<dyn TradeStore>,
        preferences: Arc<dyn PreferenceStore>,
        credentials: Arc<dyn CredentialStore>,
        model: Arc<dyn ModelProvider>,
    ) -> Self {
        let extractor = Arc::new(IntentExtractor::new(
            &config.known_strategies,
            &config.known_symbols,
        ));
        let cache = Arc::new(ContextCache::new(config.cache.freshness, Arc::clone(&extractor)));
        let builder = ContextBuilder::new(
            config,
            store,
            Arc::clone(&preferences),
            Arc::clone(&cache),
            Arc::clone(&extractor),
        );

        Self {
            builder,
            cache,
            extractor,
            preferences,
            credentials,
            model,
            provider: config.provider.clone(),
        }
    }

    pub fn cache(&self) -> Arc<ContextCache> {
        Arc::clone(&self.cache)
    }

    /// Observer to register with the trade store so writes drop the context.
    pub fn mutation_observer(&self) -> Arc<dyn MutationObserver> {
        self.cache()
    }

    pub async fn chat(&self, message: &str) -> ChatReply {
        let credential = match self.credentials.get_credential() {
            Ok(Some(key)) if !key.trim().is_empty() => key,
            Ok(_) => return ChatReply::failure(AssistantError::NoCredential, false, false),
            Err(e) => return ChatReply::failure(e, false, false),
        };

        if self.extractor.is_must_refresh(message) {
            log::debug!("Message asks for fresh data; dropping cached context");
            self.cache.invalidate();
        }

        let ceiling = self.builder.budget().ceiling();
        let mut retried = false;

        let snapshot = loop {
            let snapshot = match self.builder.build(message).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    let simplified = self.preferences.simplified_mode().unwrap_or(retried);
                    return ChatReply::failure(e, simplified, retried);
                }
            };

            if snapshot.is_empty_journal() {
                return ChatReply {
                    text: EMPTY_JOURNAL_REPLY.to_string(),
                    error: None,
                    simplified_mode: snapshot.simplified_mode,
                    retried,
                };
            }

            let needed = token_estimator::estimate_exchange(&snapshot.system_prompt, message);
            if needed <= ceiling || retried {
                break snapshot;
            }

            log::info!(
                "Prompt and question need ~{} tokens (ceiling {}); retrying in simplified mode",
                needed,
                ceiling
            );
            if let Err(e) = self.preferences.set_simplified_mode(true, true) {
                log::warn!("Could not persist simplified mode: {}", e);
            }
            self.cache.invalidate();
            retried = true;
        };

        let (request, budget_error) = self.completion_request(&snapshot, message, ceiling);

        match self.model.complete(&credential, &request).await {
            Ok(text) => ChatReply {
                text,
                error: budget_error,
                simplified_mode: snapshot.simplified_mode,
                retried,
            },
            Err(e) => ChatReply::failure(e, snapshot.simplified_mode, retried),
        }
    }

    /// Request for `snapshot`, cut down to the ceiling when the retry in
    /// simplified mode was not enough.
    fn completion_request(
        &self,
        snapshot: &ContextSnapshot,
        message: &str,
        ceiling: usize,
    ) -> (CompletionRequest, Option<AssistantError>) {
        let mut system = snapshot.system_prompt.as_str();
        let mut user = message;
        let mut budget_error = None;

        if token_estimator::estimate_exchange(system, user) > ceiling {
            log::warn!("Context still over budget after the simplified retry; truncating");
            budget_error = Some(AssistantError::BudgetExceededAfterRetry);

            let overhead = token_estimator::estimate_exchange("", "");
            user = token_estimator::truncate_to_tokens(user, ceiling.saturating_sub(overhead));
            let remaining =
                ceiling.saturating_sub(token_estimator::estimate_exchange("", user));
            system = token_estimator::truncate_to_tokens(system, remaining);
        }

        let request = CompletionRequest {
            system: system.to_string(),
            user: user.to_string(),
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            max_reply_tokens: self.provider.max_reply_tokens,
        };
        (request, budget_error)
    }

    pub fn has_credential(&self) -> bool {
        matches!(self.credentials.get_credential(), Ok(Some(key)) if !key.trim().is_empty())
    }

    /// Save the provider API key. Returns false when it is too short.
    pub fn set_credential(&self, value: &str) -> Result<bool, AssistantError> {
        self.credentials.set_credential(value)
    }

    pub fn clear_credential(&self) -> Result<(), AssistantError> {
        self.credentials.clear_credential()
    }

    pub fn simplified_mode(&self) -> Result<bool, AssistantError> {
        self.preferences.simplified_mode()
    }

    /// User toggle. The cached context was rendered for the old mode.
    pub fn set_simplified_mode(&self, enabled: bool) -> Result<(), AssistantError> {
        self.preferences.set_simplified_mode(enabled, false)?;
        self.cache.invalidate();
        Ok(())
    }

    pub fn refresh(&self) {
        self.cache.invalidate();
    }

    pub fn notify_mutation(&self, mutation: &DataMutation) {
        self.cache.on_mutation(mutation);
    }
}
