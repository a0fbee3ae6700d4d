pub mod cache;
pub mod context_builder;
pub mod intent;
pub mod prompt;
pub mod service;
pub mod storage;
pub mod token_estimator;

pub use cache::{ContextCache, ContextSnapshot};
pub use context_builder::ContextBuilder;
pub use intent::{IntentExtractor, OrderBy, QueryIntent};
pub use service::{ChatReply, ChatService};
pub use storage::{DataMutation, MutationObserver, PreferenceStore, TradeQuery, TradeStore};
pub use token_estimator::TokenBudget;
