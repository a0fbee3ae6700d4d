//! Prompt size estimation.
//!
//! Character-based (one token per four bytes, rounded up) rather than a
//! tokenizer: it only gates the budget, and byte length over-counts
//! non-ASCII text, which keeps the estimate on the conservative side.

use serde::{Deserialize, Serialize};

const BYTES_PER_TOKEN: usize = 4;
/// Role and delimiter overhead per chat message
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count of `text`. Monotonic in length.
pub fn estimate(text: &str) -> usize {
    text.len().div_ceil(BYTES_PER_TOKEN)
}

/// Estimate a system + user exchange including per-message overhead.
pub fn estimate_exchange(system: &str, user: &str) -> usize {
    estimate(system) + estimate(user) + 2 * MESSAGE_OVERHEAD_TOKENS
}

/// Cut `text` at a char boundary so that `estimate(result) <= max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_bytes = max_tokens.saturating_mul(BYTES_PER_TOKEN);
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Token budget for the assembled context.
///
/// The ceiling sits well below the model's context window: the reply
/// reserve is removed first, then a proportional safety margin for
/// estimation error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub context_window: usize,
    pub reply_reserve: usize,
    pub safety_margin: f64, // Fraction of the remaining window kept free
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            context_window: 8_192,
            reply_reserve: 1_000,
            safety_margin: 0.25,
        }
    }
}

impl TokenBudget {
    pub fn ceiling(&self) -> usize {
        let usable = self.context_window.saturating_sub(self.reply_reserve) as f64;
        let margin = self.safety_margin.clamp(0.0, 0.95);
        (usable * (1.0 - margin)).floor() as usize
    }

    pub fn fits(&self, text: &str) -> bool {
        estimate(text) <= self.ceiling()
    }
}
