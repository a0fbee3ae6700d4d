//! Heuristic classification of a chat question into a trade selection.
//!
//! Ambiguous questions fall back to the newest trades with no filter.
//! That default is the intended behaviour, not a gap to be guessed around.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderBy {
    Newest,
    Oldest,
    HighestPnl,
    LowestPnl,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderBy::Newest => "newest first",
            OrderBy::Oldest => "oldest first",
            OrderBy::HighestPnl => "highest P&L first",
            OrderBy::LowestPnl => "lowest P&L first",
        };
        f.write_str(label)
    }
}

/// Selection directive derived from a single user message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryIntent {
    pub order_by: OrderBy,
    pub filter_strategy: Option<String>,
    pub filter_symbol: Option<String>,
    /// Explicit count from the question ("top 5"); only narrows the sample
    pub requested_count: Option<usize>,
}

impl Default for QueryIntent {
    fn default() -> Self {
        Self {
            order_by: OrderBy::Newest,
            filter_strategy: None,
            filter_symbol: None,
            requested_count: None,
        }
    }
}

impl QueryIntent {
    /// Human readable description used in the rendered prompt.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.order_by.to_string()];
        if let Some(strategy) = &self.filter_strategy {
            parts.push(format!("strategy \"{}\"", strategy));
        }
        if let Some(symbol) = &self.filter_symbol {
            parts.push(format!("symbol {}", symbol));
        }
        parts.join(", ")
    }
}

// Abbreviations that look like tickers but never are
const TICKER_STOPWORDS: &[&str] = &[
    "AI", "AM", "PM", "PNL", "ROI", "RR", "TP", "SL", "EOD", "YTD", "MTD", "WTD", "ATH", "ATL",
    "FOMO", "FYI", "OK", "USD", "EUR", "GBP", "JPY", "ETF", "IPO", "CEO", "EST", "UTC", "API",
    "Q1", "Q2", "Q3", "Q4", "H1", "H2", "FY", "NY", "NYC", "EU", "US", "UK", "LDN", "ASIA",
];

pub struct IntentExtractor {
    strategies: Vec<String>,
    symbols: Vec<String>,
    highest: Regex,
    lowest: Regex,
    oldest: Regex,
    must_refresh: Regex,
    count_before_noun: Regex,
    count_after_keyword: Regex,
    time_unit: Regex,
    cashtag: Regex,
    ticker: Regex,
}

impl IntentExtractor {
    pub fn new(strategies: &[String], symbols: &[String]) -> Self {
        Self {
            strategies: normalize(strategies),
            symbols: normalize(symbols),
            highest: Regex::new(
                r"\b(best|top|highest|greatest|most profitable|most profit|(biggest|largest) (win|wins|winner|winners|gain|gains|profit|profits)|max(imum)? profit)\b",
            )
            .expect("valid regex"),
            lowest: Regex::new(
                r"\b(worst|loss|losses|losing|loser|losers|lowest|bottom|drawdown|least profitable)\b",
            )
            .expect("valid regex"),
            oldest: Regex::new(r"\b(first|earliest|oldest|start|started|beginning|initial)\b")
                .expect("valid regex"),
            must_refresh: Regex::new(
                r"\b(total|overall|net|balance|how much|p&l|pnl|profit and loss|first|oldest|earliest)\b",
            )
            .expect("valid regex"),
            count_before_noun: Regex::new(r"\b(\d{1,3})\s+(?:[a-z]+\s+){0,3}?trades?\b")
                .expect("valid regex"),
            count_after_keyword: Regex::new(r"\b(?:top|best|worst|first|last|latest|recent)\s+(\d{1,3})\b")
                .expect("valid regex"),
            time_unit: Regex::new(
                r"^\s+(?:minutes?|hours?|days?|weeks?|months?|quarters?|years?|sessions?)\b",
            )
            .expect("valid regex"),
            cashtag: Regex::new(r"\$([a-z][a-z0-9.]{0,9})\b").expect("valid regex"),
            ticker: Regex::new(r"\b[A-Z][A-Z0-9]{1,9}\b").expect("valid regex"),
        }
    }

    /// Classify `message`. Deterministic and infallible.
    pub fn extract(&self, message: &str) -> QueryIntent {
        let lower = message.to_lowercase();

        let order_by = if self.highest.is_match(&lower) {
            OrderBy::HighestPnl
        } else if self.lowest.is_match(&lower) {
            OrderBy::LowestPnl
        } else if self.oldest.is_match(&lower) {
            OrderBy::Oldest
        } else {
            OrderBy::Newest
        };

        QueryIntent {
            order_by,
            filter_strategy: self.find_strategy(&lower),
            filter_symbol: self.find_symbol(message, &lower),
            requested_count: self.find_count(&lower),
        }
    }

    /// Questions about financial totals or the first/oldest trades, for
    /// which a stale context would give a visibly wrong answer.
    pub fn is_must_refresh(&self, message: &str) -> bool {
        self.must_refresh.is_match(&message.to_lowercase())
    }

    fn find_strategy(&self, lower: &str) -> Option<String> {
        self.strategies
            .iter()
            .filter(|s| contains_phrase(lower, s))
            .max_by_key(|s| s.len())
            .cloned()
    }

    fn find_symbol(&self, original: &str, lower: &str) -> Option<String> {
        if let Some(symbol) = self.symbols.iter().find(|s| contains_phrase(lower, s)) {
            return Some(symbol.to_uppercase());
        }

        if let Some(caps) = self.cashtag.captures(lower) {
            return Some(caps[1].to_uppercase());
        }

        // A shouted message makes every word look like a ticker
        if original.chars().any(|c| c.is_lowercase()) {
            return self
                .ticker
                .find_iter(original)
                .map(|m| m.as_str())
                .find(|token| !TICKER_STOPWORDS.contains(token))
                .map(|token| token.to_string());
        }

        None
    }

    fn find_count(&self, lower: &str) -> Option<usize> {
        // "last 3 months" is a period, not a number of trades
        [&self.count_after_keyword, &self.count_before_noun]
            .into_iter()
            .flat_map(|re| re.captures_iter(lower))
            .filter_map(|caps| caps.get(1))
            .filter(|m| !self.time_unit.is_match(&lower[m.end()..]))
            .find_map(|m| m.as_str().parse::<usize>().ok().filter(|n| *n > 0))
    }
}

fn normalize(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Phrase match on word boundaries ("range" must not match "arrange").
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(phrase).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = haystack[..start].chars().next_back().is_none_or(|c| !is_word(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_word(c));
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> IntentExtractor {
        IntentExtractor::new(
            &["breakout".to_string(), "mean reversion".to_string(), "range".to_string()],
            &["btcusdt".to_string()],
        )
    }

    #[test]
    fn test_worst_trades_are_lowest_pnl() {
        let intent = extractor().extract("What are my 5 worst performing trades?");
        assert_eq!(intent.order_by, OrderBy::LowestPnl);
        assert_eq!(intent.requested_count, Some(5));
        assert_eq!(intent.filter_symbol, None);
        assert_eq!(intent.filter_strategy, None);
    }

    #[test]
    fn test_most_profitable_is_highest_pnl() {
        let intent = extractor().extract("Show my top 5 most profitable trades");
        assert_eq!(intent.order_by, OrderBy::HighestPnl);
        assert_eq!(intent.requested_count, Some(5));
    }

    #[test]
    fn test_ambiguous_question_defaults_to_newest() {
        let intent = extractor().extract("How did I do last month?");
        assert_eq!(intent, QueryIntent::default());
    }

    #[test]
    fn test_first_trade_is_oldest() {
        let intent = extractor().extract("What was my first trade?");
        assert_eq!(intent.order_by, OrderBy::Oldest);
    }

    #[test]
    fn test_profit_language_wins_over_loss_language() {
        let intent = extractor().extract("Compare my best and worst trades");
        assert_eq!(intent.order_by, OrderBy::HighestPnl);
    }

    #[test]
    fn test_stop_is_not_top() {
        let intent = extractor().extract("Did moving my stop help?");
        assert_eq!(intent.order_by, OrderBy::Newest);
    }

    #[test]
    fn test_strategy_filter_uses_word_boundaries() {
        let e = extractor();
        assert_eq!(
            e.extract("How are my Mean Reversion trades doing?").filter_strategy,
            Some("mean reversion".to_string())
        );
        assert_eq!(e.extract("Help me arrange my notes").filter_strategy, None);
        assert_eq!(
            e.extract("any breakout wins lately?").filter_strategy,
            Some("breakout".to_string())
        );
    }

    #[test]
    fn test_symbol_sources() {
        let e = extractor();
        assert_eq!(
            e.extract("how did btcusdt go").filter_symbol,
            Some("BTCUSDT".to_string())
        );
        assert_eq!(e.extract("thoughts on $tsla?").filter_symbol, Some("TSLA".to_string()));
        assert_eq!(
            e.extract("How did my AAPL trades perform?").filter_symbol,
            Some("AAPL".to_string())
        );
        assert_eq!(e.extract("What is my PNL and ROI?").filter_symbol, None);
        assert_eq!(e.extract("WHAT IS MY WIN RATE").filter_symbol, None);
        assert_eq!(e.extract("How did I do in Q1?").filter_symbol, None);
        assert_eq!(e.extract("Any good trades in the NY session?").filter_symbol, None);
    }

    #[test]
    fn test_time_periods_are_not_counts() {
        let e = extractor();
        assert_eq!(e.extract("How did I do over the last 3 months?").requested_count, None);
        assert_eq!(e.extract("my best trades in the last 2 weeks").requested_count, None);
        assert_eq!(e.extract("Show my last 4 trades").requested_count, Some(4));
        assert_eq!(e.extract("top 3 trades of the last 6 months").requested_count, Some(3));
    }

    #[test]
    fn test_must_refresh_topics() {
        let e = extractor();
        assert!(e.is_must_refresh("What is my total profit?"));
        assert!(e.is_must_refresh("show my P&L"));
        assert!(e.is_must_refresh("What was my first trade?"));
        assert!(!e.is_must_refresh("What are my 5 worst performing trades?"));
        assert!(!e.is_must_refresh("How did I do last month?"));
    }

    #[test]
    fn test_extract_is_deterministic() {
        let e = extractor();
        let msg = "Show my top 3 breakout trades on $eth";
        assert_eq!(e.extract(msg), e.extract(msg));
    }

    #[test]
    fn test_describe() {
        let intent = QueryIntent {
            order_by: OrderBy::LowestPnl,
            filter_strategy: Some("breakout".to_string()),
            filter_symbol: Some("ETH".to_string()),
            requested_count: None,
        };
        assert_eq!(intent.describe(), "lowest P&L first, strategy \"breakout\", symbol ETH");
    }
}
