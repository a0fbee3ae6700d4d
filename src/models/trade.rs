use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of free-text labels inside a [`TradeSummary`].
pub const SUMMARY_LABEL_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Some(Direction::Long),
            "SHORT" | "SELL" => Some(Direction::Short),
            _ => None,
        }
    }
}

/// A journal entry as seen by the assistant (read-only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>, // None while the position is open
    pub quantity: f64,
    pub pnl: f64, // Realized profit or loss
    pub trade_date: DateTime<Utc>,
    pub strategy: String,
    pub mood: String,
}

impl TradeRecord {
    pub fn summary(&self) -> TradeSummary {
        TradeSummary {
            symbol: self.symbol.clone(),
            direction: self.direction,
            pnl: self.pnl,
            date: self.trade_date.format("%Y-%m-%d").to_string(),
            strategy: clip_label(&self.strategy, SUMMARY_LABEL_CHARS),
        }
    }

    /// Copy with free-text labels clipped to `max_chars`.
    pub fn clipped(&self, max_chars: usize) -> TradeRecord {
        TradeRecord {
            strategy: clip_label(&self.strategy, max_chars),
            mood: clip_label(&self.mood, max_chars),
            ..self.clone()
        }
    }
}

/// Minimal projection used for the first/most recent trade in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub symbol: String,
    pub direction: Direction,
    pub pnl: f64,
    pub date: String, // YYYY-MM-DD
    pub strategy: String,
}

/// Input for recording a trade in the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTradeInput {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub pnl: f64,
    pub trade_date: DateTime<Utc>,
    pub strategy: String,
    pub mood: String,
}

/// Clip a label to `max_chars` characters, appending an ellipsis when cut.
pub fn clip_label(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut clipped: String = value.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}
