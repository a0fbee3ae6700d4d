use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::AssistantError;
use crate::models::TradeRecord;

use super::intent::OrderBy;

/// Bounded, ordered slice request against the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeQuery {
    pub order_by: OrderBy,
    pub filter_strategy: Option<String>,
    pub filter_symbol: Option<String>,
    pub limit: usize,
}

/// Statistics over the whole trade history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeAggregates {
    pub total_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    pub win_rate: f64, // Percent of all trades with positive P&L
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl TradeAggregates {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut agg = TradeAggregates {
            total_count: records.len(),
            ..Default::default()
        };

        for (i, trade) in records.iter().enumerate() {
            if trade.pnl > 0.0 {
                agg.wins += 1;
                agg.gross_profit += trade.pnl;
            } else if trade.pnl < 0.0 {
                agg.losses += 1;
                agg.gross_loss += trade.pnl.abs();
            } else {
                agg.breakevens += 1;
            }
            agg.total_pnl += trade.pnl;

            if i == 0 || trade.pnl > agg.best_trade {
                agg.best_trade = trade.pnl;
            }
            if i == 0 || trade.pnl < agg.worst_trade {
                agg.worst_trade = trade.pnl;
            }
        }

        agg.win_rate = win_rate(agg.wins, agg.total_count);
        agg
    }
}

pub fn win_rate(wins: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (wins as f64 / total as f64) * 100.0
    }
}

/// Read side of the trade journal, as the assistant needs it.
///
/// Owned by the persistence layer; the assistant only ever reads bounded
/// slices plus the two boundary records.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn count(&self) -> Result<usize, AssistantError>;

    async fn query(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, AssistantError>;

    async fn oldest(&self) -> Result<Option<TradeRecord>, AssistantError>;

    async fn newest(&self) -> Result<Option<TradeRecord>, AssistantError>;

    /// Aggregates over every record. The default scans the full history
    /// through `query`; stores that can aggregate natively should override.
    async fn aggregates(&self) -> Result<TradeAggregates, AssistantError> {
        let total = self.count().await?;
        let all = self
            .query(&TradeQuery {
                order_by: OrderBy::Oldest,
                filter_strategy: None,
                filter_symbol: None,
                limit: total,
            })
            .await?;
        Ok(TradeAggregates::from_records(&all))
    }
}

/// Persistence for the user's simplified-mode preference
pub trait PreferenceStore: Send + Sync {
    fn simplified_mode(&self) -> Result<bool, AssistantError>;

    /// `forced` marks a switch made automatically after budget overflows.
    fn set_simplified_mode(&self, enabled: bool, forced: bool) -> Result<(), AssistantError>;
}

/// A change to the journal that makes any cached context stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMutation {
    TradeCreated(String),
    TradeUpdated(String),
    TradeDeleted(String),
    JournalCleared,
}

/// Synchronous hook called by a store after it commits a write.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, mutation: &DataMutation);
}
