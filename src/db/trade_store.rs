use std::sync::{Arc, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::ai_chat::intent::OrderBy;
use crate::ai_chat::storage::{
    win_rate, DataMutation, MutationObserver, TradeAggregates, TradeQuery, TradeStore,
};
use crate::api::AssistantError;
use crate::db::Database;
use crate::models::{CreateTradeInput, Direction, TradeRecord};

const TRADE_COLUMNS: &str =
    "id, symbol, direction, entry_price, exit_price, quantity, pnl, trade_date, strategy, mood";

const MUTATION_CHANNEL_CAPACITY: usize = 64;

/// Helper function to map a database row to a TradeRecord
fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<TradeRecord> {
    let direction: String = row.get(2)?;
    let direction = Direction::parse(&direction).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown direction '{}'", direction).into(),
        )
    })?;

    let timestamp: i64 = row.get(7)?;
    let trade_date = DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Integer,
            format!("trade_date out of range: {}", timestamp).into(),
        )
    })?;

    Ok(TradeRecord {
        id: row.get(0)?,
        symbol: row.get(1)?,
        direction,
        entry_price: row.get(3)?,
        exit_price: row.get(4)?,
        quantity: row.get(5)?,
        pnl: row.get(6)?,
        trade_date,
        strategy: row.get(8)?,
        mood: row.get(9)?,
    })
}

fn order_clause(order_by: OrderBy) -> &'static str {
    match order_by {
        OrderBy::Newest => "trade_date DESC, id DESC",
        OrderBy::Oldest => "trade_date ASC, id ASC",
        OrderBy::HighestPnl => "pnl DESC, trade_date DESC",
        OrderBy::LowestPnl => "pnl ASC, trade_date DESC",
    }
}

/// Journal storage backed by the SQLite database.
///
/// Every committed write is reported to the registered observers and
/// published on a broadcast channel for background listeners.
pub struct SqliteTradeStore {
    db: Arc<Database>,
    observers: RwLock<Vec<Arc<dyn MutationObserver>>>,
    events: broadcast::Sender<DataMutation>,
}

impl SqliteTradeStore {
    pub fn new(db: Arc<Database>) -> Self {
        let (events, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            db,
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn MutationObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(e) => log::error!("Failed to register mutation observer: {}", e),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataMutation> {
        self.events.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AssistantError> {
        self.db
            .conn
            .lock()
            .map_err(|e| AssistantError::StorageUnavailable(format!("database lock poisoned: {}", e)))
    }

    fn notify(&self, mutation: DataMutation) {
        log::debug!("Journal mutation: {:?}", mutation);

        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.on_mutation(&mutation);
            }
        }

        // No receivers is fine
        let _ = self.events.send(mutation);
    }

    pub fn get_trade(&self, id: &str) -> Result<Option<TradeRecord>, AssistantError> {
        let conn = self.lock()?;
        let trade = conn
            .query_row(
                &format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLUMNS),
                [id],
                map_row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }

    pub fn create_trade(&self, trade: CreateTradeInput) -> Result<TradeRecord, AssistantError> {
        let id = format!(
            "TRADE-{}-{}",
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4()
        );

        {
            let conn = self.lock()?;
            let now = Utc::now().timestamp();

            conn.execute(
                "INSERT INTO trades (
                    id, symbol, direction, entry_price, exit_price, quantity, pnl,
                    trade_date, strategy, mood, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    trade.symbol,
                    trade.direction.as_str(),
                    trade.entry_price,
                    trade.exit_price,
                    trade.quantity,
                    trade.pnl,
                    trade.trade_date.timestamp(),
                    trade.strategy,
                    trade.mood,
                    now,
                    now
                ],
            )?;
        }

        self.notify(DataMutation::TradeCreated(id.clone()));

        self.get_trade(&id)?.ok_or_else(|| {
            AssistantError::StorageUnavailable(format!("trade {} missing after insert", id))
        })
    }

    /// Record the exit of a trade. Returns false when no trade has `id`.
    pub fn close_trade(&self, id: &str, exit_price: f64, pnl: f64) -> Result<bool, AssistantError> {
        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE trades SET exit_price = ?, pnl = ?, updated_at = ? WHERE id = ?",
                params![exit_price, pnl, Utc::now().timestamp(), id],
            )?
        };

        if updated > 0 {
            self.notify(DataMutation::TradeUpdated(id.to_string()));
        }
        Ok(updated > 0)
    }

    pub fn delete_trade(&self, id: &str) -> Result<bool, AssistantError> {
        let deleted = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM trades WHERE id = ?", [id])?
        };

        if deleted > 0 {
            self.notify(DataMutation::TradeDeleted(id.to_string()));
        }
        Ok(deleted > 0)
    }

    pub fn delete_all_trades(&self) -> Result<usize, AssistantError> {
        let count = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM trades", [])?
        };

        self.notify(DataMutation::JournalCleared);
        Ok(count)
    }

    fn boundary(&self, order_by: OrderBy) -> Result<Option<TradeRecord>, AssistantError> {
        let conn = self.lock()?;
        let trade = conn
            .query_row(
                &format!(
                    "SELECT {} FROM trades ORDER BY {} LIMIT 1",
                    TRADE_COLUMNS,
                    order_clause(order_by)
                ),
                [],
                map_row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn count(&self) -> Result<usize, AssistantError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    async fn query(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, AssistantError> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM trades WHERE 1=1", TRADE_COLUMNS);
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(strategy) = &query.filter_strategy {
            conditions.push("strategy LIKE ?");
            values.push(Box::new(format!("%{}%", strategy)));
        }
        if let Some(symbol) = &query.filter_symbol {
            conditions.push("symbol LIKE ?");
            values.push(Box::new(format!("%{}%", symbol)));
        }

        if !conditions.is_empty() {
            sql.push_str(&format!(" AND {}", conditions.join(" AND ")));
        }

        sql.push_str(&format!(" ORDER BY {} LIMIT ?", order_clause(query.order_by)));
        values.push(Box::new(i64::try_from(query.limit).unwrap_or(i64::MAX)));

        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let trades = stmt
            .query_map(param_refs.as_slice(), map_row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(trades)
    }

    async fn oldest(&self) -> Result<Option<TradeRecord>, AssistantError> {
        self.boundary(OrderBy::Oldest)
    }

    async fn newest(&self) -> Result<Option<TradeRecord>, AssistantError> {
        self.boundary(OrderBy::Newest)
    }

    async fn aggregates(&self) -> Result<TradeAggregates, AssistantError> {
        let conn = self.lock()?;

        let mut agg = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN pnl < 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN pnl = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(pnl), 0.0),
                COALESCE(SUM(CASE WHEN pnl > 0 THEN pnl ELSE 0 END), 0.0),
                COALESCE(SUM(CASE WHEN pnl < 0 THEN -pnl ELSE 0 END), 0.0),
                COALESCE(MAX(pnl), 0.0),
                COALESCE(MIN(pnl), 0.0)
             FROM trades",
            [],
            |row| {
                Ok(TradeAggregates {
                    total_count: row.get::<_, i64>(0)?.max(0) as usize,
                    wins: row.get::<_, i64>(1)?.max(0) as usize,
                    losses: row.get::<_, i64>(2)?.max(0) as usize,
                    breakevens: row.get::<_, i64>(3)?.max(0) as usize,
                    win_rate: 0.0,
                    total_pnl: row.get(4)?,
                    gross_profit: row.get(5)?,
                    gross_loss: row.get(6)?,
                    best_trade: row.get(7)?,
                    worst_trade: row.get(8)?,
                })
            },
        )?;

        agg.win_rate = win_rate(agg.wins, agg.total_count);
        Ok(agg)
    }
}
