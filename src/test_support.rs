//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::ai_chat::intent::OrderBy;
use crate::ai_chat::storage::{PreferenceStore, TradeAggregates, TradeQuery, TradeStore};
use crate::api::{AssistantError, CompletionRequest, CredentialStore, ModelProvider};
use crate::db::{Database, SqliteTradeStore};
use crate::models::{CreateTradeInput, Direction, TradeRecord};

pub const TEST_API_KEY: &str = "sk-test-0123456789abcdefghij";

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// BTCUSDT long "breakout" trade dated 2024-01-01 plus `i` days.
pub fn trade_with_pnl(i: i64, pnl: f64) -> TradeRecord {
    let input = trade_input(i, pnl);
    TradeRecord {
        id: format!("TRADE-{}", i),
        symbol: input.symbol,
        direction: input.direction,
        entry_price: input.entry_price,
        exit_price: input.exit_price,
        quantity: input.quantity,
        pnl: input.pnl,
        trade_date: input.trade_date,
        strategy: input.strategy,
        mood: input.mood,
    }
}

pub fn trade_input(i: i64, pnl: f64) -> CreateTradeInput {
    let day = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::days(i);
    CreateTradeInput {
        symbol: "BTCUSDT".to_string(),
        direction: Direction::Long,
        entry_price: 100.0,
        exit_price: Some(100.0 + pnl),
        quantity: 1.0,
        pnl,
        trade_date: day,
        strategy: "breakout".to_string(),
        mood: "calm".to_string(),
    }
}

/// SQLite store on a fresh in-memory database, one trade per `pnls`
/// entry on consecutive days.
pub fn seeded_store(pnls: &[f64]) -> SqliteTradeStore {
    let store = SqliteTradeStore::new(Arc::new(Database::open_in_memory().unwrap()));
    for (i, pnl) in pnls.iter().enumerate() {
        store.create_trade(trade_input(i as i64, *pnl)).unwrap();
    }
    store
}

/// In-memory journal that counts storage round trips and can be slowed
/// down or made to fail.
pub struct MemoryTradeStore {
    records: Vec<TradeRecord>,
    delay: Duration,
    failing: AtomicBool,
    pub count_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl MemoryTradeStore {
    pub fn new(records: Vec<TradeRecord>) -> Self {
        Self {
            records,
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            count_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_pnls(pnls: &[f64]) -> Self {
        Self::new(
            pnls.iter()
                .enumerate()
                .map(|(i, p)| trade_with_pnl(i as i64, *p))
                .collect(),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn round_trip(&self) -> Result<(), AssistantError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AssistantError::StorageUnavailable("database is locked".to_string()));
        }
        Ok(())
    }

    fn sorted(&self, order_by: OrderBy) -> Vec<TradeRecord> {
        let mut records = self.records.clone();
        match order_by {
            OrderBy::Newest => records.sort_by(|a, b| b.trade_date.cmp(&a.trade_date)),
            OrderBy::Oldest => records.sort_by(|a, b| a.trade_date.cmp(&b.trade_date)),
            OrderBy::HighestPnl => records.sort_by(|a, b| b.pnl.total_cmp(&a.pnl)),
            OrderBy::LowestPnl => records.sort_by(|a, b| a.pnl.total_cmp(&b.pnl)),
        }
        records
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn count(&self) -> Result<usize, AssistantError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        Ok(self.records.len())
    }

    async fn query(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, AssistantError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let contains = |haystack: &str, needle: &Option<String>| {
            needle
                .as_ref()
                .is_none_or(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
        };

        Ok(self
            .sorted(query.order_by)
            .into_iter()
            .filter(|t| contains(&t.strategy, &query.filter_strategy))
            .filter(|t| contains(&t.symbol, &query.filter_symbol))
            .take(query.limit)
            .collect())
    }

    async fn oldest(&self) -> Result<Option<TradeRecord>, AssistantError> {
        self.round_trip().await?;
        Ok(self.sorted(OrderBy::Oldest).into_iter().next())
    }

    async fn newest(&self) -> Result<Option<TradeRecord>, AssistantError> {
        self.round_trip().await?;
        Ok(self.sorted(OrderBy::Newest).into_iter().next())
    }

    async fn aggregates(&self) -> Result<TradeAggregates, AssistantError> {
        self.round_trip().await?;
        Ok(TradeAggregates::from_records(&self.records))
    }
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    simplified: AtomicBool,
    pub forced_writes: AtomicUsize,
}

impl MemoryPreferenceStore {
    pub fn simplified() -> Self {
        let prefs = Self::default();
        prefs.simplified.store(true, Ordering::SeqCst);
        prefs
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn simplified_mode(&self) -> Result<bool, AssistantError> {
        Ok(self.simplified.load(Ordering::SeqCst))
    }

    fn set_simplified_mode(&self, enabled: bool, forced: bool) -> Result<(), AssistantError> {
        if forced {
            self.forced_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.simplified.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    key: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_key(key: &str) -> Self {
        Self {
            key: Mutex::new(Some(key.to_string())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credential(&self) -> Result<Option<String>, AssistantError> {
        Ok(self.key.lock().unwrap().clone())
    }

    fn set_credential(&self, value: &str) -> Result<bool, AssistantError> {
        match crate::api::credentials::validate_credential(value) {
            Some(key) => {
                *self.key.lock().unwrap() = Some(key.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_credential(&self) -> Result<(), AssistantError> {
        *self.key.lock().unwrap() = None;
        Ok(())
    }
}

/// Model stub that records every request and answers with a fixed result.
pub struct FakeModel {
    reply: Result<String, AssistantError>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeModel {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: AssistantError) -> Self {
        Self {
            reply: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for FakeModel {
    fn provider_name(&self) -> &str {
        "fake"
    }

    async fn complete(
        &self,
        _credential: &str,
        request: &CompletionRequest,
    ) -> Result<String, AssistantError> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply.clone()
    }
}
