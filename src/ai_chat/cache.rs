//! The assembled prompt context and the flag that serialises its builds.
//!
//! One `ContextCache` is owned per assistant instance and shared through an
//! `Arc`; there is no process-global state, so tests get isolated caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use crate::models::{TradeRecord, TradeSummary};

use super::intent::{IntentExtractor, QueryIntent};
use super::storage::{DataMutation, MutationObserver};

pub const NORMAL_SAMPLE_LIMIT: usize = 10;
pub const SIMPLIFIED_SAMPLE_LIMIT: usize = 5;

pub fn sample_limit(simplified_mode: bool) -> usize {
    if simplified_mode {
        SIMPLIFIED_SAMPLE_LIMIT
    } else {
        NORMAL_SAMPLE_LIMIT
    }
}

/// Prompt material cached between chat turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub system_prompt: String,
    pub sample_records: Vec<TradeRecord>,
    pub total_record_count: usize,
    pub win_rate: f64,
    pub aggregate_pnl: f64,
    pub most_recent_record_summary: Option<TradeSummary>,
    pub oldest_record_summary: Option<TradeSummary>,
    pub intent_used_to_build: QueryIntent,
    pub simplified_mode: bool,
    pub estimated_tokens: usize,
    pub built_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn is_empty_journal(&self) -> bool {
        self.total_record_count == 0
    }
}

pub struct ContextCache {
    entry: RwLock<Option<Arc<ContextSnapshot>>>,
    epoch: AtomicU64,  // Bumped by every invalidation
    writes: AtomicU64, // Bumped by every successful write
    loading: AtomicBool,
    build_finished: Notify,
    last_stamp: Mutex<DateTime<Utc>>,
    freshness: chrono::Duration,
    extractor: Arc<IntentExtractor>,
}

impl ContextCache {
    pub fn new(freshness: Duration, extractor: Arc<IntentExtractor>) -> Self {
        Self {
            entry: RwLock::new(None),
            epoch: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            build_finished: Notify::new(),
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
            freshness: chrono::Duration::from_std(freshness).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            extractor,
        }
    }

    pub fn is_valid(&self, message: &str) -> bool {
        self.valid_snapshot(message).is_some()
    }

    /// The cached snapshot if it can answer `message` as is: present,
    /// fresh, not a must-refresh question, and built for the same intent.
    pub fn valid_snapshot(&self, message: &str) -> Option<Arc<ContextSnapshot>> {
        let snapshot = self.read()?;
        if !self.is_fresh(&snapshot) || self.extractor.is_must_refresh(message) {
            return None;
        }
        if snapshot.intent_used_to_build != self.extractor.extract(message) {
            return None;
        }
        Some(snapshot)
    }

    pub fn read(&self) -> Option<Arc<ContextSnapshot>> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the entry unconditionally (last writer wins).
    pub fn write(&self, snapshot: ContextSnapshot) -> Arc<ContextSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *entry = Some(Arc::clone(&snapshot));
        self.writes.fetch_add(1, Ordering::SeqCst);
        snapshot
    }

    /// Store `snapshot` only if no invalidation happened since `epoch` was
    /// read. Returns the snapshot and whether it was stored.
    pub fn write_if_current(&self, snapshot: ContextSnapshot, epoch: u64) -> (Arc<ContextSnapshot>, bool) {
        let snapshot = Arc::new(snapshot);
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return (snapshot, false);
        }
        *entry = Some(Arc::clone(&snapshot));
        self.writes.fetch_add(1, Ordering::SeqCst);
        (snapshot, true)
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *entry = None;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        log::debug!("AI context cache invalidated");
    }

    /// Invalidate on behalf of a build that read `epoch`. Returns the epoch
    /// the build may keep writing under: the new one if nothing else
    /// invalidated in between, otherwise the stale one it already had.
    pub fn invalidate_for_rebuild(&self, epoch: u64) -> u64 {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *entry = None;
        let previous = self.epoch.fetch_add(1, Ordering::SeqCst);
        if previous == epoch {
            previous + 1
        } else {
            epoch
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Take the load flag if nobody holds it.
    pub fn try_begin_load(&self) -> Option<LoadGuard<'_>> {
        self.loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| LoadGuard { cache: self })
    }

    /// Wait for an in-flight build, at most `attempts` times `interval`.
    ///
    /// Returns a snapshot usable for `message` as soon as one is written, or
    /// `None` once the other build finished without one or the attempts are
    /// used up. Never blocks past the bound.
    pub async fn wait_for_build(
        &self,
        message: &str,
        interval: Duration,
        attempts: u32,
    ) -> Option<Arc<ContextSnapshot>> {
        let intent = self.extractor.extract(message);
        let writes_at_start = self.writes.load(Ordering::SeqCst);

        for attempt in 1..=attempts {
            let notified = self.build_finished.notified();
            if !self.is_loading() {
                return self.usable_after(message, &intent, writes_at_start);
            }

            let _ = tokio::time::timeout(interval, notified).await;

            if let Some(snapshot) = self.usable_after(message, &intent, writes_at_start) {
                log::debug!("Reused context built concurrently (attempt {})", attempt);
                return Some(snapshot);
            }
        }

        log::warn!(
            "Context build still running after {} attempts; building independently",
            attempts
        );
        None
    }

    /// Strictly increasing build timestamps.
    pub fn next_build_time(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let stamp = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
        *last = stamp;
        stamp
    }

    fn is_fresh(&self, snapshot: &ContextSnapshot) -> bool {
        Utc::now().signed_duration_since(snapshot.built_at) <= self.freshness
    }

    // Snapshots written after the wait began are accepted even for
    // must-refresh questions.
    fn usable_after(&self, message: &str, intent: &QueryIntent, writes_at_start: u64) -> Option<Arc<ContextSnapshot>> {
        if let Some(snapshot) = self.valid_snapshot(message) {
            return Some(snapshot);
        }
        if self.writes.load(Ordering::SeqCst) == writes_at_start {
            return None;
        }
        self.read()
            .filter(|s| self.is_fresh(s) && &s.intent_used_to_build == intent)
    }
}

impl MutationObserver for ContextCache {
    fn on_mutation(&self, mutation: &DataMutation) {
        log::debug!("Journal changed ({:?}); dropping AI context", mutation);
        self.invalidate();
    }
}

/// Held while a build runs; clears the load flag on every exit path.
pub struct LoadGuard<'a> {
    cache: &'a ContextCache,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.cache.loading.store(false, Ordering::SeqCst);
        self.cache.build_finished.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_chat::intent::OrderBy;

    fn cache_with_freshness(freshness: Duration) -> ContextCache {
        let extractor = Arc::new(IntentExtractor::new(&["breakout".to_string()], &[]));
        ContextCache::new(freshness, extractor)
    }

    fn snapshot(cache: &ContextCache, order_by: OrderBy) -> ContextSnapshot {
        ContextSnapshot {
            system_prompt: "prompt".to_string(),
            sample_records: Vec::new(),
            total_record_count: 3,
            win_rate: 66.67,
            aggregate_pnl: 75.0,
            most_recent_record_summary: None,
            oldest_record_summary: None,
            intent_used_to_build: QueryIntent {
                order_by,
                ..Default::default()
            },
            simplified_mode: false,
            estimated_tokens: 2,
            built_at: cache.next_build_time(),
        }
    }

    #[test]
    fn test_empty_cache_is_invalid() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        assert!(!cache.is_valid("How did I do last month?"));
        assert!(cache.read().is_none());
    }

    #[test]
    fn test_valid_for_same_intent_only() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        cache.write(snapshot(&cache, OrderBy::Newest));

        assert!(cache.is_valid("How did I do last month?"));
        assert!(cache.is_valid("Any thoughts on my recent trading?"));
        // Topic changed to the worst trades
        assert!(!cache.is_valid("What are my worst trades?"));
    }

    #[test]
    fn test_must_refresh_topics_are_never_served_from_cache() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        cache.write(snapshot(&cache, OrderBy::Oldest));

        assert!(!cache.is_valid("What was my first trade?"));
        assert!(!cache.is_valid("What is my total profit?"));
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_invalid() {
        let cache = cache_with_freshness(Duration::from_millis(20));
        cache.write(snapshot(&cache, OrderBy::Newest));
        assert!(cache.is_valid("How did I do last month?"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.is_valid("How did I do last month?"));
    }

    #[test]
    fn test_invalidate_clears_and_blocks_stale_writes() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        let epoch = cache.epoch();
        cache.write(snapshot(&cache, OrderBy::Newest));

        cache.invalidate();
        assert!(cache.read().is_none());

        let (_, stored) = cache.write_if_current(snapshot(&cache, OrderBy::Newest), epoch);
        assert!(!stored);
        assert!(cache.read().is_none());

        let (_, stored) = cache.write_if_current(snapshot(&cache, OrderBy::Newest), cache.epoch());
        assert!(stored);
        assert!(cache.read().is_some());
    }

    #[test]
    fn test_invalidate_for_rebuild_keeps_foreign_invalidations() {
        let cache = cache_with_freshness(Duration::from_secs(60));

        let epoch = cache.epoch();
        let continued = cache.invalidate_for_rebuild(epoch);
        assert_eq!(continued, cache.epoch());

        // Someone else invalidated after our build started
        cache.invalidate();
        let continued_again = cache.invalidate_for_rebuild(continued);
        assert_eq!(continued_again, continued);
        let (_, stored) = cache.write_if_current(snapshot(&cache, OrderBy::Newest), continued_again);
        assert!(!stored);
    }

    #[test]
    fn test_mutation_observer_invalidates() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        cache.write(snapshot(&cache, OrderBy::Newest));

        cache.on_mutation(&DataMutation::TradeCreated("TRADE-1".to_string()));
        assert!(!cache.is_valid("How did I do last month?"));
    }

    #[test]
    fn test_load_guard_is_exclusive_and_released_on_drop() {
        let cache = cache_with_freshness(Duration::from_secs(60));

        let guard = cache.try_begin_load();
        assert!(guard.is_some());
        assert!(cache.is_loading());
        assert!(cache.try_begin_load().is_none());

        drop(guard);
        assert!(!cache.is_loading());
        assert!(cache.try_begin_load().is_some());
    }

    #[test]
    fn test_build_times_strictly_increase() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        let mut previous = cache.next_build_time();
        for _ in 0..1000 {
            let next = cache.next_build_time();
            assert!(next > previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        let start = std::time::Instant::now();
        let result = cache
            .wait_for_build("How did I do?", Duration::from_secs(5), 10)
            .await;
        assert!(result.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_is_bounded_when_builder_stalls() {
        let cache = cache_with_freshness(Duration::from_secs(60));
        let _stalled = cache.try_begin_load();

        let start = std::time::Instant::now();
        let result = cache
            .wait_for_build("How did I do?", Duration::from_millis(10), 5)
            .await;

        assert!(result.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiter_picks_up_concurrent_build() {
        let cache = Arc::new(cache_with_freshness(Duration::from_secs(60)));

        let builder = Arc::clone(&cache);
        let guard_held = Arc::new(Notify::new());
        let guard_signal = Arc::clone(&guard_held);

        let task = tokio::spawn(async move {
            let _guard = builder.try_begin_load().expect("flag free");
            guard_signal.notify_one();
            tokio::time::sleep(Duration::from_millis(30)).await;
            builder.write(snapshot(&builder, OrderBy::Oldest));
        });

        guard_held.notified().await;
        // Must-refresh question: only a snapshot written during the wait qualifies
        let result = cache
            .wait_for_build("What was my first trade?", Duration::from_millis(500), 10)
            .await;
        task.await.unwrap();

        let snapshot = result.expect("snapshot from concurrent build");
        assert_eq!(snapshot.intent_used_to_build.order_by, OrderBy::Oldest);
    }
}
