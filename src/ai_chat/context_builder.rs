//! Assembles the context snapshot for a question.
//!
//! Cache first, then a bounded wait for a concurrent build, then storage:
//! the total count, an intent-ordered slice, the first and most recent
//! trades, and whole-history aggregates. The rendered prompt must fit the
//! token ceiling; the builder switches to simplified mode and keeps
//! shrinking the sample until it does.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::api::AssistantError;
use crate::config::{AssistantConfig, CacheConfig, PinnedMetric};
use crate::models::{TradeRecord, TradeSummary};

use super::cache::{sample_limit, ContextCache, ContextSnapshot};
use super::intent::{IntentExtractor, QueryIntent};
use super::prompt::{self, PromptInput, SIMPLIFIED_LABEL_CHARS};
use super::storage::{PreferenceStore, TradeAggregates, TradeQuery, TradeStore};
use super::token_estimator::{self, TokenBudget};

pub struct ContextBuilder {
    store: Arc<dyn TradeStore>,
    preferences: Arc<dyn PreferenceStore>,
    cache: Arc<ContextCache>,
    extractor: Arc<IntentExtractor>,
    budget: TokenBudget,
    cache_config: CacheConfig,
    pinned_metrics: Vec<PinnedMetric>,
    auto_simplify_after: u32,
    overflow_streak: AtomicU32,
}

/// Storage reads shared by every render attempt of one build
struct BuildData {
    total: usize,
    aggregates: TradeAggregates,
    oldest: Option<TradeSummary>,
    newest: Option<TradeSummary>,
    /// Intent the sample was actually queried with
    sampled: QueryIntent,
}

impl ContextBuilder {
    pub fn new(
        config: &AssistantConfig,
        store: Arc<dyn TradeStore>,
        preferences: Arc<dyn PreferenceStore>,
        cache: Arc<ContextCache>,
        extractor: Arc<IntentExtractor>,
    ) -> Self {
        Self {
            store,
            preferences,
            cache,
            extractor,
            budget: config.budget,
            cache_config: config.cache.clone(),
            pinned_metrics: config.pinned_metrics.clone(),
            auto_simplify_after: config.auto_simplify_after.max(1),
            overflow_streak: AtomicU32::new(0),
        }
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Return a snapshot for `message`, from the cache when possible.
    pub async fn build(&self, message: &str) -> Result<Arc<ContextSnapshot>, AssistantError> {
        if let Some(snapshot) = self.cache.valid_snapshot(message) {
            log::debug!("AI context cache hit (built at {})", snapshot.built_at);
            return Ok(snapshot);
        }

        if self.cache.is_loading() {
            let waited = self
                .cache
                .wait_for_build(
                    message,
                    self.cache_config.poll_interval,
                    self.cache_config.poll_attempts,
                )
                .await;
            if let Some(snapshot) = waited {
                return Ok(snapshot);
            }
        }

        // None when a stalled build still holds the flag; we build anyway
        let _guard = self.cache.try_begin_load();
        let mut epoch = self.cache.epoch();

        let intent = self.extractor.extract(message);
        let simplified = self.preferences.simplified_mode().unwrap_or_else(|e| {
            log::warn!("Could not read simplified mode preference: {}", e);
            false
        });

        log::info!(
            "Building AI context ({}, simplified: {})",
            intent.describe(),
            simplified
        );

        let snapshot = self.assemble(&intent, simplified, &mut epoch).await?;
        let (snapshot, stored) = self.cache.write_if_current(snapshot, epoch);
        if !stored {
            log::debug!("Journal changed during the build; context not cached");
        }

        log::info!(
            "AI context ready: {} of {} trades, ~{} tokens",
            snapshot.sample_records.len(),
            snapshot.total_record_count,
            snapshot.estimated_tokens
        );

        Ok(snapshot)
    }

    async fn assemble(
        &self,
        intent: &QueryIntent,
        mut simplified: bool,
        epoch: &mut u64,
    ) -> Result<ContextSnapshot, AssistantError> {
        let total = self.store.count().await?;
        if total == 0 {
            return Ok(self.empty_snapshot(intent, simplified));
        }

        let mut data = BuildData {
            total,
            aggregates: self.store.aggregates().await?,
            oldest: self.store.oldest().await?.map(|t| t.summary()),
            newest: self.store.newest().await?.map(|t| t.summary()),
            sampled: intent.clone(),
        };

        let started_simplified = simplified;
        let mut overflowed = false;
        let snapshot = loop {
            let sample = self.fetch_sample(&mut data.sampled, simplified).await?;
            let system_prompt = self.render(&data, &sample, simplified);

            if self.budget.fits(&system_prompt) {
                break self.snapshot(&data, sample, intent, simplified, system_prompt);
            }

            overflowed = true;
            if !simplified {
                log::info!(
                    "AI context over budget (~{} > {} tokens); rebuilding in simplified mode",
                    token_estimator::estimate(&system_prompt),
                    self.budget.ceiling()
                );
                simplified = true;
                *epoch = self.cache.invalidate_for_rebuild(*epoch);
                continue;
            }

            break self.shrink_to_budget(&data, sample, intent);
        };

        // One count per build, however many renders it took
        if overflowed {
            self.record_overflow();
        } else if !started_simplified {
            self.overflow_streak.store(0, Ordering::SeqCst);
        }

        Ok(snapshot)
    }

    async fn fetch_sample(
        &self,
        intent: &mut QueryIntent,
        simplified: bool,
    ) -> Result<Vec<TradeRecord>, AssistantError> {
        let limit = intent
            .requested_count
            .map_or(sample_limit(simplified), |n| n.min(sample_limit(simplified)));

        let mut query = TradeQuery {
            order_by: intent.order_by,
            filter_strategy: intent.filter_strategy.clone(),
            filter_symbol: intent.filter_symbol.clone(),
            limit,
        };
        let mut sample = self.store.query(&query).await?;

        // Ticker detection is heuristic; retry without the symbol
        if sample.is_empty() && query.filter_symbol.is_some() {
            log::debug!(
                "No trades match symbol {:?}; sampling without the symbol filter",
                query.filter_symbol
            );
            query.filter_symbol = None;
            intent.filter_symbol = None;
            sample = self.store.query(&query).await?;
        }

        let mut sample: Vec<TradeRecord> = if simplified {
            sample.iter().map(|t| t.clipped(SIMPLIFIED_LABEL_CHARS)).collect()
        } else {
            sample
        };
        sample.truncate(limit);
        Ok(sample)
    }

    /// Already simplified and still too large: drop sample rows one at a
    /// time down to a single record, then the sample itself, then cut the
    /// text. Always returns a prompt within the ceiling.
    fn shrink_to_budget(
        &self,
        data: &BuildData,
        mut sample: Vec<TradeRecord>,
        intent: &QueryIntent,
    ) -> ContextSnapshot {
        while sample.len() > 1 {
            sample.pop();
            let system_prompt = self.render(data, &sample, true);
            if self.budget.fits(&system_prompt) {
                log::info!("AI context truncated to {} sample trade(s)", sample.len());
                return self.snapshot(data, sample, intent, true, system_prompt);
            }
        }

        sample.clear();
        let system_prompt = self.render(data, &sample, true);
        if self.budget.fits(&system_prompt) {
            log::warn!("AI context sent without sample trades to stay within budget");
            return self.snapshot(data, sample, intent, true, system_prompt);
        }

        log::warn!("AI context cut to the token ceiling");
        let system_prompt =
            token_estimator::truncate_to_tokens(&system_prompt, self.budget.ceiling()).to_string();
        self.snapshot(data, sample, intent, true, system_prompt)
    }

    fn record_overflow(&self) {
        let streak = self.overflow_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak < self.auto_simplify_after {
            return;
        }
        match self.preferences.simplified_mode() {
            Ok(true) => {}
            Ok(false) => {
                log::info!(
                    "Context exceeded the budget in {} builds in a row; enabling simplified mode",
                    streak
                );
                if let Err(e) = self.preferences.set_simplified_mode(true, true) {
                    log::warn!("Could not persist simplified mode: {}", e);
                }
            }
            Err(e) => log::warn!("Could not read simplified mode preference: {}", e),
        }
    }

    fn render(
        &self,
        data: &BuildData,
        sample: &[TradeRecord],
        simplified: bool,
    ) -> String {
        prompt::render(&PromptInput {
            aggregates: &data.aggregates,
            oldest: data.oldest.as_ref(),
            newest: data.newest.as_ref(),
            sample,
            intent: &data.sampled,
            simplified_mode: simplified,
            pinned_metrics: &self.pinned_metrics,
        })
    }

    fn snapshot(
        &self,
        data: &BuildData,
        sample: Vec<TradeRecord>,
        intent: &QueryIntent,
        simplified: bool,
        system_prompt: String,
    ) -> ContextSnapshot {
        ContextSnapshot {
            estimated_tokens: token_estimator::estimate(&system_prompt),
            system_prompt,
            sample_records: sample,
            total_record_count: data.total,
            win_rate: data.aggregates.win_rate,
            aggregate_pnl: data.aggregates.total_pnl,
            most_recent_record_summary: data.newest.clone(),
            oldest_record_summary: data.oldest.clone(),
            intent_used_to_build: intent.clone(),
            simplified_mode: simplified,
            built_at: self.cache.next_build_time(),
        }
    }

    fn empty_snapshot(&self, intent: &QueryIntent, simplified: bool) -> ContextSnapshot {
        let system_prompt = prompt::render_empty(&self.pinned_metrics);
        let system_prompt =
            token_estimator::truncate_to_tokens(&system_prompt, self.budget.ceiling()).to_string();
        ContextSnapshot {
            estimated_tokens: token_estimator::estimate(&system_prompt),
            system_prompt,
            sample_records: Vec::new(),
            total_record_count: 0,
            win_rate: 0.0,
            aggregate_pnl: 0.0,
            most_recent_record_summary: None,
            oldest_record_summary: None,
            intent_used_to_build: intent.clone(),
            simplified_mode: simplified,
            built_at: self.cache.next_build_time(),
        }
    }
}
