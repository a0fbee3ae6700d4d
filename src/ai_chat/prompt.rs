use serde::Serialize;
use std::fmt::Write as _;

use crate::config::PinnedMetric;
use crate::models::{Direction, TradeRecord, TradeSummary};

use super::intent::QueryIntent;
use super::storage::TradeAggregates;

/// Free-text labels in the sample are clipped to this length in simplified mode.
pub const SIMPLIFIED_LABEL_CHARS: usize = 60;

const ROLE: &str = "You are the trading journal assistant. Answer questions about the user's own trade history using only the data below. If the data does not contain the answer, say so instead of guessing.";

/// Everything the template needs for one render
pub struct PromptInput<'a> {
    pub aggregates: &'a TradeAggregates,
    pub oldest: Option<&'a TradeSummary>,
    pub newest: Option<&'a TradeSummary>,
    pub sample: &'a [TradeRecord],
    pub intent: &'a QueryIntent,
    pub simplified_mode: bool,
    pub pinned_metrics: &'a [PinnedMetric],
}

#[derive(Serialize)]
struct SampleRow<'a> {
    date: String,
    symbol: &'a str,
    direction: Direction,
    entry: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit: Option<f64>,
    quantity: f64,
    pnl: f64,
    strategy: &'a str,
    mood: &'a str,
}

impl<'a> From<&'a TradeRecord> for SampleRow<'a> {
    fn from(trade: &'a TradeRecord) -> Self {
        SampleRow {
            date: trade.trade_date.format("%Y-%m-%d").to_string(),
            symbol: &trade.symbol,
            direction: trade.direction,
            entry: trade.entry_price,
            exit: trade.exit_price,
            quantity: trade.quantity,
            pnl: trade.pnl,
            strategy: &trade.strategy,
            mood: &trade.mood,
        }
    }
}

/// Render the system prompt. Same input, same output.
pub fn render(input: &PromptInput<'_>) -> String {
    let agg = input.aggregates;
    let mut out = String::with_capacity(2048);

    out.push_str(ROLE);
    out.push_str("\n\n");

    let _ = writeln!(out, "## Account statistics (all {} trades)", agg.total_count);
    let _ = writeln!(out, "- Total trades: {}", agg.total_count);
    let _ = writeln!(
        out,
        "- Win rate: {:.2}% ({} winning, {} losing, {} breakeven)",
        agg.win_rate, agg.wins, agg.losses, agg.breakevens
    );
    let _ = writeln!(out, "- Total P&L: {}", money(agg.total_pnl));
    let _ = writeln!(
        out,
        "- Gross profit: {} / gross loss: {}",
        money(agg.gross_profit),
        money(-agg.gross_loss)
    );
    let _ = writeln!(
        out,
        "- Best trade: {} / worst trade: {}",
        money(agg.best_trade),
        money(agg.worst_trade)
    );

    render_pinned(&mut out, input.pinned_metrics);

    out.push_str("\n## First trade\n");
    out.push_str(&summary_line(input.oldest));
    out.push_str("\n## Most recent trade\n");
    out.push_str(&summary_line(input.newest));

    let _ = writeln!(
        out,
        "\n## Sample trades ({} of {}, {})",
        input.sample.len(),
        agg.total_count,
        input.intent.describe()
    );
    out.push_str(
        "The statistics above cover the full history. The trades below are only a sample selected for this question: never compute totals, averages or win rates from the sample.\n",
    );
    if input.simplified_mode {
        out.push_str("Simplified mode is on: the sample is reduced and long notes are shortened.\n");
    }

    let rows: Vec<SampleRow<'_>> = input.sample.iter().map(SampleRow::from).collect();
    let json = if input.simplified_mode {
        serde_json::to_string(&rows)
    } else {
        serde_json::to_string_pretty(&rows)
    }
    .unwrap_or_else(|_| "[]".to_string());

    out.push_str("```json\n");
    out.push_str(&json);
    out.push_str("\n```\n");

    out
}

/// Prompt for a journal without any trades yet.
pub fn render_empty(pinned_metrics: &[PinnedMetric]) -> String {
    let mut out = String::new();
    out.push_str(ROLE);
    out.push_str("\n\n## Account statistics (all 0 trades)\n");
    out.push_str(
        "The journal has no trades yet. Explain that there is no history to analyse and suggest adding trades to the journal first.\n",
    );
    render_pinned(&mut out, pinned_metrics);
    out
}

fn render_pinned(out: &mut String, pinned_metrics: &[PinnedMetric]) {
    if pinned_metrics.is_empty() {
        return;
    }
    out.push_str("\n## Pinned metrics (provided by the user, not computed from the journal)\n");
    for metric in pinned_metrics {
        let _ = writeln!(out, "- {}: {}", metric.label, metric.value);
    }
}

fn summary_line(summary: Option<&TradeSummary>) -> String {
    match summary {
        Some(s) => format!(
            "{} {} {} P&L {} (strategy: {})\n",
            s.date,
            s.symbol,
            s.direction.as_str(),
            money(s.pnl),
            if s.strategy.is_empty() { "-" } else { &s.strategy }
        ),
        None => "None\n".to_string(),
    }
}

fn money(value: f64) -> String {
    if value >= 0.0 {
        format!("+{:.2}", value)
    } else {
        format!("{:.2}", value)
    }
}
