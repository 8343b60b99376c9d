//! Performance Aggregator
//!
//! Bounded rolling history of resolved outcomes plus lifetime counters.
//! Rates are always recomputed from the raw windows, never stored.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use signal_core::stats::{ema, push_capped, rate, tail_mean, truncate_front};
use signal_core::{OutcomeCategory, TradeIntent};

pub const MIN_WINDOW: usize = 20;
pub const MAX_WINDOW: usize = 50;

/// Precision samples kept, and how many of the newest are averaged.
const PRECISION_HISTORY: usize = 20;
const PRECISION_TAIL: usize = 10;

/// Weight of the previous value in the overshoot and move averages.
const OVERSHOOT_KEEP: f64 = 0.7;
const MOVE_KEEP: f64 = 0.8;

fn default_window() -> usize {
    MAX_WINDOW
}

/// Target precision history for entries that filled and moved favorably.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionStats {
    /// Realized favorable move divided by intended target distance.
    #[serde(default)]
    pub samples: VecDeque<f64>,
    /// Average shortfall `1 - ratio` over samples that fell short.
    #[serde(default)]
    pub overshoot_ema: Option<f64>,
    /// Average realized favorable move, as a fraction of entry.
    #[serde(default)]
    pub move_ema: Option<f64>,
}

/// Rolling accuracy of one signal source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    #[serde(default)]
    pub recent: VecDeque<bool>,
    #[serde(default)]
    pub lifetime_samples: u64,
    #[serde(default)]
    pub lifetime_wins: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    #[serde(default = "default_window")]
    pub window: usize,
    /// Newest at the back.
    #[serde(default)]
    pub recent: VecDeque<OutcomeCategory>,
    #[serde(default)]
    pub lifetime: BTreeMap<OutcomeCategory, u64>,
    #[serde(default)]
    pub lifetime_resolved: u64,
    #[serde(default)]
    pub precision: PrecisionStats,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceStats>,
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new(MAX_WINDOW)
    }
}

/// Realized-vs-intended precision of one resolution, with the realized
/// favorable move. `checked` intents are measured at the close, `completed`
/// ones at the best price of the window, so overshoot shows up above 1.
pub fn precision_sample(intent: &TradeIntent, category: OutcomeCategory) -> Option<(f64, f64)> {
    let window = intent.realized.as_ref()?;
    let intended = intent.target_distance();
    if intended <= 0.0 {
        return None;
    }
    let price = match category {
        OutcomeCategory::TpNotReached => window.last_close,
        OutcomeCategory::Success => intent.direction.best_price(window),
        _ => return None,
    };
    let realized = intent.direction.favorable_return(intent.entry_price, price);
    if !realized.is_finite() || realized <= 0.0 {
        return None;
    }
    Some((realized / intended, realized))
}

impl RollingStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: Self::clamp_window(window),
            recent: VecDeque::new(),
            lifetime: BTreeMap::new(),
            lifetime_resolved: 0,
            precision: PrecisionStats::default(),
            sources: BTreeMap::new(),
        }
    }

    pub fn clamp_window(window: usize) -> usize {
        window.clamp(MIN_WINDOW, MAX_WINDOW)
    }

    /// Fold one resolved intent into the windows and counters.
    pub fn record(&mut self, intent: &TradeIntent, category: OutcomeCategory) {
        push_capped(&mut self.recent, category, self.window);
        *self.lifetime.entry(category).or_insert(0) += 1;
        self.lifetime_resolved += 1;

        if let Some((ratio, realized)) = precision_sample(intent, category) {
            push_capped(&mut self.precision.samples, ratio, PRECISION_HISTORY);
            if ratio < 1.0 {
                self.precision.overshoot_ema = Some(ema(
                    self.precision.overshoot_ema,
                    1.0 - ratio,
                    OVERSHOOT_KEEP,
                ));
            }
            self.precision.move_ema = Some(ema(self.precision.move_ema, realized, MOVE_KEEP));
        }

        // An unfilled entry never tested the sources' call.
        if category.entry_reached() {
            let won = category == OutcomeCategory::Success;
            for source in &intent.sources {
                let stats = self.sources.entry(source.clone()).or_default();
                push_capped(&mut stats.recent, won, self.window);
                stats.lifetime_samples += 1;
                if won {
                    stats.lifetime_wins += 1;
                }
            }
        }
    }

    /// Fresh statistics from resolved intents, oldest first.
    pub fn replay<'a, I>(resolved: I, window: usize) -> Self
    where
        I: IntoIterator<Item = (&'a TradeIntent, OutcomeCategory)>,
    {
        let mut stats = Self::new(window);
        for (intent, category) in resolved {
            stats.record(intent, category);
        }
        stats
    }

    /// Re-establish the window invariants after loading from disk.
    pub fn sanitize(&mut self, window: usize) {
        self.window = Self::clamp_window(window);
        truncate_front(&mut self.recent, self.window);

        self.precision
            .samples
            .retain(|ratio| ratio.is_finite() && *ratio > 0.0);
        truncate_front(&mut self.precision.samples, PRECISION_HISTORY);
        self.precision.overshoot_ema = self.precision.overshoot_ema.filter(|v| v.is_finite());
        self.precision.move_ema = self.precision.move_ema.filter(|v| v.is_finite());

        for stats in self.sources.values_mut() {
            truncate_front(&mut stats.recent, self.window);
            stats.lifetime_wins = stats.lifetime_wins.min(stats.lifetime_samples);
        }

        self.lifetime_resolved = self.lifetime.values().sum();
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let resolved = self.recent.len();
        let mut counts: BTreeMap<OutcomeCategory, usize> =
            OutcomeCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for category in &self.recent {
            *counts.entry(*category).or_insert(0) += 1;
        }

        let count = |c: OutcomeCategory| counts.get(&c).copied().unwrap_or(0);
        let entry_reached = resolved - count(OutcomeCategory::EntryNotReached);
        let direction_right =
            count(OutcomeCategory::Success) + count(OutcomeCategory::TpNotReached);

        let sources = self
            .sources
            .iter()
            .filter(|(_, s)| !s.recent.is_empty())
            .map(|(name, s)| {
                let wins = s.recent.iter().filter(|w| **w).count();
                (
                    name.clone(),
                    SourceAccuracy {
                        accuracy: wins as f64 / s.recent.len() as f64,
                        samples: s.recent.len(),
                    },
                )
            })
            .collect();

        PerformanceSnapshot {
            resolved,
            win_rate: rate(count(OutcomeCategory::Success), resolved),
            direction_accuracy: rate(direction_right, entry_reached),
            precision_ratio: tail_mean(&self.precision.samples, PRECISION_TAIL),
            precision_samples: self.precision.samples.len().min(PRECISION_TAIL),
            overshoot_ema: self.precision.overshoot_ema,
            move_ema: self.precision.move_ema,
            lifetime_resolved: self.lifetime_resolved,
            counts,
            sources,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceAccuracy {
    pub accuracy: f64,
    pub samples: usize,
}

/// Derived view of the rolling statistics consumed by the adjuster and the
/// summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Resolutions in the rolling window.
    pub resolved: usize,
    pub counts: BTreeMap<OutcomeCategory, usize>,
    pub win_rate: Option<f64>,
    /// Share of filled entries whose direction call was right.
    pub direction_accuracy: Option<f64>,
    pub precision_ratio: Option<f64>,
    pub precision_samples: usize,
    pub overshoot_ema: Option<f64>,
    pub move_ema: Option<f64>,
    pub sources: BTreeMap<String, SourceAccuracy>,
    pub lifetime_resolved: u64,
}

impl PerformanceSnapshot {
    pub fn rate(&self, category: OutcomeCategory) -> Option<f64> {
        rate(
            self.counts.get(&category).copied().unwrap_or(0),
            self.resolved,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use signal_core::{Direction, IntentStatus, NewIntent, ParamSnapshot, PriceWindow};

    fn resolved(category: OutcomeCategory, window: PriceWindow, sources: &[&str]) -> TradeIntent {
        let mut intent = NewIntent {
            symbol: "BTC-USD".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            created_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            confidence: None,
            sentiment_score: None,
            technical_score: None,
            leverage: None,
            rr_ratio: None,
            rationale: None,
        }
        .into_intent(Utc::now(), ParamSnapshot::default());
        intent.status = IntentStatus::Checked;
        intent.category = Some(category);
        intent.realized = Some(window);
        intent
    }

    #[test]
    fn test_window_is_fifo_and_capped() {
        let mut stats = RollingStats::new(20);
        let window = PriceWindow::new(111.0, 99.0, 108.0);
        for _ in 0..25 {
            stats.record(
                &resolved(OutcomeCategory::Success, window, &[]),
                OutcomeCategory::Success,
            );
        }
        let miss = PriceWindow::new(104.0, 101.0, 103.0);
        for _ in 0..5 {
            stats.record(
                &resolved(OutcomeCategory::EntryNotReached, miss, &[]),
                OutcomeCategory::EntryNotReached,
            );
        }

        assert_eq!(stats.recent.len(), 20);
        assert_eq!(stats.lifetime_resolved, 30);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rate(OutcomeCategory::EntryNotReached), Some(0.25));
        assert_eq!(snapshot.win_rate, Some(0.75));
        assert_eq!(snapshot.direction_accuracy, Some(1.0));
    }

    #[test]
    fn test_precision_tracks_shortfall_and_overshoot() {
        let mut stats = RollingStats::default();
        // Close at 105 on a 10% target: half the intended move.
        let short = resolved(
            OutcomeCategory::TpNotReached,
            PriceWindow::new(106.0, 99.0, 105.0),
            &[],
        );
        stats.record(&short, OutcomeCategory::TpNotReached);
        let snapshot = stats.snapshot();
        assert!((snapshot.precision_ratio.unwrap() - 0.5).abs() < 1e-9);
        assert!((snapshot.overshoot_ema.unwrap() - 0.5).abs() < 1e-9);

        // Ran to 115 on a 10% target.
        let long_run = resolved(
            OutcomeCategory::Success,
            PriceWindow::new(115.0, 99.0, 112.0),
            &[],
        );
        stats.record(&long_run, OutcomeCategory::Success);
        let snapshot = stats.snapshot();
        assert!((snapshot.precision_ratio.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(snapshot.precision_samples, 2);
    }

    #[test]
    fn test_wrong_direction_contributes_no_precision() {
        let intent = resolved(
            OutcomeCategory::WrongDirection,
            PriceWindow::new(102.0, 97.0, 98.0),
            &[],
        );
        assert_eq!(precision_sample(&intent, OutcomeCategory::WrongDirection), None);
    }

    #[test]
    fn test_sources_are_tracked_independently() {
        let mut stats = RollingStats::default();
        let win = PriceWindow::new(111.0, 99.0, 109.0);
        let loss = PriceWindow::new(101.0, 94.0, 95.0);

        stats.record(
            &resolved(OutcomeCategory::Success, win, &["rsi", "macd"]),
            OutcomeCategory::Success,
        );
        stats.record(
            &resolved(OutcomeCategory::SlHitEarly, loss, &["rsi"]),
            OutcomeCategory::SlHitEarly,
        );
        stats.record(
            &resolved(OutcomeCategory::EntryNotReached, win, &["macd"]),
            OutcomeCategory::EntryNotReached,
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sources["rsi"].accuracy, 0.5);
        assert_eq!(snapshot.sources["rsi"].samples, 2);
        assert_eq!(snapshot.sources["macd"].accuracy, 1.0);
        assert_eq!(snapshot.sources["macd"].samples, 1);
    }

    #[test]
    fn test_sanitize_recomputes_derived_counters() {
        let mut stats = RollingStats::new(50);
        for _ in 0..40 {
            stats.recent.push_back(OutcomeCategory::Success);
        }
        stats.lifetime.insert(OutcomeCategory::Success, 40);
        stats.lifetime_resolved = 7;
        stats.precision.samples.push_back(f64::NAN);

        stats.sanitize(20);

        assert_eq!(stats.window, 20);
        assert_eq!(stats.recent.len(), 20);
        assert_eq!(stats.lifetime_resolved, 40);
        assert!(stats.precision.samples.is_empty());
    }
}
