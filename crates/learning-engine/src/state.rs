use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_core::{OutcomeCategory, ParamSnapshot, TradeIntent, SOURCE_WEIGHT};

use crate::adjuster::Knob;
use crate::aggregator::RollingStats;

/// Current on-disk schema of [`LearningState`].
pub const STATE_VERSION: u32 = 1;

fn current_version() -> u32 {
    STATE_VERSION
}

/// The no-signal loop: how many invocations in a row produced nothing, and
/// how much loosening is still outstanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DroughtState {
    #[serde(default)]
    pub consecutive_no_signal: u32,
    #[serde(default)]
    pub loosen_steps: u32,
    /// Net loosening applied per knob and not yet taken back.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub offsets: BTreeMap<Knob, f64>,
}

impl DroughtState {
    pub fn is_loosened(&self) -> bool {
        self.loosen_steps > 0 || !self.offsets.is_empty()
    }
}

/// Everything the control loop remembers between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub params: ParamSnapshot,
    /// Sources absent from the map are at baseline.
    #[serde(default)]
    pub source_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub stats: RollingStats,
    #[serde(default)]
    pub drought: DroughtState,
    /// Resolution time of the newest intent folded into `stats`.
    #[serde(default)]
    pub aggregated_through: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LearningState {
    /// Baseline parameters and empty statistics.
    pub fn new(window: usize) -> Self {
        Self {
            version: STATE_VERSION,
            params: ParamSnapshot::default(),
            source_weights: BTreeMap::new(),
            stats: RollingStats::new(window),
            drought: DroughtState::default(),
            aggregated_through: None,
            cycles: 0,
            updated_at: None,
        }
    }

    /// Clamp every parameter and re-derive counters after a load, so values
    /// written by older versions or by hand cannot escape their bounds.
    pub fn sanitize(&mut self, window: usize) {
        if self.version != STATE_VERSION {
            tracing::info!(
                from = self.version,
                to = STATE_VERSION,
                "Upgrading learning state schema"
            );
            self.version = STATE_VERSION;
        }
        self.params = self.params.clamped();
        for weight in self.source_weights.values_mut() {
            *weight = SOURCE_WEIGHT.clamp(*weight);
        }
        self.stats.sanitize(window);
        self.drought
            .offsets
            .retain(|_, offset| offset.is_finite() && *offset != 0.0);
    }

    /// Fold resolved intents (oldest first) into the statistics, skipping
    /// any resolved at or before the watermark. A ledger written without a
    /// matching state update is picked up here on the next run.
    pub fn absorb<'a, I>(&mut self, resolved: I) -> usize
    where
        I: IntoIterator<Item = (&'a TradeIntent, OutcomeCategory)>,
    {
        let watermark = self.aggregated_through;
        let mut absorbed = 0;
        for (intent, category) in resolved {
            let at = intent.resolved_at.unwrap_or(intent.created_at);
            if watermark.is_some_and(|w| at <= w) {
                continue;
            }
            self.stats.record(intent, category);
            self.aggregated_through = Some(self.aggregated_through.map_or(at, |w| w.max(at)));
            absorbed += 1;
        }
        absorbed
    }

    /// Replace the statistics with a replay of `resolved`. Parameters and
    /// the no-signal loop are kept.
    pub fn rebuild<'a, I>(&mut self, resolved: I) -> usize
    where
        I: IntoIterator<Item = (&'a TradeIntent, OutcomeCategory)>,
    {
        self.stats = RollingStats::new(self.stats.window);
        self.aggregated_through = None;
        self.absorb(resolved)
    }

    pub fn source_weight(&self, source: &str) -> f64 {
        self.source_weights
            .get(source)
            .copied()
            .unwrap_or(SOURCE_WEIGHT.baseline)
    }
}

impl Default for LearningState {
    fn default() -> Self {
        Self::new(crate::aggregator::MAX_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use signal_core::{
        Direction, IntentStatus, NewIntent, PriceWindow, CONFIDENCE_GATE, STOP_DISTANCE,
    };

    fn resolved_at(hour: u32, category: OutcomeCategory) -> TradeIntent {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut intent = NewIntent {
            symbol: format!("SYM{}", hour),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            created_at: Some(t0),
            sources: vec![],
            confidence: None,
            sentiment_score: None,
            technical_score: None,
            leverage: None,
            rr_ratio: None,
            rationale: None,
        }
        .into_intent(t0, ParamSnapshot::default());
        intent.status = IntentStatus::Completed;
        intent.category = Some(category);
        intent.realized = Some(PriceWindow::new(111.0, 99.0, 110.0));
        intent.resolved_at = Some(t0 + Duration::hours(hour as i64));
        intent
    }

    #[test]
    fn test_absorb_is_idempotent_past_watermark() {
        let a = resolved_at(5, OutcomeCategory::Success);
        let b = resolved_at(5, OutcomeCategory::SlHitEarly);
        let c = resolved_at(9, OutcomeCategory::Success);
        let mut state = LearningState::default();

        let first = [
            (&a, OutcomeCategory::Success),
            (&b, OutcomeCategory::SlHitEarly),
        ];
        assert_eq!(state.absorb(first), 2);
        assert_eq!(state.aggregated_through, a.resolved_at);

        let all = [
            (&a, OutcomeCategory::Success),
            (&b, OutcomeCategory::SlHitEarly),
            (&c, OutcomeCategory::Success),
        ];
        assert_eq!(state.absorb(all), 1);
        assert_eq!(state.absorb(all), 0);
        assert_eq!(state.stats.lifetime_resolved, 3);

        state.params.stop_distance = 1.2;
        assert_eq!(state.rebuild(all), 3);
        assert_eq!(state.stats.recent.len(), 3);
        assert_eq!(state.params.stop_distance, 1.2);
    }

    #[test]
    fn test_missing_fields_default_to_baseline() {
        let state: LearningState =
            serde_json::from_str(r#"{"params": {"stop_distance": 1.3}}"#).unwrap();

        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.params.stop_distance, 1.3);
        assert_eq!(state.params.confidence_gate, CONFIDENCE_GATE.baseline);
        assert_eq!(state.source_weight("rsi"), 1.0);
        assert_eq!(state.drought, DroughtState::default());
    }

    #[test]
    fn test_sanitize_clamps_out_of_range_values() {
        let mut state: LearningState = serde_json::from_str(
            r#"{"version": 0, "params": {"stop_distance": 9.0, "confidence_gate": 0.01},
                "source_weights": {"rsi": 4.0}}"#,
        )
        .unwrap();

        state.sanitize(50);

        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.params.stop_distance, STOP_DISTANCE.ceiling);
        assert_eq!(state.params.confidence_gate, CONFIDENCE_GATE.floor);
        assert_eq!(state.source_weight("rsi"), 1.5);
    }
}
