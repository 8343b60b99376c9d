use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntentError;
use crate::params::ParamSnapshot;
use crate::timestamp;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[serde(alias = "long", alias = "Long")]
    Long,
    #[serde(alias = "short", alias = "Short")]
    Short,
}

impl Direction {
    pub fn to_label(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Long entries fill on a dip to the entry, shorts on a rally to it.
    pub fn entry_reached(&self, entry: f64, window: &PriceWindow) -> bool {
        match self {
            Direction::Long => window.min_low <= entry,
            Direction::Short => window.max_high >= entry,
        }
    }

    pub fn target_touched(&self, target: f64, window: &PriceWindow) -> bool {
        match self {
            Direction::Long => window.max_high >= target,
            Direction::Short => window.min_low <= target,
        }
    }

    pub fn stop_touched(&self, stop: f64, window: &PriceWindow) -> bool {
        match self {
            Direction::Long => window.min_low <= stop,
            Direction::Short => window.max_high >= stop,
        }
    }

    /// Signed move from `entry` to `price` as a fraction of entry,
    /// positive when the move is in this direction's favor.
    pub fn favorable_return(&self, entry: f64, price: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        match self {
            Direction::Long => (price - entry) / entry,
            Direction::Short => (entry - price) / entry,
        }
    }

    /// Best price the window offered in this direction's favor.
    pub fn best_price(&self, window: &PriceWindow) -> f64 {
        match self {
            Direction::Long => window.max_high,
            Direction::Short => window.min_low,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_label())
    }
}

/// Lifecycle status of a trade intent.
///
/// `Open -> Queued -> {Completed | Stopped | Checked | EntryNotReached}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    #[serde(alias = "OPEN", alias = "ACTIVE")]
    Open,
    Queued,
    Completed,
    Stopped,
    Checked,
    EntryNotReached,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Completed
                | IntentStatus::Stopped
                | IntentStatus::Checked
                | IntentStatus::EntryNotReached
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Open => "open",
            IntentStatus::Queued => "queued",
            IntentStatus::Completed => "completed",
            IntentStatus::Stopped => "stopped",
            IntentStatus::Checked => "checked",
            IntentStatus::EntryNotReached => "entry_not_reached",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutually exclusive outcome label of a resolved intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Success,
    EntryNotReached,
    SlHitEarly,
    TpNotReached,
    WrongDirection,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 5] = [
        OutcomeCategory::Success,
        OutcomeCategory::EntryNotReached,
        OutcomeCategory::SlHitEarly,
        OutcomeCategory::TpNotReached,
        OutcomeCategory::WrongDirection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::Success => "success",
            OutcomeCategory::EntryNotReached => "entry_not_reached",
            OutcomeCategory::SlHitEarly => "sl_hit_early",
            OutcomeCategory::TpNotReached => "tp_not_reached",
            OutcomeCategory::WrongDirection => "wrong_direction",
        }
    }

    /// Whether the entry was filled before the outcome was decided.
    pub fn entry_reached(&self) -> bool {
        !matches!(self, OutcomeCategory::EntryNotReached)
    }

    /// Whether the directional call was right. `None` when the entry never
    /// filled and the call was never tested.
    pub fn direction_correct(&self) -> Option<bool> {
        match self {
            OutcomeCategory::Success | OutcomeCategory::TpNotReached => Some(true),
            OutcomeCategory::SlHitEarly | OutcomeCategory::WrongDirection => Some(false),
            OutcomeCategory::EntryNotReached => None,
        }
    }
}

impl std::fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative price range observed since an intent was created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceWindow {
    pub max_high: f64,
    pub min_low: f64,
    pub last_close: f64,
}

impl PriceWindow {
    pub fn new(max_high: f64, min_low: f64, last_close: f64) -> Self {
        Self {
            max_high,
            min_low,
            last_close,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.max_high.is_finite()
            && self.min_low.is_finite()
            && self.last_close.is_finite()
            && self.min_low > 0.0
            && self.min_low <= self.max_high
    }
}

/// A proposed trade and its lifecycle record in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    #[serde(default)]
    pub id: String,
    pub symbol: String,
    #[serde(alias = "timestamp", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Control parameters in effect when the intent was proposed.
    #[serde(default)]
    pub params: ParamSnapshot,
    /// Signal sources (patterns, indicators) that contributed to the call.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub technical_score: Option<f64>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub rr_ratio: Option<f64>,
    #[serde(default, alias = "sentiment_reason")]
    pub rationale: Option<String>,

    #[serde(default)]
    pub status: IntentStatus,
    #[serde(default)]
    pub check_count: u32,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entry_reached: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<OutcomeCategory>,
    #[serde(default)]
    pub realized: Option<PriceWindow>,

    /// Fields written by other versions, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TradeIntent {
    /// Ledger identity: symbol plus creation time.
    pub fn make_id(symbol: &str, created_at: DateTime<Utc>) -> String {
        format!("{}_{}", symbol, created_at.timestamp_millis())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Distance from entry to target as a fraction of entry.
    pub fn target_distance(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.take_profit - self.entry_price).abs() / self.entry_price
    }

    /// Fill in the derived identity for records that were written without one.
    pub fn ensure_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Self::make_id(&self.symbol, self.created_at);
        }
    }

    /// Check that levels are positive and ordered for the direction:
    /// long `stop < entry < target`, short `stop > entry > target`.
    pub fn validate(&self) -> Result<(), IntentError> {
        if self.symbol.trim().is_empty() {
            return Err(IntentError::EmptySymbol);
        }
        for (field, value) in [
            ("entry_price", self.entry_price),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(IntentError::NonPositivePrice {
                    field: field.to_string(),
                    value,
                });
            }
        }

        let ordered = match self.direction {
            Direction::Long => {
                self.stop_loss < self.entry_price && self.entry_price < self.take_profit
            }
            Direction::Short => {
                self.stop_loss > self.entry_price && self.entry_price > self.take_profit
            }
        };
        if !ordered {
            return Err(IntentError::InconsistentLevels {
                direction: self.direction,
                entry: self.entry_price,
                stop: self.stop_loss,
                target: self.take_profit,
            });
        }
        Ok(())
    }
}

/// A new intent as handed over by the signal generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntent {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub technical_score: Option<f64>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub rr_ratio: Option<f64>,
    #[serde(default, alias = "sentiment_reason")]
    pub rationale: Option<String>,
}

impl NewIntent {
    /// Build an `open` ledger record, stamping the parameters in effect.
    pub fn into_intent(self, now: DateTime<Utc>, params: ParamSnapshot) -> TradeIntent {
        let created_at = self.created_at.unwrap_or(now);
        TradeIntent {
            id: TradeIntent::make_id(&self.symbol, created_at),
            symbol: self.symbol,
            created_at,
            direction: self.direction,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            params,
            sources: self.sources,
            confidence: self.confidence,
            sentiment_score: self.sentiment_score,
            technical_score: self.technical_score,
            leverage: self.leverage,
            rr_ratio: self.rr_ratio,
            rationale: self.rationale,
            status: IntentStatus::Open,
            check_count: 0,
            last_checked_at: None,
            entry_reached: false,
            resolved_at: None,
            category: None,
            realized: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn long_intent() -> TradeIntent {
        NewIntent {
            symbol: "BTC-USD".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 115.0,
            created_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()),
            sources: vec!["engulfing".to_string()],
            confidence: Some(0.6),
            sentiment_score: None,
            technical_score: None,
            leverage: None,
            rr_ratio: Some(3.0),
            rationale: None,
        }
        .into_intent(Utc::now(), ParamSnapshot::default())
    }

    #[test]
    fn test_direction_touch_rules() {
        let window = PriceWindow::new(116.0, 99.0, 112.0);
        assert!(Direction::Long.entry_reached(100.0, &window));
        assert!(Direction::Long.target_touched(115.0, &window));
        assert!(!Direction::Long.stop_touched(95.0, &window));

        assert!(Direction::Short.entry_reached(110.0, &window));
        assert!(Direction::Short.stop_touched(116.0, &window));
        assert!(!Direction::Short.target_touched(98.0, &window));
    }

    #[test]
    fn test_favorable_return_sign() {
        assert!(Direction::Long.favorable_return(100.0, 103.0) > 0.0);
        assert!(Direction::Short.favorable_return(100.0, 103.0) < 0.0);
        assert_eq!(Direction::Long.favorable_return(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_validate_levels() {
        let intent = long_intent();
        assert!(intent.validate().is_ok());

        let mut bad = intent.clone();
        bad.stop_loss = 101.0;
        assert!(matches!(
            bad.validate(),
            Err(IntentError::InconsistentLevels { .. })
        ));

        let mut short = intent.clone();
        short.direction = Direction::Short;
        assert!(short.validate().is_err());
        short.stop_loss = 105.0;
        short.take_profit = 90.0;
        assert!(short.validate().is_ok());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!IntentStatus::Open.is_terminal());
        assert!(!IntentStatus::Queued.is_terminal());
        assert!(IntentStatus::Completed.is_terminal());
        assert!(IntentStatus::EntryNotReached.is_terminal());
    }

    #[test]
    fn test_legacy_record_parses_with_defaults() {
        let raw = serde_json::json!({
            "timestamp": "2026-03-01T08:00:00.123456",
            "symbol": "ETH",
            "direction": "SHORT",
            "entry_price": 3000.0,
            "stop_loss": 3060.0,
            "take_profit": 2800.0,
            "leverage": 5,
            "sentiment_reason": "ETF outflows",
            "status": "open",
            "written_by": "v0"
        });
        let mut intent: TradeIntent = serde_json::from_value(raw).unwrap();
        intent.ensure_id();

        assert_eq!(intent.status, IntentStatus::Open);
        assert_eq!(intent.params, ParamSnapshot::default());
        assert_eq!(intent.rationale.as_deref(), Some("ETF outflows"));
        assert!(intent.id.starts_with("ETH_"));
        assert_eq!(
            intent.extra.get("written_by"),
            Some(&serde_json::json!("v0"))
        );
    }

    #[test]
    fn test_target_distance() {
        let intent = long_intent();
        assert!((intent.target_distance() - 0.15).abs() < 1e-12);
    }
}
