//! Control parameters shaping signal generation, with their documented
//! baselines and hard bounds.

use serde::{Deserialize, Serialize};

/// Distance under which a value is treated as having reached baseline.
const SNAP_EPSILON: f64 = 1e-9;

/// Baseline and hard `[floor, ceiling]` of one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub baseline: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl ParamBounds {
    pub const fn new(baseline: f64, floor: f64, ceiling: f64) -> Self {
        Self {
            baseline,
            floor,
            ceiling,
        }
    }

    /// Clamp into bounds. Non-finite values fall back to baseline.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.baseline;
        }
        value.clamp(self.floor, self.ceiling)
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.floor && value <= self.ceiling
    }

    pub fn at_baseline(&self, value: f64) -> bool {
        value == self.baseline
    }

    /// Move `value` by `step` toward baseline, landing exactly on it rather
    /// than crossing it.
    pub fn toward_baseline(&self, value: f64, step: f64) -> f64 {
        let step = step.abs();
        let moved = if (value - self.baseline).abs() <= step + SNAP_EPSILON {
            self.baseline
        } else if value > self.baseline {
            value - step
        } else {
            value + step
        };
        self.clamp(moved)
    }
}

/// Entry offset factor; lower places the entry closer to market.
pub const ENTRY_OFFSET: ParamBounds = ParamBounds::new(1.0, 0.7, 1.2);
/// Stop distance factor; higher is a wider stop.
pub const STOP_DISTANCE: ParamBounds = ParamBounds::new(1.0, 0.7, 1.6);
/// Target distance factor; lower is a nearer target.
pub const TARGET_DISTANCE: ParamBounds = ParamBounds::new(1.0, 0.6, 1.2);
/// Minimum combined confidence a signal needs to be emitted.
pub const CONFIDENCE_GATE: ParamBounds = ParamBounds::new(0.3, 0.2, 0.6);
/// Per-source weight multiplier.
pub const SOURCE_WEIGHT: ParamBounds = ParamBounds::new(1.0, 0.3, 1.5);

fn baseline_entry_offset() -> f64 {
    ENTRY_OFFSET.baseline
}

fn baseline_stop_distance() -> f64 {
    STOP_DISTANCE.baseline
}

fn baseline_target_distance() -> f64 {
    TARGET_DISTANCE.baseline
}

fn baseline_confidence_gate() -> f64 {
    CONFIDENCE_GATE.baseline
}

/// The scalar control parameters. Missing fields read as baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamSnapshot {
    #[serde(default = "baseline_entry_offset")]
    pub entry_offset: f64,
    #[serde(default = "baseline_stop_distance")]
    pub stop_distance: f64,
    #[serde(default = "baseline_target_distance")]
    pub target_distance: f64,
    #[serde(default = "baseline_confidence_gate")]
    pub confidence_gate: f64,
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self {
            entry_offset: ENTRY_OFFSET.baseline,
            stop_distance: STOP_DISTANCE.baseline,
            target_distance: TARGET_DISTANCE.baseline,
            confidence_gate: CONFIDENCE_GATE.baseline,
        }
    }
}

impl ParamSnapshot {
    /// Clamp every field into its bounds.
    pub fn clamped(self) -> Self {
        Self {
            entry_offset: ENTRY_OFFSET.clamp(self.entry_offset),
            stop_distance: STOP_DISTANCE.clamp(self.stop_distance),
            target_distance: TARGET_DISTANCE.clamp(self.target_distance),
            confidence_gate: CONFIDENCE_GATE.clamp(self.confidence_gate),
        }
    }

    pub fn within_bounds(&self) -> bool {
        ENTRY_OFFSET.contains(self.entry_offset)
            && STOP_DISTANCE.contains(self.stop_distance)
            && TARGET_DISTANCE.contains(self.target_distance)
            && CONFIDENCE_GATE.contains(self.confidence_gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toward_baseline_never_crosses() {
        assert!((STOP_DISTANCE.toward_baseline(1.3, 0.1) - 1.2).abs() < 1e-12);
        assert_eq!(STOP_DISTANCE.toward_baseline(1.05, 0.1), 1.0);
        assert_eq!(STOP_DISTANCE.toward_baseline(0.95, 0.1), 1.0);
        assert_eq!(STOP_DISTANCE.toward_baseline(1.0, 0.1), 1.0);
    }

    #[test]
    fn test_clamp_handles_non_finite() {
        assert_eq!(CONFIDENCE_GATE.clamp(f64::NAN), 0.3);
        assert_eq!(CONFIDENCE_GATE.clamp(0.9), 0.6);
        assert_eq!(CONFIDENCE_GATE.clamp(0.0), 0.2);
    }

    #[test]
    fn test_missing_fields_default_to_baseline() {
        let snap: ParamSnapshot = serde_json::from_str(r#"{"entry_offset": 0.9}"#).unwrap();
        assert_eq!(snap.entry_offset, 0.9);
        assert_eq!(snap.stop_distance, 1.0);
        assert_eq!(snap.confidence_gate, 0.3);
    }
}
