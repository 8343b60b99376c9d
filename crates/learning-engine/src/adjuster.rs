//! Parameter Adjuster
//!
//! Pure functions from aggregated statistics and the previous parameters to
//! new, clamped parameters. Thresholds and steps live in [`AdjusterConfig`]
//! as a table of rules so they can be tuned and tested as data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use signal_core::{
    OutcomeCategory, ParamBounds, ParamSnapshot, CONFIDENCE_GATE, ENTRY_OFFSET, SOURCE_WEIGHT,
    STOP_DISTANCE, TARGET_DISTANCE,
};

use crate::aggregator::PerformanceSnapshot;
use crate::state::DroughtState;

/// One scalar control parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Knob {
    EntryOffset,
    StopDistance,
    TargetDistance,
    ConfidenceGate,
}

impl Knob {
    pub fn name(&self) -> &'static str {
        match self {
            Knob::EntryOffset => "entry_offset",
            Knob::StopDistance => "stop_distance",
            Knob::TargetDistance => "target_distance",
            Knob::ConfidenceGate => "confidence_gate",
        }
    }

    pub fn bounds(&self) -> ParamBounds {
        match self {
            Knob::EntryOffset => ENTRY_OFFSET,
            Knob::StopDistance => STOP_DISTANCE,
            Knob::TargetDistance => TARGET_DISTANCE,
            Knob::ConfidenceGate => CONFIDENCE_GATE,
        }
    }

    pub fn get(&self, params: &ParamSnapshot) -> f64 {
        match self {
            Knob::EntryOffset => params.entry_offset,
            Knob::StopDistance => params.stop_distance,
            Knob::TargetDistance => params.target_distance,
            Knob::ConfidenceGate => params.confidence_gate,
        }
    }

    /// Store `value` clamped into this knob's bounds.
    fn set(&self, params: &mut ParamSnapshot, value: f64) {
        let value = self.bounds().clamp(value);
        match self {
            Knob::EntryOffset => params.entry_offset = value,
            Knob::StopDistance => params.stop_distance = value,
            Knob::TargetDistance => params.target_distance = value,
            Knob::ConfidenceGate => params.confidence_gate = value,
        }
    }
}

/// Rate thresholds splitting a category into severe, moderate, neutral and
/// excellent bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityTiers {
    pub severe_above: f64,
    pub moderate_above: f64,
    pub excellent_below: f64,
}

impl Default for SeverityTiers {
    fn default() -> Self {
        Self {
            severe_above: 0.30,
            moderate_above: 0.15,
            excellent_below: 0.08,
        }
    }
}

/// A win rate band. `limit` is the furthest the band may move its knob; a
/// knob already past it is left where it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WinRateTier {
    Below { threshold: f64, step: f64, limit: f64 },
    Above { threshold: f64, step: f64, limit: f64 },
}

impl WinRateTier {
    fn step_for(&self, win_rate: f64) -> Option<(f64, f64)> {
        match *self {
            WinRateTier::Below {
                threshold,
                step,
                limit,
            } if win_rate < threshold => Some((step, limit)),
            WinRateTier::Above {
                threshold,
                step,
                limit,
            } if win_rate > threshold => Some((step, limit)),
            _ => None,
        }
    }
}

/// `current + step`, stopping at `limit`. Never moves a value that already
/// sits beyond `limit` in the direction of `step`.
fn step_toward_limit(current: f64, step: f64, limit: f64) -> Option<f64> {
    if step >= 0.0 {
        (current < limit).then(|| (current + step).min(limit))
    } else {
        (current > limit).then(|| (current + step).max(limit))
    }
}

/// One entry of the adjustment table.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// A category's rolling rate pushes one knob away from baseline in
    /// tiered steps; an excellent rate relaxes it back toward baseline.
    CategoryRate {
        category: OutcomeCategory,
        knob: Knob,
        tiers: SeverityTiers,
        /// Signed steps applied in the severe and moderate bands.
        severe_step: f64,
        moderate_step: f64,
        recovery_step: f64,
        /// Recovery waits until direction accuracy reaches this share.
        recovery_min_direction_accuracy: Option<f64>,
    },
    /// The rolling target precision ratio drives a knob.
    TargetPrecision {
        knob: Knob,
        min_samples: usize,
        /// Below this ratio the knob is set from the overshoot average.
        collapse_below: f64,
        /// Below this ratio the knob steps down, but not under `shortfall_floor`.
        shortfall_below: f64,
        shortfall_floor: f64,
        /// Above this ratio the knob steps up.
        overshoot_above: f64,
        overshoot_scale: f64,
        step: f64,
        recovery_step: f64,
    },
    /// The first matching win rate tier moves a knob by its step.
    WinRate { knob: Knob, tiers: Vec<WinRateTier> },
}

/// Per-source multiplier targets by rolling accuracy.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWeightRule {
    pub min_samples: usize,
    pub step: f64,
    /// `(minimum accuracy, target weight)`, checked in order.
    pub tiers: Vec<(f64, f64)>,
    pub fallback: f64,
}

impl SourceWeightRule {
    fn target_for(&self, accuracy: f64) -> f64 {
        self.tiers
            .iter()
            .find(|(min, _)| accuracy >= *min)
            .map(|(_, target)| *target)
            .unwrap_or(self.fallback)
    }
}

impl Default for SourceWeightRule {
    fn default() -> Self {
        Self {
            min_samples: 5,
            step: 0.1,
            tiers: vec![(0.65, 1.5), (0.55, 1.2), (0.45, 1.0), (0.35, 0.7)],
            fallback: 0.3,
        }
    }
}

/// Loosening applied after consecutive invocations without signals.
#[derive(Debug, Clone, PartialEq)]
pub struct DroughtRule {
    pub loosen_after: u32,
    /// Signed step per knob in the loosening direction.
    pub steps: Vec<(Knob, f64)>,
}

impl Default for DroughtRule {
    fn default() -> Self {
        Self {
            loosen_after: 2,
            steps: vec![
                (Knob::ConfidenceGate, -0.05),
                (Knob::StopDistance, 0.05),
                (Knob::TargetDistance, -0.05),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjusterConfig {
    /// Category rules stay idle until the window holds this many resolutions.
    pub min_trades: usize,
    pub rules: Vec<Rule>,
    pub source_weights: SourceWeightRule,
    pub drought: DroughtRule,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        let tiers = SeverityTiers::default();
        Self {
            min_trades: 10,
            rules: vec![
                Rule::CategoryRate {
                    category: OutcomeCategory::EntryNotReached,
                    knob: Knob::EntryOffset,
                    tiers,
                    severe_step: -0.10,
                    moderate_step: -0.05,
                    recovery_step: 0.02,
                    recovery_min_direction_accuracy: None,
                },
                Rule::CategoryRate {
                    category: OutcomeCategory::SlHitEarly,
                    knob: Knob::StopDistance,
                    tiers,
                    severe_step: 0.10,
                    moderate_step: 0.05,
                    recovery_step: 0.02,
                    recovery_min_direction_accuracy: Some(0.5),
                },
                Rule::TargetPrecision {
                    knob: Knob::TargetDistance,
                    min_samples: 3,
                    collapse_below: 0.7,
                    shortfall_below: 0.85,
                    shortfall_floor: 0.75,
                    overshoot_above: 1.2,
                    overshoot_scale: 0.8,
                    step: 0.05,
                    recovery_step: 0.02,
                },
                Rule::WinRate {
                    knob: Knob::ConfidenceGate,
                    tiers: vec![
                        WinRateTier::Below {
                            threshold: 0.35,
                            step: 0.08,
                            limit: 0.6,
                        },
                        WinRateTier::Below {
                            threshold: 0.45,
                            step: 0.05,
                            limit: 0.5,
                        },
                        WinRateTier::Above {
                            threshold: 0.65,
                            step: -0.03,
                            limit: 0.2,
                        },
                        WinRateTier::Above {
                            threshold: 0.55,
                            step: -0.02,
                            limit: 0.25,
                        },
                    ],
                },
            ],
            source_weights: SourceWeightRule::default(),
            drought: DroughtRule::default(),
        }
    }
}

/// A parameter that moved, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    pub parameter: String,
    pub from: f64,
    pub to: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub params: ParamSnapshot,
    pub source_weights: BTreeMap<String, f64>,
    pub changes: Vec<ParamChange>,
}

/// Offsets smaller than this count as fully given back.
const SETTLED: f64 = 1e-9;

fn apply(
    knob: Knob,
    params: &mut ParamSnapshot,
    next: f64,
    reason: String,
    changes: &mut Vec<ParamChange>,
) {
    let from = knob.get(params);
    knob.set(params, next);
    let to = knob.get(params);
    if to != from {
        changes.push(ParamChange {
            parameter: knob.name().to_string(),
            from,
            to,
            reason,
        });
    }
}

fn evaluate(
    rule: &Rule,
    stats: &PerformanceSnapshot,
    params: &mut ParamSnapshot,
    changes: &mut Vec<ParamChange>,
) {
    match rule {
        Rule::CategoryRate {
            category,
            knob,
            tiers,
            severe_step,
            moderate_step,
            recovery_step,
            recovery_min_direction_accuracy,
        } => {
            let Some(rate) = stats.rate(*category) else {
                return;
            };
            let current = knob.get(params);
            let bounds = knob.bounds();
            let (next, band) = if rate > tiers.severe_above {
                (current + severe_step, "severe")
            } else if rate > tiers.moderate_above {
                (current + moderate_step, "moderate")
            } else if rate < tiers.excellent_below && !bounds.at_baseline(current) {
                let allowed = match recovery_min_direction_accuracy {
                    Some(min) => stats.direction_accuracy.is_some_and(|a| a >= *min),
                    None => true,
                };
                if !allowed {
                    return;
                }
                (bounds.toward_baseline(current, *recovery_step), "recovery")
            } else {
                return;
            };
            apply(
                *knob,
                params,
                next,
                format!("{} rate {:.0}% ({})", category, rate * 100.0, band),
                changes,
            );
        }
        Rule::TargetPrecision {
            knob,
            min_samples,
            collapse_below,
            shortfall_below,
            shortfall_floor,
            overshoot_above,
            overshoot_scale,
            step,
            recovery_step,
        } => {
            let Some(ratio) = stats.precision_ratio else {
                return;
            };
            if stats.precision_samples < *min_samples {
                return;
            }
            let current = knob.get(params);
            let bounds = knob.bounds();
            let next = if ratio < *collapse_below {
                let overshoot = stats.overshoot_ema.unwrap_or(1.0 - ratio);
                current.min(1.0 - overshoot * overshoot_scale)
            } else if ratio < *shortfall_below {
                match step_toward_limit(current, -step, *shortfall_floor) {
                    Some(next) => next,
                    None => return,
                }
            } else if ratio > *overshoot_above {
                current + step
            } else if !bounds.at_baseline(current) {
                bounds.toward_baseline(current, *recovery_step)
            } else {
                return;
            };
            apply(
                *knob,
                params,
                next,
                format!("target precision {:.2}", ratio),
                changes,
            );
        }
        Rule::WinRate { knob, tiers } => {
            let Some(win_rate) = stats.win_rate else {
                return;
            };
            let Some((step, limit)) = tiers.iter().find_map(|t| t.step_for(win_rate)) else {
                return;
            };
            let Some(next) = step_toward_limit(knob.get(params), step, limit) else {
                return;
            };
            apply(
                *knob,
                params,
                next,
                format!("win rate {:.0}%", win_rate * 100.0),
                changes,
            );
        }
    }
}

/// Move every source weight at most one step toward the target its rolling
/// accuracy earns.
fn adjust_source_weights(
    stats: &PerformanceSnapshot,
    previous: &BTreeMap<String, f64>,
    rule: &SourceWeightRule,
    changes: &mut Vec<ParamChange>,
) -> BTreeMap<String, f64> {
    let mut weights: BTreeMap<String, f64> = previous
        .iter()
        .map(|(k, v)| (k.clone(), SOURCE_WEIGHT.clamp(*v)))
        .collect();

    for (source, accuracy) in &stats.sources {
        if accuracy.samples < rule.min_samples {
            continue;
        }
        let current = weights
            .get(source)
            .copied()
            .unwrap_or(SOURCE_WEIGHT.baseline);
        let target = SOURCE_WEIGHT.clamp(rule.target_for(accuracy.accuracy));
        let next = if (target - current).abs() <= rule.step {
            target
        } else if target > current {
            current + rule.step
        } else {
            current - rule.step
        };
        let next = SOURCE_WEIGHT.clamp(next);
        if next != current {
            changes.push(ParamChange {
                parameter: format!("weight:{}", source),
                from: current,
                to: next,
                reason: format!(
                    "accuracy {:.0}% over {}",
                    accuracy.accuracy * 100.0,
                    accuracy.samples
                ),
            });
        }
        weights.insert(source.clone(), next);
    }
    weights
}

/// Apply the rule table once. Category rules are skipped until enough
/// resolutions are in the window; the result is always within bounds.
pub fn adjust(
    stats: &PerformanceSnapshot,
    previous: &ParamSnapshot,
    previous_weights: &BTreeMap<String, f64>,
    config: &AdjusterConfig,
) -> Adjustment {
    let mut params = previous.clamped();
    let mut changes = Vec::new();

    if stats.resolved >= config.min_trades {
        for rule in &config.rules {
            evaluate(rule, stats, &mut params, &mut changes);
        }
    }

    let source_weights =
        adjust_source_weights(stats, previous_weights, &config.source_weights, &mut changes);

    Adjustment {
        params,
        source_weights,
        changes,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroughtAction {
    None,
    Loosened,
    Reverted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroughtOutcome {
    pub params: ParamSnapshot,
    pub drought: DroughtState,
    pub action: DroughtAction,
    pub changes: Vec<ParamChange>,
}

/// Advance the no-signal loop by one invocation.
///
/// Once the streak reaches `loosen_after`, every further empty invocation
/// loosens the drought knobs by one step and records the applied delta per
/// knob. When signals resume, each invocation gives back at most one step of
/// that recorded delta, so moves made by the main loop in between are kept.
pub fn apply_drought(
    params: &ParamSnapshot,
    drought: &DroughtState,
    eligible_signals: usize,
    rule: &DroughtRule,
) -> DroughtOutcome {
    let mut params = params.clamped();
    let mut drought = drought.clone();
    let mut changes = Vec::new();
    let mut action = DroughtAction::None;

    if eligible_signals > 0 {
        drought.consecutive_no_signal = 0;
        if drought.is_loosened() {
            for (knob, step) in &rule.steps {
                let Some(offset) = drought.offsets.get(knob).copied() else {
                    continue;
                };
                let undo = -offset.signum() * offset.abs().min(step.abs());
                let from = knob.get(&params);
                apply(
                    *knob,
                    &mut params,
                    from + undo,
                    "signals resumed".to_string(),
                    &mut changes,
                );
                let moved = knob.get(&params) - from;
                let remaining = offset + moved;
                // A knob pinned at a bound cannot give anything back.
                if moved == 0.0 || remaining.abs() < SETTLED {
                    drought.offsets.remove(knob);
                } else {
                    drought.offsets.insert(*knob, remaining);
                }
            }
            drought
                .offsets
                .retain(|knob, _| rule.steps.iter().any(|(k, _)| k == knob));
            drought.loosen_steps = if drought.offsets.is_empty() {
                0
            } else {
                drought.loosen_steps.saturating_sub(1).max(1)
            };
            action = DroughtAction::Reverted;
        }
    } else {
        drought.consecutive_no_signal = drought.consecutive_no_signal.saturating_add(1);
        if drought.consecutive_no_signal >= rule.loosen_after {
            for (knob, step) in &rule.steps {
                let from = knob.get(&params);
                apply(
                    *knob,
                    &mut params,
                    from + step,
                    format!("{} invocations without signals", drought.consecutive_no_signal),
                    &mut changes,
                );
                let moved = knob.get(&params) - from;
                if moved != 0.0 {
                    *drought.offsets.entry(*knob).or_insert(0.0) += moved;
                }
            }
            if !changes.is_empty() {
                drought.loosen_steps += 1;
                action = DroughtAction::Loosened;
            }
        }
    }

    DroughtOutcome {
        params,
        drought,
        action,
        changes,
    }
}
