//! Learning Engine
//!
//! Turns resolved trade outcomes into bounded adjustments of the control
//! parameters that shape future signals.
//!
//! # Modules
//!
//! - `aggregator`: rolling outcome statistics and the derived performance view
//! - `adjuster`: threshold/step rule table and the no-signal loosening loop
//! - `state`: the versioned, serializable learning state
//! - `store`: file persistence of the learning state

pub mod adjuster;
pub mod aggregator;
pub mod error;
pub mod state;
pub mod store;

pub use adjuster::{
    adjust, apply_drought, AdjusterConfig, Adjustment, DroughtAction, DroughtOutcome, DroughtRule,
    Knob, ParamChange, Rule, SeverityTiers, SourceWeightRule, WinRateTier,
};
pub use aggregator::{precision_sample, PerformanceSnapshot, RollingStats, SourceAccuracy};
pub use error::StateError;
pub use state::{DroughtState, LearningState, STATE_VERSION};
pub use store::LearningStore;
