//! Outcome resolution for ledger intents: the lifecycle state machine and
//! the failure taxonomy it feeds.

pub mod classifier;
pub mod resolver;

pub use classifier::{classify, FailureClassifier};
pub use resolver::{
    EntryResolution, OutcomeResolver, ResolutionReport, ResolvedIntent, ResolverConfig, Transition,
};
