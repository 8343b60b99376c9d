use thiserror::Error;

use crate::types::Direction;

/// Failures from the market-data side of the price window contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Symbol has no data at all (delisted, illiquid, unknown).
    #[error("No market data for {symbol}: {reason}")]
    NoData { symbol: String, reason: String },

    /// Network, HTTP or decode failure worth retrying next invocation.
    #[error("Transient market data failure: {0}")]
    Transient(String),
}

/// A trade intent whose levels do not form a valid trade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("Intent has an empty symbol")]
    EmptySymbol,

    #[error("Invalid {field}: {value}")]
    NonPositivePrice { field: String, value: f64 },

    #[error("Levels inconsistent for {direction}: entry={entry} stop={stop} target={target}")]
    InconsistentLevels {
        direction: Direction,
        entry: f64,
        stop: f64,
        target: f64,
    },
}
