//! Durable, append-only record of trade intents and their outcomes.

pub mod atomic;
pub mod error;
pub mod ledger;
pub mod lock;

pub use atomic::{write_atomic, write_json_atomic};
pub use error::LedgerError;
pub use ledger::{Ledger, LedgerEntry, MalformedRecord};
pub use lock::LockGuard;
