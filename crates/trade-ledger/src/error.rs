use signal_core::{IntentError, IntentStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but cannot be read as a ledger. Never auto-repaired.
    #[error("Ledger {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Invalid intent {id}: {source}")]
    InvalidIntent {
        id: String,
        #[source]
        source: IntentError,
    },

    #[error("Duplicate intent id: {0}")]
    Duplicate(String),

    #[error("Unknown intent id: {0}")]
    UnknownIntent(String),

    #[error("Intent {id} is already {status}; refusing to move it to {attempted}")]
    TerminalRegression {
        id: String,
        status: IntentStatus,
        attempted: IntentStatus,
    },

    #[error("Lock {path} is held by another invocation ({holder})")]
    Locked { path: String, holder: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl LedgerError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
