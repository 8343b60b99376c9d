use std::fs;
use std::path::{Path, PathBuf};

use crate::{LearningState, StateError};

/// JSON file holding the [`LearningState`] between invocations.
pub struct LearningStore {
    path: PathBuf,
    window: usize,
}

impl LearningStore {
    pub fn new(path: impl Into<PathBuf>, window: usize) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and sanitize the state. A missing file starts from baseline; a
    /// file that exists but does not parse is an error.
    pub fn load(&self) -> Result<LearningState, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "No learning state at {}, starting from baseline",
                    self.path.display()
                );
                return Ok(LearningState::new(self.window));
            }
            Err(e) => {
                return Err(StateError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        let mut state: LearningState =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        state.sanitize(self.window);

        tracing::debug!(
            cycles = state.cycles,
            resolved = state.stats.recent.len(),
            "Loaded learning state from {}",
            self.path.display()
        );
        Ok(state)
    }

    /// Atomically replace the state file.
    pub fn save(&self, state: &LearningState) -> Result<(), StateError> {
        let mut bytes = serde_json::to_vec_pretty(state)?;
        bytes.push(b'\n');
        trade_ledger::write_atomic(&self.path, &bytes).map_err(|e| StateError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}
