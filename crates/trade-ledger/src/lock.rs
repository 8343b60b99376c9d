use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use crate::LedgerError;

/// Exclusive marker file held for the duration of one reconcile cycle.
/// Released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Create the lock file, failing with [`LedgerError::Locked`] if another
    /// invocation already holds it. A lock file untouched for longer than
    /// `stale_after` belongs to an invocation that died and is taken over.
    pub fn acquire(path: impl Into<PathBuf>, stale_after: Duration) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::io(&path, e))?;
            }
        }

        let mut file = match create_new(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                if !is_stale(&path, stale_after) {
                    return Err(LedgerError::Locked {
                        path: path.display().to_string(),
                        holder,
                    });
                }
                tracing::warn!(%holder, "Taking over stale lock {}", path.display());
                fs::remove_file(&path).map_err(|e| LedgerError::io(&path, e))?;
                create_new(&path).map_err(|e| LedgerError::io(&path, e))?
            }
            Err(e) => return Err(LedgerError::io(&path, e)),
        };

        let stamp = format!("pid={} since={}", std::process::id(), Utc::now().to_rfc3339());
        if let Err(e) = writeln!(file, "{}", stamp) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(LedgerError::io(&path, e));
        }

        tracing::debug!("Acquired lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Age by modification time, so a file left empty by a crash still ages out.
fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
