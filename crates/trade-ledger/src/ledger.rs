use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use signal_core::{IntentStatus, TradeIntent};

use crate::atomic::write_json_atomic;
use crate::LedgerError;

/// A ledger record that could not be read as a valid intent. Kept verbatim
/// so the audit trail survives, but never resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    /// Position in the ledger file.
    pub index: usize,
    pub raw: Value,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    Intent(TradeIntent),
    Malformed(MalformedRecord),
}

impl Serialize for LedgerEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LedgerEntry::Intent(intent) => intent.serialize(serializer),
            LedgerEntry::Malformed(record) => record.raw.serialize(serializer),
        }
    }
}

/// File-backed, ordered collection of trade intents.
///
/// The whole file is loaded on open and rewritten atomically on persist.
/// Records are never deleted.
pub struct Ledger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// An empty ledger that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Load all records. A missing file is an empty ledger; an unreadable or
    /// structurally broken file is an error. Individual bad records are
    /// isolated as [`LedgerEntry::Malformed`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No ledger at {}, starting empty", path.display());
                return Ok(Self::new(path));
            }
            Err(e) => return Err(LedgerError::io(&path, e)),
        };

        let records: Vec<Value> = serde_json::from_str(&content).map_err(|e| LedgerError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut seen = HashSet::new();
        let entries = records
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_record(index, raw, &mut seen))
            .collect::<Vec<_>>();

        let malformed = entries
            .iter()
            .filter(|e| matches!(e, LedgerEntry::Malformed(_)))
            .count();
        if malformed > 0 {
            tracing::warn!(
                malformed,
                "Ledger {} has records that cannot be resolved",
                path.display()
            );
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn intents(&self) -> impl Iterator<Item = &TradeIntent> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Intent(intent) => Some(intent),
            LedgerEntry::Malformed(_) => None,
        })
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Malformed(record) => Some(record),
            LedgerEntry::Intent(_) => None,
        })
    }

    pub fn get(&self, id: &str) -> Option<&TradeIntent> {
        self.intents().find(|i| i.id == id)
    }

    /// Ids of intents still awaiting an outcome, in ledger order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.intents()
            .filter(|i| !i.is_terminal())
            .map(|i| i.id.clone())
            .collect()
    }

    /// Append a new intent. Its levels must be valid and its id unused.
    pub fn append(&mut self, mut intent: TradeIntent) -> Result<(), LedgerError> {
        intent.ensure_id();
        intent
            .validate()
            .map_err(|source| LedgerError::InvalidIntent {
                id: intent.id.clone(),
                source,
            })?;
        if self.get(&intent.id).is_some() {
            return Err(LedgerError::Duplicate(intent.id));
        }
        self.entries.push(LedgerEntry::Intent(intent));
        Ok(())
    }

    /// Replace the intent with the same id. A terminal intent only accepts
    /// an identical status, so outcomes are written once.
    pub fn update(&mut self, intent: TradeIntent) -> Result<(), LedgerError> {
        let slot = self
            .entries
            .iter_mut()
            .find_map(|e| match e {
                LedgerEntry::Intent(existing) if existing.id == intent.id => Some(existing),
                _ => None,
            })
            .ok_or_else(|| LedgerError::UnknownIntent(intent.id.clone()))?;

        if slot.status.is_terminal() {
            if slot.status != intent.status {
                return Err(LedgerError::TerminalRegression {
                    id: intent.id,
                    status: slot.status,
                    attempted: intent.status,
                });
            }
            return Ok(());
        }
        if slot.status == IntentStatus::Queued && intent.status == IntentStatus::Open {
            return Err(LedgerError::TerminalRegression {
                id: intent.id,
                status: slot.status,
                attempted: intent.status,
            });
        }

        *slot = intent;
        Ok(())
    }

    /// Terminal intents ordered by resolution time, oldest first.
    pub fn resolved_in_order(&self) -> Vec<&TradeIntent> {
        let mut resolved: Vec<&TradeIntent> = self.intents().filter(|i| i.is_terminal()).collect();
        resolved.sort_by_key(|i| (i.resolved_at.unwrap_or(i.created_at), i.created_at));
        resolved
    }

    /// Atomically rewrite the ledger file.
    pub fn persist(&self) -> Result<(), LedgerError> {
        write_json_atomic(&self.path, &self.entries)?;
        tracing::debug!(
            records = self.entries.len(),
            "Ledger written to {}",
            self.path.display()
        );
        Ok(())
    }
}

fn parse_record(index: usize, raw: Value, seen: &mut HashSet<String>) -> LedgerEntry {
    let malformed = |raw: Value, error: String| {
        tracing::warn!(index, %error, "Isolating malformed ledger record");
        LedgerEntry::Malformed(MalformedRecord { index, raw, error })
    };

    let mut intent: TradeIntent = match serde_json::from_value(raw.clone()) {
        Ok(intent) => intent,
        Err(e) => return malformed(raw, e.to_string()),
    };
    intent.ensure_id();

    if let Err(e) = intent.validate() {
        return malformed(raw, e.to_string());
    }
    if !seen.insert(intent.id.clone()) {
        return malformed(raw, format!("duplicate intent id {}", intent.id));
    }
    LedgerEntry::Intent(intent)
}
