use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use signal_core::{NewIntent, ParamSnapshot};
use trade_ledger::{Ledger, LedgerError};

/// File where the signal generator drops new intents between invocations.
pub struct Inbox {
    path: PathBuf,
}

/// What intake did with one inbox batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeReport {
    /// Appended to the ledger.
    pub accepted: usize,
    /// Confidence under the gate in effect.
    pub filtered: usize,
    /// Already in the ledger from an earlier, uncommitted intake.
    pub replayed: usize,
    /// Invalid levels or unreadable records.
    pub rejected: usize,
    /// The inbox itself could not be read or stamped.
    pub inbox_error: Option<String>,
}

impl IntakeReport {
    /// Signals that count against the no-signal streak.
    pub fn eligible(&self) -> usize {
        self.accepted + self.replayed
    }
}

/// Give every record without a creation time the time it was first taken
/// in. Returns how many were stamped.
pub fn stamp(records: &mut [Value], now: DateTime<Utc>) -> usize {
    let mut stamped = 0;
    for record in records.iter_mut() {
        let Some(fields) = record.as_object_mut() else {
            continue;
        };
        if fields.get("created_at").is_some_and(|v| !v.is_null()) {
            continue;
        }
        fields.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
        stamped += 1;
    }
    stamped
}

impl Inbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read pending records without consuming them. A missing or blank file
    /// is an empty batch.
    pub fn read(&self) -> Result<Vec<Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Signal inbox {} is not a JSON array", self.path.display()))
    }

    /// Read and stamp pending records. A batch that needed stamping is
    /// written back first, so intents derive the same ids if the batch is
    /// taken in again after a commit that did not finish.
    pub fn read_stamped(&self, now: DateTime<Utc>) -> Result<Vec<Value>> {
        let mut records = self.read()?;
        if stamp(&mut records, now) > 0 {
            let mut bytes = serde_json::to_vec_pretty(&records)?;
            bytes.push(b'\n');
            trade_ledger::write_atomic(&self.path, &bytes)
                .with_context(|| format!("Failed to stamp {}", self.path.display()))?;
        }
        Ok(records)
    }

    /// Empty the inbox once its records are committed to the ledger.
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        trade_ledger::write_atomic(&self.path, b"[]\n")
            .with_context(|| format!("Failed to clear {}", self.path.display()))
    }
}

/// Append inbox records to the ledger as `open` intents stamped with
/// `params`. Records under the confidence gate are dropped.
pub fn intake(
    ledger: &mut Ledger,
    records: Vec<Value>,
    params: ParamSnapshot,
    now: DateTime<Utc>,
) -> IntakeReport {
    let mut report = IntakeReport::default();

    for raw in records {
        let new_intent: NewIntent = match serde_json::from_value(raw) {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!("Dropping unreadable inbox record: {}", e);
                report.rejected += 1;
                continue;
            }
        };

        if let Some(confidence) = new_intent.confidence {
            if confidence < params.confidence_gate {
                tracing::debug!(
                    symbol = %new_intent.symbol,
                    confidence,
                    gate = params.confidence_gate,
                    "Intent below confidence gate"
                );
                report.filtered += 1;
                continue;
            }
        }

        let intent = new_intent.into_intent(now, params);
        let id = intent.id.clone();
        match ledger.append(intent) {
            Ok(()) => {
                tracing::info!(%id, "New intent recorded");
                report.accepted += 1;
            }
            Err(LedgerError::Duplicate(_)) => {
                tracing::info!(%id, "Intent already recorded");
                report.replayed += 1;
            }
            Err(e @ LedgerError::InvalidIntent { .. }) => {
                tracing::warn!(%id, "Rejected inbox intent: {}", e);
                report.rejected += 1;
            }
            Err(e) => {
                tracing::warn!(%id, "Failed to record intent: {}", e);
                report.rejected += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intake_filters_and_rejects() {
        let mut ledger = Ledger::new("trade_log.json");
        let now = Utc::now();
        let mut params = ParamSnapshot::default();
        params.confidence_gate = 0.4;

        let records = vec![
            json!({"symbol": "BTC-USD", "direction": "LONG", "entry_price": 100.0,
                   "stop_loss": 95.0, "take_profit": 110.0, "confidence": 0.7,
                   "sources": ["engulfing"]}),
            json!({"symbol": "ETH-USD", "direction": "SHORT", "entry_price": 100.0,
                   "stop_loss": 105.0, "take_profit": 90.0, "confidence": 0.2}),
            json!({"symbol": "SOL-USD", "direction": "LONG", "entry_price": 100.0,
                   "stop_loss": 105.0, "take_profit": 110.0}),
            json!({"symbol": "XRP-USD"}),
        ];

        let report = intake(&mut ledger, records, params, now);
        assert_eq!(
            report,
            IntakeReport {
                accepted: 1,
                filtered: 1,
                replayed: 0,
                rejected: 2,
                inbox_error: None,
            }
        );
        let intent = ledger.intents().next().unwrap();
        assert_eq!(intent.params.confidence_gate, 0.4);
        assert_eq!(intent.sources, vec!["engulfing".to_string()]);
    }

    #[test]
    fn test_read_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path().join("signal_inbox.json"));
        assert!(inbox.read().unwrap().is_empty());

        fs::write(inbox.path(), r#"[{"symbol": "BTC-USD"}]"#).unwrap();
        assert_eq!(inbox.read().unwrap().len(), 1);

        inbox.clear().unwrap();
        assert!(inbox.read().unwrap().is_empty());
    }

    #[test]
    fn test_stamped_batch_is_recorded_once_when_taken_in_again() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path().join("signal_inbox.json"));
        fs::write(
            inbox.path(),
            r#"[{"symbol": "ETH-USD", "direction": "SHORT", "entry_price": 100.0,
                 "stop_loss": 104.0, "take_profit": 92.0}]"#,
        )
        .unwrap();
        let mut ledger = Ledger::new(dir.path().join("trade_log.json"));
        let first_run = Utc::now();

        let records = inbox.read_stamped(first_run).unwrap();
        let report = intake(&mut ledger, records, ParamSnapshot::default(), first_run);
        assert_eq!(report.accepted, 1);

        // The inbox was not cleared; a later run sees the same batch.
        let later = first_run + chrono::Duration::minutes(5);
        let records = inbox.read_stamped(later).unwrap();
        let report = intake(&mut ledger, records, ParamSnapshot::default(), later);

        assert_eq!(report.accepted, 0);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.eligible(), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_stamp_keeps_existing_creation_times() {
        let now = Utc::now();
        let mut records = vec![
            serde_json::json!({"symbol": "BTC-USD", "created_at": "2026-03-01T08:00:00Z"}),
            serde_json::json!({"symbol": "SOL-USD", "created_at": null}),
            serde_json::json!("not an object"),
        ];
        assert_eq!(stamp(&mut records, now), 1);
        assert_eq!(records[0]["created_at"], "2026-03-01T08:00:00Z");
        assert_eq!(records[1]["created_at"], now.to_rfc3339());
    }
}
