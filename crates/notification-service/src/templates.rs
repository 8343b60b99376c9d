use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;
use signal_core::{OutcomeCategory, ParamSnapshot};

/// One intent that reached a terminal state this invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLine {
    pub symbol: String,
    pub category: OutcomeCategory,
}

/// Everything the per-invocation summary shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub dry_run: bool,
    pub resolved: Vec<ResolvedLine>,
    pub pending: usize,
    pub deferred: usize,
    pub fetch_failures: usize,
    pub malformed_records: usize,
    pub new_intents: usize,
    pub filtered_intents: usize,
    /// Resolutions in the rolling window.
    pub window_resolved: usize,
    pub lifetime_resolved: u64,
    pub category_rates: BTreeMap<OutcomeCategory, f64>,
    pub win_rate: Option<f64>,
    pub direction_accuracy: Option<f64>,
    pub precision_ratio: Option<f64>,
    pub params: ParamSnapshot,
    pub source_weights: BTreeMap<String, f64>,
    pub no_signal_streak: u32,
    /// Set when the signal inbox could not be taken in this cycle.
    pub inbox_error: Option<String>,
    pub changes: Vec<String>,
}

fn pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.0}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

pub struct SummaryTemplate;

impl SummaryTemplate {
    pub fn title(summary: &CycleSummary) -> String {
        let prefix = if summary.dry_run { "[dry run] " } else { "" };
        format!(
            "{}Reconcile: {} resolved, {} pending",
            prefix,
            summary.resolved.len(),
            summary.pending
        )
    }

    /// Plain text with light Markdown, readable in both Telegram and Discord.
    pub fn render(summary: &CycleSummary) -> String {
        let mut out = String::new();

        if summary.resolved.is_empty() {
            out.push_str("No intents resolved this cycle\n");
        } else {
            for line in &summary.resolved {
                let _ = writeln!(out, "• {} → `{}`", line.symbol, line.category);
            }
        }

        let _ = writeln!(
            out,
            "\n*Intake:* {} new, {} below gate, no-signal streak {}",
            summary.new_intents, summary.filtered_intents, summary.no_signal_streak
        );
        if let Some(error) = &summary.inbox_error {
            let _ = writeln!(out, "*Inbox error:* {}", error);
        }
        if summary.fetch_failures > 0 || summary.malformed_records > 0 {
            let _ = writeln!(
                out,
                "*Attention:* {} fetch failures, {} malformed records",
                summary.fetch_failures, summary.malformed_records
            );
        }

        let _ = writeln!(
            out,
            "\n*Window:* {} resolved ({} lifetime), win {}, direction {}, precision {}",
            summary.window_resolved,
            summary.lifetime_resolved,
            pct(summary.win_rate),
            pct(summary.direction_accuracy),
            summary
                .precision_ratio
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "n/a".to_string())
        );
        let rates: Vec<String> = OutcomeCategory::ALL
            .iter()
            .map(|c| format!("{} {}", c, pct(summary.category_rates.get(c).copied())))
            .collect();
        let _ = writeln!(out, "{}", rates.join(" | "));

        let p = &summary.params;
        let _ = writeln!(
            out,
            "\n*Params:* entry {:.2}, stop {:.2}, target {:.2}, gate {:.2}",
            p.entry_offset, p.stop_distance, p.target_distance, p.confidence_gate
        );
        if !summary.source_weights.is_empty() {
            let weights: Vec<String> = summary
                .source_weights
                .iter()
                .map(|(name, w)| format!("{} {:.1}", name, w))
                .collect();
            let _ = writeln!(out, "*Weights:* {}", weights.join(", "));
        }

        if !summary.changes.is_empty() {
            out.push_str("\n*Adjusted:*\n");
            for change in &summary.changes {
                let _ = writeln!(out, "• {}", change);
            }
        }

        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> CycleSummary {
        CycleSummary {
            dry_run: false,
            resolved: vec![ResolvedLine {
                symbol: "BTC-USD".to_string(),
                category: OutcomeCategory::SlHitEarly,
            }],
            pending: 3,
            deferred: 1,
            fetch_failures: 0,
            malformed_records: 0,
            new_intents: 0,
            filtered_intents: 2,
            window_resolved: 12,
            lifetime_resolved: 40,
            category_rates: BTreeMap::from([
                (OutcomeCategory::Success, 0.5),
                (OutcomeCategory::SlHitEarly, 0.25),
            ]),
            win_rate: Some(0.5),
            direction_accuracy: Some(0.6),
            precision_ratio: None,
            params: ParamSnapshot::default(),
            source_weights: BTreeMap::new(),
            no_signal_streak: 2,
            inbox_error: None,
            changes: vec![
                "stop_distance 1.00 -> 1.05 (sl_hit_early rate 25% (moderate))".to_string(),
            ],
        }
    }

    #[test]
    fn test_render_includes_rates_params_and_streak() {
        let text = SummaryTemplate::render(&summary());
        assert!(text.contains("BTC-USD → `sl_hit_early`"));
        assert!(text.contains("no-signal streak 2"));
        assert!(text.contains("sl_hit_early 25%"));
        assert!(text.contains("wrong_direction n/a"));
        assert!(text.contains("gate 0.30"));
        assert!(text.contains("*Adjusted:*"));
        assert!(!text.contains("*Attention:*"));
        assert!(!text.contains("*Inbox error:*"));
    }

    #[test]
    fn test_render_shows_inbox_error() {
        let mut s = summary();
        s.inbox_error = Some("Signal inbox is not a JSON array".to_string());
        let text = SummaryTemplate::render(&s);
        assert!(text.contains("*Inbox error:* Signal inbox is not a JSON array"));
    }

    #[test]
    fn test_title_marks_dry_run() {
        let mut s = summary();
        assert_eq!(SummaryTemplate::title(&s), "Reconcile: 1 resolved, 3 pending");
        s.dry_run = true;
        assert!(SummaryTemplate::title(&s).starts_with("[dry run]"));
    }
}
