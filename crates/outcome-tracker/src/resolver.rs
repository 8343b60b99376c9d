use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use signal_core::{
    FetchError, IntentStatus, OutcomeCategory, PriceWindow, PriceWindowFetcher, TradeIntent,
    WindowFetch,
};
use trade_ledger::{Ledger, LedgerError};

use crate::classifier::classify;

/// Timing rules of the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    /// Intents younger than this are not fetched at all.
    pub min_recheck: Duration,
    /// Observation horizon after which an intent is forced terminal.
    pub max_window: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_recheck: Duration::hours(2),
            max_window: Duration::hours(4),
        }
    }
}

/// Next lifecycle step for a non-terminal intent given its cumulative window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Queued { entry_reached: bool },
    Terminal(IntentStatus),
}

impl Transition {
    /// Pure state machine step. Stop wins when both stop and target fall
    /// inside the window, since the intrabar order is unknown.
    pub fn decide(
        intent: &TradeIntent,
        window: &PriceWindow,
        elapsed: Duration,
        config: &ResolverConfig,
    ) -> Transition {
        let direction = intent.direction;
        let expired = elapsed >= config.max_window;

        if !direction.entry_reached(intent.entry_price, window) {
            return if expired {
                Transition::Terminal(IntentStatus::EntryNotReached)
            } else {
                Transition::Queued {
                    entry_reached: false,
                }
            };
        }

        let stop_hit = direction.stop_touched(intent.stop_loss, window);
        let target_hit = direction.target_touched(intent.take_profit, window);

        if stop_hit {
            if target_hit {
                tracing::debug!(
                    id = %intent.id,
                    "Stop and target both inside window, resolving as stopped"
                );
            }
            Transition::Terminal(IntentStatus::Stopped)
        } else if target_hit {
            Transition::Terminal(IntentStatus::Completed)
        } else if expired {
            Transition::Terminal(IntentStatus::Checked)
        } else {
            Transition::Queued {
                entry_reached: true,
            }
        }
    }
}

/// What one resolver pass did to one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryResolution {
    /// Already terminal; nothing fetched, nothing changed.
    AlreadyTerminal,
    /// Younger than the minimum re-check interval.
    Deferred,
    /// The window had no candles yet.
    Unchanged,
    Queued,
    Resolved(OutcomeCategory),
    /// Fetch failed; left for the next invocation.
    Skipped(FetchError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedIntent {
    pub id: String,
    pub symbol: String,
    pub status: IntentStatus,
    pub category: OutcomeCategory,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    pub examined: usize,
    pub deferred: usize,
    pub unchanged: usize,
    pub queued: usize,
    pub resolved: Vec<ResolvedIntent>,
    pub no_data: Vec<String>,
    pub transient: Vec<String>,
}

impl ResolutionReport {
    pub fn fetch_failures(&self) -> usize {
        self.no_data.len() + self.transient.len()
    }
}

pub struct OutcomeResolver {
    config: ResolverConfig,
}

impl OutcomeResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Advance one intent in place. Terminal intents are returned untouched,
    /// which is what makes repeated passes idempotent.
    pub async fn resolve_intent(
        &self,
        intent: &mut TradeIntent,
        fetcher: &dyn PriceWindowFetcher,
        now: DateTime<Utc>,
    ) -> EntryResolution {
        if intent.is_terminal() {
            return EntryResolution::AlreadyTerminal;
        }

        let elapsed = intent.elapsed(now);
        if elapsed < self.config.min_recheck {
            return EntryResolution::Deferred;
        }

        let window = match fetcher.fetch_window(&intent.symbol, intent.created_at).await {
            Ok(WindowFetch::Window(window)) if window.is_consistent() => window,
            Ok(WindowFetch::Window(window)) => {
                return EntryResolution::Skipped(FetchError::Transient(format!(
                    "inconsistent price window for {}: {:?}",
                    intent.symbol, window
                )));
            }
            Ok(WindowFetch::Empty) => return EntryResolution::Unchanged,
            Err(e) => return EntryResolution::Skipped(e),
        };

        intent.check_count += 1;
        intent.last_checked_at = Some(now);

        match Transition::decide(intent, &window, elapsed, &self.config) {
            Transition::Queued { entry_reached } => {
                intent.status = IntentStatus::Queued;
                intent.entry_reached = entry_reached;
                EntryResolution::Queued
            }
            Transition::Terminal(status) => {
                let Some(category) =
                    classify(status, intent.direction, intent.entry_price, &window)
                else {
                    return EntryResolution::Queued;
                };
                intent.status = status;
                intent.entry_reached = category.entry_reached();
                intent.resolved_at = Some(now);
                intent.category = Some(category);
                intent.realized = Some(window);
                EntryResolution::Resolved(category)
            }
        }
    }

    /// Run every pending ledger intent through the state machine, in ledger
    /// order, writing changed intents back by id.
    pub async fn resolve_pending(
        &self,
        ledger: &mut Ledger,
        fetcher: &dyn PriceWindowFetcher,
        now: DateTime<Utc>,
    ) -> Result<ResolutionReport, LedgerError> {
        let mut report = ResolutionReport::default();

        for id in ledger.pending_ids() {
            let Some(mut intent) = ledger.get(&id).cloned() else {
                continue;
            };
            report.examined += 1;

            match self.resolve_intent(&mut intent, fetcher, now).await {
                EntryResolution::AlreadyTerminal => {}
                EntryResolution::Deferred => report.deferred += 1,
                EntryResolution::Unchanged => report.unchanged += 1,
                EntryResolution::Queued => {
                    report.queued += 1;
                    ledger.update(intent)?;
                }
                EntryResolution::Resolved(category) => {
                    tracing::info!(
                        id = %intent.id,
                        symbol = %intent.symbol,
                        status = %intent.status,
                        %category,
                        "Intent resolved"
                    );
                    report.resolved.push(ResolvedIntent {
                        id: intent.id.clone(),
                        symbol: intent.symbol.clone(),
                        status: intent.status,
                        category,
                    });
                    ledger.update(intent)?;
                }
                EntryResolution::Skipped(e) => {
                    tracing::warn!(id = %id, "Skipping intent this cycle: {}", e);
                    match e {
                        FetchError::NoData { .. } => report.no_data.push(id),
                        FetchError::Transient(_) => report.transient.push(id),
                    }
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            resolved = report.resolved.len(),
            queued = report.queued,
            deferred = report.deferred,
            fetch_failures = report.fetch_failures(),
            "Resolver pass complete"
        );
        Ok(report)
    }
}

impl Default for OutcomeResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}
