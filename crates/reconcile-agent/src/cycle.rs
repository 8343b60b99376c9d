use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use learning_engine::{
    adjust, apply_drought, DroughtAction, LearningState, LearningStore, ParamChange,
};
use notification_service::{CycleSummary, ResolvedLine};
use outcome_tracker::{FailureClassifier, OutcomeResolver, ResolutionReport};
use signal_core::{OutcomeCategory, PriceWindowFetcher, TradeIntent};
use trade_ledger::{Ledger, LockGuard};

use crate::config::AgentConfig;
use crate::inbox::{intake, stamp, Inbox, IntakeReport};

/// How much of the cycle an invocation runs and whether it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Resolve, learn, take in new intents and persist.
    Normal,
    /// Full cycle without persisting anything.
    DryRun,
    /// Load both stores and report. Takes no lock and writes nothing.
    Summary,
    /// Replay the ledger into fresh statistics. Parameters are untouched.
    RebuildStats,
}

impl RunMode {
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mode = RunMode::Normal;
        for arg in args {
            let next = match arg.as_ref() {
                "--summary" => RunMode::Summary,
                "--dry-run" => RunMode::DryRun,
                "--rebuild-stats" => RunMode::RebuildStats,
                other => anyhow::bail!(
                    "Unknown argument '{}' (expected --summary, --dry-run or --rebuild-stats)",
                    other
                ),
            };
            if mode != RunMode::Normal && mode != next {
                anyhow::bail!("--summary, --dry-run and --rebuild-stats are mutually exclusive");
            }
            mode = next;
        }
        Ok(mode)
    }

    pub fn commits(&self) -> bool {
        matches!(self, RunMode::Normal | RunMode::RebuildStats)
    }
}

/// Terminal ledger intents paired with their category, oldest resolution
/// first. Records written without a stored category are labelled from
/// their stored price window; those without one are skipped.
fn labelled(ledger: &Ledger) -> Vec<(&TradeIntent, OutcomeCategory)> {
    ledger
        .resolved_in_order()
        .into_iter()
        .filter_map(|intent| {
            let category = intent.category.or_else(|| FailureClassifier::label(intent));
            if category.is_none() {
                tracing::warn!(id = %intent.id, "Terminal intent has no outcome, not aggregated");
            }
            category.map(|c| (intent, c))
        })
        .collect()
}

fn describe(change: &ParamChange) -> String {
    format!(
        "{} {:.2} -> {:.2} ({})",
        change.parameter, change.from, change.to, change.reason
    )
}

/// One reconciliation pass over the ledger and the learning state.
pub struct Reconciler<'a> {
    config: &'a AgentConfig,
    fetcher: &'a dyn PriceWindowFetcher,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a AgentConfig, fetcher: &'a dyn PriceWindowFetcher) -> Self {
        Self { config, fetcher }
    }

    fn store(&self) -> LearningStore {
        LearningStore::new(&self.config.learning_state_file, self.config.rolling_window)
    }

    pub async fn run(&self, mode: RunMode, now: DateTime<Utc>) -> Result<CycleSummary> {
        let _lock = match mode {
            RunMode::Summary => None,
            _ => Some(LockGuard::acquire(
                &self.config.lock_file,
                self.config.lock_stale_after(),
            )?),
        };

        let ledger = Ledger::load(&self.config.ledger_file)?;
        let store = self.store();
        let state = store.load()?;
        tracing::info!(
            records = ledger.len(),
            malformed = ledger.malformed().count(),
            pending = ledger.pending_ids().len(),
            cycles = state.cycles,
            "Stores loaded"
        );

        match mode {
            RunMode::Summary => Ok(summarize(
                &ledger,
                &state,
                &ResolutionReport::default(),
                &IntakeReport::default(),
                Vec::new(),
                false,
            )),
            RunMode::RebuildStats => self.rebuild(&ledger, state, &store),
            RunMode::Normal | RunMode::DryRun => {
                self.reconcile(ledger, state, &store, mode == RunMode::DryRun, now)
                    .await
            }
        }
    }

    fn rebuild(
        &self,
        ledger: &Ledger,
        mut state: LearningState,
        store: &LearningStore,
    ) -> Result<CycleSummary> {
        let replayed = state.rebuild(labelled(ledger));
        store.save(&state)?;
        tracing::info!(
            replayed,
            window = state.stats.recent.len(),
            "Rolling statistics rebuilt from ledger"
        );
        Ok(summarize(
            ledger,
            &state,
            &ResolutionReport::default(),
            &IntakeReport::default(),
            Vec::new(),
            false,
        ))
    }

    async fn reconcile(
        &self,
        mut ledger: Ledger,
        mut state: LearningState,
        store: &LearningStore,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<CycleSummary> {
        let inbox = Inbox::new(&self.config.signal_inbox_file);
        let batch = if dry_run {
            inbox.read().map(|mut records| {
                stamp(&mut records, now);
                records
            })
        } else {
            inbox.read_stamped(now)
        };
        let (records, inbox_error) = match batch {
            Ok(records) => (records, None),
            Err(e) => {
                tracing::error!("Signal inbox unusable this cycle: {:#}", e);
                (Vec::new(), Some(format!("{:#}", e)))
            }
        };
        let inbox_pending = !records.is_empty();
        let loaded_params = state.params;

        // 1. Resolve pending intents against the market
        let resolver = OutcomeResolver::new(self.config.resolver_config());
        let report = resolver
            .resolve_pending(&mut ledger, self.fetcher, now)
            .await?;

        // 2. Fold everything resolved since the watermark into the statistics
        let absorbed = state.absorb(labelled(&ledger));
        tracing::debug!(absorbed, "Resolutions aggregated");

        // 3. Adjust parameters and source weights once
        let adjuster = self.config.adjuster_config();
        let snapshot = state.stats.snapshot();
        let adjustment = adjust(&snapshot, &state.params, &state.source_weights, &adjuster);
        state.params = adjustment.params;
        state.source_weights = adjustment.source_weights;
        let mut changes: Vec<String> = adjustment.changes.iter().map(describe).collect();

        // 4. Take in new intents under the parameters they were generated with
        let mut intake_report = intake(&mut ledger, records, loaded_params, now);
        intake_report.inbox_error = inbox_error;

        // 5. No-signal loop. An unreadable inbox says nothing about signals.
        if intake_report.inbox_error.is_none() {
            let drought = apply_drought(
                &state.params,
                &state.drought,
                intake_report.eligible(),
                &adjuster.drought,
            );
            match drought.action {
                DroughtAction::Loosened => tracing::warn!(
                    streak = drought.drought.consecutive_no_signal,
                    steps = drought.drought.loosen_steps,
                    "No eligible signals, loosening filters"
                ),
                DroughtAction::Reverted => tracing::info!(
                    steps = drought.drought.loosen_steps,
                    "Signals resumed, reverting one loosening step"
                ),
                DroughtAction::None => {}
            }
            state.params = drought.params;
            state.drought = drought.drought;
            changes.extend(drought.changes.iter().map(describe));
        }

        for change in &changes {
            tracing::info!("Adjusted {}", change);
        }

        state.cycles += 1;
        state.updated_at = Some(now);

        // 6. Commit: ledger first, so a crash before the state write is
        // recovered by the watermark on the next run
        if dry_run {
            tracing::info!("Dry run, nothing persisted");
        } else {
            ledger.persist().context("Failed to persist ledger")?;
            store.save(&state).context("Failed to persist learning state")?;
            if intake_report.inbox_error.is_none() && inbox_pending {
                inbox.clear()?;
            }
        }

        Ok(summarize(
            &ledger,
            &state,
            &report,
            &intake_report,
            changes,
            dry_run,
        ))
    }
}

fn summarize(
    ledger: &Ledger,
    state: &LearningState,
    report: &ResolutionReport,
    intake: &IntakeReport,
    changes: Vec<String>,
    dry_run: bool,
) -> CycleSummary {
    let snapshot = state.stats.snapshot();
    let category_rates: BTreeMap<OutcomeCategory, f64> = OutcomeCategory::ALL
        .iter()
        .filter_map(|c| snapshot.rate(*c).map(|r| (*c, r)))
        .collect();

    CycleSummary {
        dry_run,
        resolved: report
            .resolved
            .iter()
            .map(|r| ResolvedLine {
                symbol: r.symbol.clone(),
                category: r.category,
            })
            .collect(),
        pending: ledger.pending_ids().len(),
        deferred: report.deferred,
        fetch_failures: report.fetch_failures(),
        malformed_records: ledger.malformed().count(),
        new_intents: intake.accepted,
        filtered_intents: intake.filtered,
        window_resolved: snapshot.resolved,
        lifetime_resolved: snapshot.lifetime_resolved,
        category_rates,
        win_rate: snapshot.win_rate,
        direction_accuracy: snapshot.direction_accuracy,
        precision_ratio: snapshot.precision_ratio,
        params: state.params,
        source_weights: state.source_weights.clone(),
        no_signal_streak: state.drought.consecutive_no_signal,
        inbox_error: intake.inbox_error.clone(),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use signal_core::{
        Direction, FetchError, IntentStatus, NewIntent, ParamSnapshot, PriceWindow, WindowFetch,
    };
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFetcher {
        windows: HashMap<String, PriceWindow>,
        calls: AtomicUsize,
    }

    impl FixedFetcher {
        fn new(windows: &[(&str, PriceWindow)]) -> Self {
            Self {
                windows: windows
                    .iter()
                    .map(|(s, w)| (s.to_string(), *w))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceWindowFetcher for FixedFetcher {
        async fn fetch_window(
            &self,
            symbol: &str,
            _since: DateTime<Utc>,
        ) -> Result<WindowFetch, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.windows
                .get(symbol)
                .map(|w| WindowFetch::Window(*w))
                .ok_or_else(|| FetchError::NoData {
                    symbol: symbol.to_string(),
                    reason: "unknown symbol".to_string(),
                })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn config_in(dir: &Path) -> AgentConfig {
        AgentConfig {
            ledger_file: dir.join("trade_log.json"),
            learning_state_file: dir.join("learning_state.json"),
            signal_inbox_file: dir.join("signal_inbox.json"),
            lock_file: dir.join("reconcile.lock"),
            ..AgentConfig::default()
        }
    }

    fn long(symbol: &str, hours_ago: i64) -> TradeIntent {
        NewIntent {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            created_at: Some(now() - Duration::hours(hours_ago)),
            sources: vec!["engulfing".to_string()],
            confidence: Some(0.6),
            sentiment_score: None,
            technical_score: None,
            leverage: None,
            rr_ratio: None,
            rationale: None,
        }
        .into_intent(now(), ParamSnapshot::default())
    }

    fn seed_ledger(config: &AgentConfig, intents: Vec<TradeIntent>) {
        let mut ledger = Ledger::new(&config.ledger_file);
        for intent in intents {
            ledger.append(intent).unwrap();
        }
        ledger.persist().unwrap();
    }

    fn seed_inbox(config: &AgentConfig) {
        fs::write(
            &config.signal_inbox_file,
            r#"[{"symbol": "ETH-USD", "direction": "SHORT", "entry_price": 100.0,
                 "stop_loss": 104.0, "take_profit": 92.0, "confidence": 0.55}]"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_resolves_learns_and_takes_in_signals() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_ledger(&config, vec![long("BTC-USD", 5)]);
        seed_inbox(&config);
        let fetcher = FixedFetcher::new(&[("BTC-USD", PriceWindow::new(111.0, 99.0, 110.0))]);

        let summary = Reconciler::new(&config, &fetcher)
            .run(RunMode::Normal, now())
            .await
            .unwrap();

        assert_eq!(
            summary.resolved,
            vec![ResolvedLine {
                symbol: "BTC-USD".to_string(),
                category: OutcomeCategory::Success,
            }]
        );
        assert_eq!(summary.new_intents, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.no_signal_streak, 0);

        let ledger = Ledger::load(&config.ledger_file).unwrap();
        assert_eq!(ledger.len(), 2);
        let btc = ledger.intents().find(|i| i.symbol == "BTC-USD").unwrap();
        assert_eq!(btc.status, IntentStatus::Completed);
        let eth = ledger.intents().find(|i| i.symbol == "ETH-USD").unwrap();
        assert_eq!(eth.status, IntentStatus::Open);

        let state = LearningStore::new(&config.learning_state_file, 50)
            .load()
            .unwrap();
        assert_eq!(state.stats.lifetime_resolved, 1);
        assert_eq!(state.aggregated_through, Some(now()));
        assert_eq!(state.cycles, 1);

        assert!(Inbox::new(&config.signal_inbox_file).read().unwrap().is_empty());
        assert!(!config.lock_file.exists());
    }

    #[tokio::test]
    async fn test_second_run_does_not_double_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_ledger(&config, vec![long("BTC-USD", 5)]);
        seed_inbox(&config);
        let fetcher = FixedFetcher::new(&[("BTC-USD", PriceWindow::new(111.0, 99.0, 110.0))]);
        let reconciler = Reconciler::new(&config, &fetcher);

        reconciler.run(RunMode::Normal, now()).await.unwrap();
        let summary = reconciler
            .run(RunMode::Normal, now() + Duration::minutes(30))
            .await
            .unwrap();

        assert!(summary.resolved.is_empty());
        assert_eq!(summary.lifetime_resolved, 1);
        assert_eq!(summary.no_signal_streak, 1);
        // The new ETH intent is too young to fetch.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_from_unfinished_commit_is_not_recorded_twice() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_inbox(&config);
        let fetcher = FixedFetcher::new(&[]);
        let reconciler = Reconciler::new(&config, &fetcher);

        // The state write fails after the ledger is already written.
        let blocker = dir.path().join("learning_state.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(reconciler.run(RunMode::Normal, now()).await.is_err());
        assert_eq!(Ledger::load(&config.ledger_file).unwrap().len(), 1);
        fs::remove_dir(&blocker).unwrap();

        let summary = reconciler
            .run(RunMode::Normal, now() + Duration::minutes(5))
            .await
            .unwrap();

        let ledger = Ledger::load(&config.ledger_file).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(summary.new_intents, 0);
        assert_eq!(summary.no_signal_streak, 0);
        assert!(Inbox::new(&config.signal_inbox_file).read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_ledger(&config, vec![long("BTC-USD", 5)]);
        seed_inbox(&config);
        let before = fs::read(&config.ledger_file).unwrap();
        let fetcher = FixedFetcher::new(&[("BTC-USD", PriceWindow::new(111.0, 99.0, 110.0))]);

        let summary = Reconciler::new(&config, &fetcher)
            .run(RunMode::DryRun, now())
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.resolved.len(), 1);
        assert_eq!(fs::read(&config.ledger_file).unwrap(), before);
        assert!(!config.learning_state_file.exists());
        assert_eq!(Inbox::new(&config.signal_inbox_file).read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_held_lock_aborts_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_ledger(&config, vec![long("BTC-USD", 5)]);
        fs::write(&config.lock_file, "pid=1").unwrap();
        let fetcher = FixedFetcher::new(&[]);

        let result = Reconciler::new(&config, &fetcher)
            .run(RunMode::Normal, now())
            .await;

        assert!(result.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(config.lock_file.exists());

        // Summary mode reads without the lock.
        let summary = Reconciler::new(&config, &fetcher)
            .run(RunMode::Summary, now())
            .await
            .unwrap();
        assert_eq!(summary.pending, 1);
        assert!(!config.learning_state_file.exists());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_aborts_without_writing_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.ledger_file, "[{\"symbol\": ").unwrap();
        let fetcher = FixedFetcher::new(&[]);

        let result = Reconciler::new(&config, &fetcher)
            .run(RunMode::Normal, now())
            .await;

        assert!(result.is_err());
        assert!(!config.learning_state_file.exists());
        assert_eq!(fs::read_to_string(&config.ledger_file).unwrap(), "[{\"symbol\": ");
    }

    #[tokio::test]
    async fn test_unreadable_inbox_does_not_feed_the_no_signal_loop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.signal_inbox_file, "{not json").unwrap();
        let fetcher = FixedFetcher::new(&[]);
        let reconciler = Reconciler::new(&config, &fetcher);

        reconciler.run(RunMode::Normal, now()).await.unwrap();
        let summary = reconciler
            .run(RunMode::Normal, now() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary.new_intents, 0);
        assert_eq!(summary.no_signal_streak, 0);
        assert!(summary.inbox_error.is_some());
        assert!(summary.changes.is_empty());
        assert_eq!(summary.params, ParamSnapshot::default());

        let state = LearningStore::new(&config.learning_state_file, 50)
            .load()
            .unwrap();
        assert!(!state.drought.is_loosened());
        assert_eq!(state.cycles, 2);
        assert_eq!(
            fs::read_to_string(&config.signal_inbox_file).unwrap(),
            "{not json"
        );
    }

    #[tokio::test]
    async fn test_rebuild_stats_keeps_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let mut resolved = long("BTC-USD", 8);
        resolved.status = IntentStatus::Stopped;
        resolved.realized = Some(PriceWindow::new(101.0, 94.0, 95.0));
        resolved.resolved_at = Some(now() - Duration::hours(3));
        // Written before categories were stored.
        resolved.category = None;
        seed_ledger(&config, vec![resolved, long("SOL-USD", 1)]);

        let store = LearningStore::new(&config.learning_state_file, 50);
        let mut state = LearningState::new(50);
        state.params.stop_distance = 1.25;
        state.stats.lifetime_resolved = 99;
        store.save(&state).unwrap();

        let fetcher = FixedFetcher::new(&[]);
        let summary = Reconciler::new(&config, &fetcher)
            .run(RunMode::RebuildStats, now())
            .await
            .unwrap();

        assert_eq!(summary.lifetime_resolved, 1);
        assert_eq!(summary.category_rates.get(&OutcomeCategory::SlHitEarly), Some(&1.0));
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.params.stop_distance, 1.25);
        assert_eq!(reloaded.stats.lifetime_resolved, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mode_from_args() {
        assert_eq!(RunMode::from_args(Vec::<String>::new()).unwrap(), RunMode::Normal);
        assert_eq!(RunMode::from_args(["--dry-run"]).unwrap(), RunMode::DryRun);
        assert!(RunMode::from_args(["--summary", "--dry-run"]).is_err());
        assert!(RunMode::from_args(["--verbose"]).is_err());
        assert!(!RunMode::DryRun.commits());
    }
}
