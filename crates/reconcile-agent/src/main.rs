use anyhow::Result;
use market_data_client::MarketDataClient;
use notification_service::{
    Alert, AlertKind, NotificationConfig, NotificationService, SummaryTemplate,
};

mod config;
mod cycle;
mod inbox;

use config::AgentConfig;
use cycle::{Reconciler, RunMode};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let mode = RunMode::from_args(std::env::args().skip(1))?;

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!(?mode, "Starting reconcile agent");
    tracing::info!("  Ledger: {}", config.ledger_file.display());
    tracing::info!("  Learning state: {}", config.learning_state_file.display());
    tracing::info!(
        "  Observation window: recheck after {}h, resolve by {}h",
        config.min_recheck_hours,
        config.max_observation_hours
    );
    tracing::info!("  Rolling window: {} resolutions", config.rolling_window);

    // 3. Collaborators
    let market_data = MarketDataClient::new(
        config.market_data_base_url.clone(),
        config.market_data_interval.clone(),
        config.market_data_rate_limit,
    );
    let notifier = NotificationService::new(&NotificationConfig::from_env());

    // 4. One pass
    let reconciler = Reconciler::new(&config, &market_data);
    match reconciler.run(mode, chrono::Utc::now()).await {
        Ok(summary) => {
            println!(
                "{}\n\n{}",
                SummaryTemplate::title(&summary),
                SummaryTemplate::render(&summary)
            );
            if mode.commits() {
                notifier.send_alert(&Alert::summary(&summary)).await;
            }
            tracing::info!(
                resolved = summary.resolved.len(),
                pending = summary.pending,
                new_intents = summary.new_intents,
                fetch_failures = summary.fetch_failures,
                "Reconcile complete"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Reconcile failed: {:#}", e);
            if mode.commits() {
                let alert = Alert::new(AlertKind::Failure, "Reconcile failed", format!("{:#}", e));
                notifier.send_alert(&alert).await;
            }
            Err(e)
        }
    }
}
