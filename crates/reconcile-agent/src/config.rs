use anyhow::{bail, Result};
use chrono::Duration;
use learning_engine::AdjusterConfig;
use outcome_tracker::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Stores
    pub ledger_file: PathBuf,
    pub learning_state_file: PathBuf,
    pub signal_inbox_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_stale_minutes: u64, // 60

    // Resolver timing
    pub min_recheck_hours: i64,     // 2
    pub max_observation_hours: i64, // 4

    // Learning
    pub rolling_window: usize,            // 50, clamped to 20..=50
    pub min_trades_for_adjustment: usize, // 10
    pub no_signal_loosen_after: u32,      // 2

    // Market data
    pub market_data_base_url: String,
    pub market_data_interval: String,  // 1h
    pub market_data_rate_limit: usize, // requests per minute
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            ledger_file: var_or("LEDGER_FILE", "trade_log.json").into(),
            learning_state_file: var_or("LEARNING_STATE_FILE", "learning_state.json").into(),
            signal_inbox_file: var_or("SIGNAL_INBOX_FILE", "signal_inbox.json").into(),
            lock_file: var_or("LOCK_FILE", "reconcile.lock").into(),
            lock_stale_minutes: var_or("LOCK_STALE_MINUTES", "60").parse()?,

            min_recheck_hours: var_or("MIN_RECHECK_HOURS", "2").parse()?,
            max_observation_hours: var_or("MAX_OBSERVATION_HOURS", "4").parse()?,

            rolling_window: learning_engine::RollingStats::clamp_window(
                var_or("ROLLING_WINDOW", "50").parse()?,
            ),
            min_trades_for_adjustment: var_or("MIN_TRADES_FOR_ADJUSTMENT", "10").parse()?,
            no_signal_loosen_after: var_or("NO_SIGNAL_LOOSEN_AFTER", "2").parse()?,

            market_data_base_url: var_or(
                "MARKET_DATA_BASE_URL",
                market_data_client::DEFAULT_BASE_URL,
            ),
            market_data_interval: var_or("MARKET_DATA_INTERVAL", "1h"),
            market_data_rate_limit: var_or("MARKET_DATA_RATE_LIMIT", "60").parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_recheck_hours < 0 {
            bail!("MIN_RECHECK_HOURS must not be negative");
        }
        if self.max_observation_hours < self.min_recheck_hours {
            bail!(
                "MAX_OBSERVATION_HOURS ({}) must be at least MIN_RECHECK_HOURS ({})",
                self.max_observation_hours,
                self.min_recheck_hours
            );
        }
        if self.lock_stale_minutes == 0 {
            bail!("LOCK_STALE_MINUTES must be at least 1");
        }
        if self.no_signal_loosen_after == 0 {
            bail!("NO_SIGNAL_LOOSEN_AFTER must be at least 1");
        }
        if self.market_data_rate_limit == 0 {
            bail!("MARKET_DATA_RATE_LIMIT must be at least 1");
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            min_recheck: Duration::hours(self.min_recheck_hours),
            max_window: Duration::hours(self.max_observation_hours),
        }
    }

    /// Age after which a lock file left by a dead invocation is taken over.
    pub fn lock_stale_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_stale_minutes * 60)
    }

    pub fn adjuster_config(&self) -> AdjusterConfig {
        let mut config = AdjusterConfig::default();
        config.min_trades = self.min_trades_for_adjustment;
        config.drought.loosen_after = self.no_signal_loosen_after;
        config
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ledger_file: "trade_log.json".into(),
            learning_state_file: "learning_state.json".into(),
            signal_inbox_file: "signal_inbox.json".into(),
            lock_file: "reconcile.lock".into(),
            lock_stale_minutes: 60,
            min_recheck_hours: 2,
            max_observation_hours: 4,
            rolling_window: 50,
            min_trades_for_adjustment: 10,
            no_signal_loosen_after: 2,
            market_data_base_url: market_data_client::DEFAULT_BASE_URL.to_string(),
            market_data_interval: "1h".to_string(),
            market_data_rate_limit: 60,
        }
    }
}
