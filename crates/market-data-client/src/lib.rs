use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use signal_core::{FetchError, PriceWindowFetcher, WindowFetch};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub mod chart;

pub use chart::{summarize, Candle};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; reconcile-agent/0.1)";
const MAX_ATTEMPTS: u32 = 3;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }
            let Some(&oldest) = ts.front() else {
                ts.push_back(now);
                return;
            };

            // Wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for market data slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Price window adapter over the public chart API.
#[derive(Clone)]
pub struct MarketDataClient {
    base_url: String,
    interval: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl MarketDataClient {
    /// `interval` is the candle width passed to the API (`1h`, `15m`, ...);
    /// `rate_limit` is requests per minute.
    pub fn new(
        base_url: impl Into<String>,
        interval: impl Into<String>,
        rate_limit: usize,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval: interval.into(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FetchError> {
        let request = builder
            .build()
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        for attempt in 0..MAX_ATTEMPTS {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| FetchError::Transient("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| FetchError::Transient(e.to_string()))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Market data 429 rate limited, waiting {}s before retry {}/{}",
                wait_secs,
                attempt + 1,
                MAX_ATTEMPTS
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(FetchError::Transient(format!(
            "Rate limited after {} retries",
            MAX_ATTEMPTS
        )))
    }

    /// Fetch the candles for `symbol` over `[since, now]` and reduce them to
    /// a cumulative window.
    pub async fn get_window(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowFetch, FetchError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let now = Utc::now();

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("period1", since.timestamp().to_string()),
                ("period2", now.timestamp().to_string()),
                ("interval", self.interval.clone()),
                ("includePrePost", "false".to_string()),
            ]))
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("HTTP {} for {}", status, symbol)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        // Client errors still carry a chart error body naming the cause.
        let parsed: chart::ChartResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(FetchError::Transient(format!(
                    "Undecodable chart response for {}: {}",
                    symbol, e
                )));
            }
            Err(_) => {
                return Err(FetchError::Transient(format!("HTTP {}: {}", status, body)));
            }
        };

        let fetched = chart::interpret(symbol, parsed, since)?;
        tracing::debug!(symbol, ?fetched, "Fetched price window");
        Ok(fetched)
    }
}

#[async_trait]
impl PriceWindowFetcher for MarketDataClient {
    async fn fetch_window(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowFetch, FetchError> {
        self.get_window(symbol, since).await
    }
}
