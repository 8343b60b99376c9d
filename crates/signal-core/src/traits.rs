use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{FetchError, PriceWindow};

/// Result of a successful price window request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowFetch {
    /// At least one candle closed inside `[since, now]`.
    Window(PriceWindow),
    /// The symbol is known but no candle covers the window yet.
    Empty,
}

/// Source of the cumulative price range since a point in time.
#[async_trait]
pub trait PriceWindowFetcher: Send + Sync {
    async fn fetch_window(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowFetch, FetchError>;
}
