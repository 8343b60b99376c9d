//! Chart API response shapes and their reduction to a price window.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use signal_core::{FetchError, PriceWindow, WindowFetch};

#[derive(Debug, Deserialize)]
pub(crate) struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChartError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChartResult {
    /// Present whenever the symbol is known, even with no candles in range.
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Indicators {
    #[serde(default)]
    pub quote: Vec<Quote>,
}

/// Column-wise OHLC arrays. Missing candles come back as `null`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Quote {
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

/// One complete candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl ChartResult {
    fn candles(&self) -> Vec<Candle> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };
        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let start = DateTime::from_timestamp(*ts, 0)?;
                let high = (*quote.high.get(i)?)?;
                let low = (*quote.low.get(i)?)?;
                let close = (*quote.close.get(i)?)?;
                if !(high.is_finite() && low.is_finite() && close.is_finite()) || low <= 0.0 {
                    return None;
                }
                Some(Candle {
                    start,
                    high,
                    low,
                    close,
                })
            })
            .collect()
    }
}

/// Cumulative range of candles starting at or after `since`, oldest first.
pub fn summarize(candles: &[Candle], since: DateTime<Utc>) -> WindowFetch {
    let mut window: Option<PriceWindow> = None;
    for candle in candles.iter().filter(|c| c.start >= since) {
        window = Some(match window {
            None => PriceWindow::new(candle.high, candle.low, candle.close),
            Some(w) => PriceWindow::new(
                w.max_high.max(candle.high),
                w.min_low.min(candle.low),
                candle.close,
            ),
        });
    }
    window.map(WindowFetch::Window).unwrap_or(WindowFetch::Empty)
}

/// Interpret a decoded chart response.
///
/// An API-level error, or a result carrying neither metadata nor timestamps,
/// means the symbol has no data at all. A known symbol with no candles in
/// range, or whose candles all predate `since`, is an empty window.
pub(crate) fn interpret(
    symbol: &str,
    response: ChartResponse,
    since: DateTime<Utc>,
) -> Result<WindowFetch, FetchError> {
    if let Some(error) = response.chart.error {
        return Err(FetchError::NoData {
            symbol: symbol.to_string(),
            reason: format!("{}: {}", error.code, error.description),
        });
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| FetchError::NoData {
            symbol: symbol.to_string(),
            reason: "empty chart result".to_string(),
        })?;

    if result.timestamp.is_empty() {
        if result.meta.is_some() {
            return Ok(WindowFetch::Empty);
        }
        return Err(FetchError::NoData {
            symbol: symbol.to_string(),
            reason: "no candles in range".to_string(),
        });
    }

    let mut candles = result.candles();
    candles.sort_by_key(|c| c.start);
    Ok(summarize(&candles, since))
}
