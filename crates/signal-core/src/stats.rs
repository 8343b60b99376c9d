/// Rolling-window statistics helpers shared by the aggregator and reports.
///
/// Everything here works on small bounded windows (tens of samples), so the
/// functions favor clarity over incremental bookkeeping.
use std::collections::VecDeque;

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Mean of the most recent `n` samples of a window (newest at the back).
pub fn tail_mean(data: &VecDeque<f64>, n: usize) -> Option<f64> {
    if data.is_empty() || n == 0 {
        return None;
    }
    let take = n.min(data.len());
    let sum: f64 = data.iter().rev().take(take).sum();
    Some(sum / take as f64)
}

/// `count / total`, or `None` when there is nothing to divide by.
pub fn rate(count: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(count as f64 / total as f64)
}

/// Exponential moving average where the first sample seeds the average.
/// `keep` is the weight of the previous value.
pub fn ema(prev: Option<f64>, sample: f64, keep: f64) -> f64 {
    match prev {
        Some(p) => keep * p + (1.0 - keep) * sample,
        None => sample,
    }
}

/// Append to a FIFO window, evicting the oldest entries beyond `cap`.
pub fn push_capped<T>(window: &mut VecDeque<T>, item: T, cap: usize) {
    window.push_back(item);
    truncate_front(window, cap);
}

/// Drop the oldest entries until the window holds at most `cap` items.
pub fn truncate_front<T>(window: &mut VecDeque<T>, cap: usize) {
    while window.len() > cap {
        window.pop_front();
    }
}
