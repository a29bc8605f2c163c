//! Politeness delay between outbound calls

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::DelayRange;

/// Uniform pick in `[min_ms, max_ms]`. A reversed range is treated as its minimum.
#[must_use]
pub fn pick_delay(range: DelayRange) -> Duration {
    let millis = if range.max_ms > range.min_ms {
        fastrand::u64(range.min_ms..=range.max_ms)
    } else {
        range.min_ms
    };
    Duration::from_millis(millis)
}

/// Sleeps for a random delay from `range`, returning early on cancellation
pub async fn pause(range: DelayRange, cancel: &CancellationToken) {
    let delay = pick_delay(range);
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = cancel.cancelled() => {}
    }
}
