//! Retry policy for upstream calls
//!
//! Classifies HTTP statuses and computes backoff delays. Not-found and
//! bad-request answers are final; rate limiting, server errors and network
//! failures are retried with capped exponential backoff plus jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 재시도 정책 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Hard ceiling on attempts per request, including the first one
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base * 2^n` before jitter
    pub base_delay_ms: u64,
    /// Upper bound of the exponential part
    pub max_delay_ms: u64,
    /// Uniform random jitter added on top, `0..jitter_range_ms`
    pub jitter_range_ms: u64,
    /// Linear step for 403 answers (`step * n`). `None` treats 403 like 429.
    pub forbidden_step_ms: Option<u64>,
    /// Upper bound of the linear 403 schedule
    pub forbidden_max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_range_ms: 1500,
            forbidden_step_ms: None,
            forbidden_max_delay_ms: 60_000,
        }
    }
}

/// How a response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 404 / 410
    NotFound,
    /// 400
    BadRequest,
    /// 403, possibly a block; retried on the forbidden schedule
    Forbidden,
    /// 429 / 5xx / anything else unexpected
    Retryable,
}

impl StatusClass {
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Success | Self::NotFound | Self::BadRequest)
    }
}

#[must_use]
pub const fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 | 410 => StatusClass::NotFound,
        400 => StatusClass::BadRequest,
        403 => StatusClass::Forbidden,
        _ => StatusClass::Retryable,
    }
}

impl RetryPolicy {
    /// Listing endpoint defaults: more patient, one schedule for everything
    #[must_use]
    pub fn listing() -> Self {
        Self {
            max_attempts: 5,
            ..Self::default()
        }
    }

    /// Detail endpoint defaults: fewer attempts, slower linear schedule on 403
    #[must_use]
    pub fn detail() -> Self {
        Self {
            max_attempts: 3,
            jitter_range_ms: 1500,
            forbidden_step_ms: Some(10_000),
            forbidden_max_delay_ms: 60_000,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff without jitter
    #[must_use]
    pub fn capped_delay(&self, class: StatusClass, attempt: u32) -> Duration {
        let millis = match (class, self.forbidden_step_ms) {
            (StatusClass::Forbidden, Some(step)) => step
                .saturating_mul(u64::from(attempt))
                .min(self.forbidden_max_delay_ms),
            _ => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                self.base_delay_ms
                    .saturating_mul(factor)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(millis)
    }

    /// Backoff to sleep after failed attempt `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, class: StatusClass, attempt: u32) -> Duration {
        let jitter = if self.jitter_range_ms == 0 {
            0
        } else {
            fastrand::u64(0..self.jitter_range_ms)
        };
        self.capped_delay(class, attempt) + Duration::from_millis(jitter)
    }
}
