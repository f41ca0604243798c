//! Exponential backoff for the `waiting` state.
//!
//! `retry_at = now + min(ceiling, base_delay * retry_factor^retry_count)`.
//! `retry_count` here is the count *after* the attempt that just failed, so
//! the first retry (retry_count=1) waits one `base_delay`, the second waits
//! `base_delay * retry_factor`, and so on.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

pub fn next_retry_at(
    now: DateTime<Utc>,
    retry_count: i32,
    retry_factor: i32,
    base_delay: Duration,
    ceiling: Duration,
) -> DateTime<Utc> {
    let exponent = (retry_count.max(1) - 1) as u32;
    let factor = (retry_factor.max(1) as f64).powi(exponent as i32);
    let delay_ms = (base_delay.as_millis() as f64) * factor;
    let capped_ms = delay_ms.min(ceiling.as_millis() as f64);
    now + ChronoDuration::milliseconds(capped_ms.round() as i64)
}
