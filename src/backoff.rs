//! Exponential backoff for failed jobs.

/// Delay in seconds before a job that has now failed `attempts_after` times
/// becomes eligible again: `base ^ attempts_after`.
///
/// Strictly increasing for `base > 1`.
pub fn delay_seconds(base: f64, attempts_after: u32) -> f64 {
    base.powi(attempts_after as i32)
}

/// Epoch-ms timestamp at which the next retry becomes due.
pub fn next_run_ms(now_ms: i64, base: f64, attempts_after: u32) -> i64 {
    now_ms + (delay_seconds(base, attempts_after) * 1000.0).round() as i64
}
