//! Reconnection backoff policy
//!
//! Pure functions of the (1-based) attempt number so the schedule can be
//! checked without a socket:
//!
//! ```text
//! delay  = min(base * 2^(attempt-1), max)
//! jitter = delay * 0.25 * uniform(-1, 1)
//! final  = max(0, delay + jitter)
//! ```

use livefeed_core::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Fraction of the base delay used as the jitter amplitude
pub const JITTER_RATIO: f64 = 0.25;

/// Un-jittered delay for `attempt`; attempt 0 is treated as 1
pub fn base_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.max(1) - 1;
    // 2^63 ms already dwarfs any sane cap
    let factor = 2f64.powi(exponent.min(63) as i32);
    let raw_ms = config.base_delay_ms as f64 * factor;
    let capped_ms = raw_ms.min(config.max_delay_ms as f64);
    Duration::from_millis(capped_ms as u64)
}

/// Delay for `attempt` with ±25% jitter drawn from `rng`
pub fn jittered_delay<R: Rng + ?Sized>(
    attempt: u32,
    config: &ReconnectConfig,
    rng: &mut R,
) -> Duration {
    let base_ms = base_delay(attempt, config).as_secs_f64() * 1000.0;
    let jitter_ms = base_ms * JITTER_RATIO * rng.gen_range(-1.0..=1.0);
    let final_ms = (base_ms + jitter_ms).max(0.0);
    Duration::from_secs_f64(final_ms / 1000.0)
}

/// Delay for `attempt` using the thread-local RNG
pub fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    jittered_delay(attempt, config, &mut rand::thread_rng())
}
