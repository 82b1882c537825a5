//! Rate limits shared by the dispatcher and the manual keepalive.

use std::time::Duration;

pub const MIN_RATE_HZ: f64 = 1.0;
pub const MAX_RATE_HZ: f64 = 50.0;

/// Never send closer together than this, whatever the configured rate.
pub const MIN_GAP: Duration = Duration::from_millis(20);

/// Clamp a requested rate into `[1, 50]` Hz. Non-finite input falls back to the minimum.
pub fn clamp_rate_hz(hz: f64) -> f64 {
    if !hz.is_finite() {
        return MIN_RATE_HZ;
    }
    hz.clamp(MIN_RATE_HZ, MAX_RATE_HZ)
}

/// `max(20ms, round(1000 / clamp(hz)))`.
pub fn min_gap_for_hz(hz: f64) -> Duration {
    let ms = (1000.0 / clamp_rate_hz(hz)).round() as u64;
    Duration::from_millis(ms).max(MIN_GAP)
}
