//! Adaptive sampling interval.

use std::time::Duration;

/// Speed above which a bus counts as moving fast (m/s).
pub const FAST_SPEED_MPS: f64 = 10.0;

/// Speed above which a bus counts as moving (m/s).
pub const SLOW_SPEED_MPS: f64 = 2.0;

pub const FAST_INTERVAL: Duration = Duration::from_millis(3000);
pub const SLOW_INTERVAL: Duration = Duration::from_millis(5000);
pub const STATIONARY_INTERVAL: Duration = Duration::from_millis(10_000);

/// Sampling interval for a reported speed.
///
/// Band edges are exclusive: exactly 10 m/s samples every 5s and exactly
/// 2 m/s every 10s.
pub fn interval_for_speed(speed_mps: f64) -> Duration {
    if speed_mps > FAST_SPEED_MPS {
        FAST_INTERVAL
    } else if speed_mps > SLOW_SPEED_MPS {
        SLOW_INTERVAL
    } else {
        STATIONARY_INTERVAL
    }
}
