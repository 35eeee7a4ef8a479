// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Adaptive sampling interval.
//!
//! The poll interval shrinks along a downward-opening parabola as the
//! temperature rate of change grows, reaching the fastest cadence (1 s) at
//! the warning rate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fastest allowed cadence, in seconds.
pub const MIN_INTERVAL_SECS: f64 = 1.0;

/// Slowest cadence the loop will ever sleep, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;

/// Default slowest cadence, in seconds.
pub const DEFAULT_MAX_INTERVAL_SECS: f64 = 10.0;

/// Default warning rate, in ºC per second.
pub const DEFAULT_WARN_RATE: f64 = 1.0;

/// Sampling parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SamplingPolicy {
    /// Interval used when the temperature is steady, in seconds.
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: f64,

    /// Rate of change (ºC/s) at or above which the fastest cadence is used.
    #[serde(default = "default_warn_rate")]
    pub warn_rate: f64,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS,
            warn_rate: DEFAULT_WARN_RATE,
        }
    }
}

impl SamplingPolicy {
    pub fn next_interval(&self, prev_temp: i32, curr_temp: i32, prev_interval: f64) -> f64 {
        next_interval(
            prev_temp,
            curr_temp,
            prev_interval,
            self.max_interval_secs,
            self.warn_rate,
        )
    }
}

/// Next poll interval in seconds.
///
/// `rate = |curr - prev| / max(prev_interval, 1)`; at or above `warn_rate`
/// the result is 1, otherwise
/// `max(max_interval + ((1 - max_interval) / warn_rate) * rate², 1)`.
pub fn next_interval(
    prev_temp: i32,
    curr_temp: i32,
    prev_interval: f64,
    max_interval: f64,
    warn_rate: f64,
) -> f64 {
    let delta = (curr_temp as f64 - prev_temp as f64).abs();
    let rate = delta / prev_interval.max(MIN_INTERVAL_SECS);
    if rate >= warn_rate {
        return MIN_INTERVAL_SECS;
    }

    let interval = max_interval + ((1.0 - max_interval) / warn_rate) * rate * rate;
    interval.max(MIN_INTERVAL_SECS)
}

/// Convert an interval in seconds into a sleep duration, bounded to
/// `MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS`. Non-finite input sleeps the maximum.
pub fn to_duration(interval_secs: f64) -> Duration {
    let bounded = interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);
    Duration::try_from_secs_f64(bounded).unwrap_or(Duration::from_secs(MAX_INTERVAL_SECS as u64))
}

fn default_max_interval() -> f64 {
    DEFAULT_MAX_INTERVAL_SECS
}

fn default_warn_rate() -> f64 {
    DEFAULT_WARN_RATE
}
