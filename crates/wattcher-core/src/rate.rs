//! Pulse-rate state and the power computation.
//!
//! One pulse is one rotation of the meter disc. With a meter constant of
//! [`METER_C_VALUE`] rotations per kWh, the gap between two pulses gives
//! the instantaneous power draw:
//!
//! ```text
//! rot/h = 1 hour / gap
//! kW    = rot/h / c_value
//! W     = 1000 * rot/h / c_value
//! ```
//!
//! All arithmetic is integer with truncation at each step, multiplying
//! before the final divide, matching the meter's fixed-point derivation.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{RateError, RateResult};

/// Meter calibration constant: disc rotations per kWh.
pub const METER_C_VALUE: u64 = 600;

/// Microseconds per hour, numerator of the rotations-per-hour step.
const MICROS_PER_HOUR: u64 = 3_600_000_000;

/// Computes instantaneous power in watts from the gap between two pulses.
///
/// The gap is truncated to whole microseconds. A gap below one microsecond
/// cannot be converted (the division would be by zero) and yields
/// [`RateError::GapTooShort`].
pub fn watts_from_gap(gap: Duration) -> RateResult<u64> {
    let micros = u64::try_from(gap.as_micros()).unwrap_or(u64::MAX);
    if micros == 0 {
        return Err(RateError::GapTooShort);
    }
    Ok(MICROS_PER_HOUR / micros * 1000 / METER_C_VALUE)
}

/// Mutable pulse-rate record, owned by the daemon's dispatch loop.
///
/// Only [`RateState::record_pulse`] mutates it; queries go through
/// [`RateState::reading_at`], which never writes.
#[derive(Debug, Default)]
pub struct RateState {
    /// Edges observed since startup. Never decremented or reset.
    pulse_count: u64,

    /// Timestamp of the most recent edge; `None` until the first one.
    last_pulse: Option<Instant>,

    /// Last computed power; stays zero until two edges have been seen.
    watts: u64,
}

impl RateState {
    /// Creates a zeroed state: no pulses, no timestamp, no rate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges observed since startup.
    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }

    /// Timestamp of the most recent edge, if any.
    pub fn last_pulse(&self) -> Option<Instant> {
        self.last_pulse
    }

    /// Last computed power in watts; zero until two edges have been seen.
    pub fn watts(&self) -> u64 {
        self.watts
    }

    /// Records one detected edge at `now`.
    ///
    /// The first edge only establishes the reference timestamp; every
    /// later edge derives the power from the gap to the previous one. A
    /// gap too short to measure leaves the previous power in place - the
    /// counter still advances and the timestamp still moves forward.
    pub fn record_pulse(&mut self, now: Instant) {
        if let Some(last) = self.last_pulse {
            match watts_from_gap(now.duration_since(last)) {
                Ok(watts) => self.watts = watts,
                Err(RateError::GapTooShort) => {
                    debug!(
                        pulse = self.pulse_count + 1,
                        "pulse gap below timer resolution, keeping previous rate"
                    );
                }
            }
        }
        self.pulse_count += 1;
        self.last_pulse = Some(now);
    }

    /// Builds the snapshot served to one query, without mutating state.
    ///
    /// The stored power only changes when an edge arrives, so between
    /// pulses it can overstate current draw. A live estimate from the
    /// time since the last edge catches that: when it falls below the
    /// stored value, the reading reports the live figure and flags it as
    /// decelerating. The comparison is against the last stored rate, not
    /// against any earlier live estimate.
    pub fn reading_at(&self, now: Instant) -> Reading {
        if let Some(last) = self.last_pulse {
            if let Ok(live) = watts_from_gap(now.duration_since(last)) {
                if live < self.watts {
                    return Reading {
                        pulses: self.pulse_count,
                        watts: live,
                        decelerating: true,
                    };
                }
            }
        }

        Reading {
            pulses: self.pulse_count,
            watts: self.watts,
            decelerating: false,
        }
    }
}

/// Immutable snapshot answered to one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    /// Edges seen since daemon start.
    pub pulses: u64,

    /// Power estimate in watts.
    pub watts: u64,

    /// True when consumption has slowed since the last edge.
    pub decelerating: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(n: u64) -> Duration {
        Duration::from_micros(n)
    }

    #[test]
    fn test_watts_formula_truncates_at_each_step() {
        // 6 s gap: 3_600_000_000 / 6_000_000 = 600 rot/h
        // 600 * 1000 / 600 = 1000 W
        assert_eq!(watts_from_gap(micros(6_000_000)).unwrap(), 1000);

        // 1 s gap: 3600 rot/h -> 6000 W
        assert_eq!(watts_from_gap(micros(1_000_000)).unwrap(), 6000);

        // 7 s gap: 3_600_000_000 / 7_000_000 = 514 (truncated)
        // 514 * 1000 / 600 = 856 (truncated)
        assert_eq!(watts_from_gap(micros(7_000_000)).unwrap(), 856);

        // Gap longer than an hour truncates the rot/h step to zero.
        assert_eq!(watts_from_gap(micros(3_600_000_001)).unwrap(), 0);
    }

    #[test]
    fn test_watts_minimum_gap() {
        // One microsecond is the fastest measurable pulse train.
        assert_eq!(
            watts_from_gap(micros(1)).unwrap(),
            3_600_000_000 * 1000 / METER_C_VALUE
        );
    }

    #[test]
    fn test_watts_zero_gap_is_an_error() {
        assert_eq!(watts_from_gap(micros(0)), Err(RateError::GapTooShort));
        // Sub-microsecond gaps truncate to zero microseconds.
        assert_eq!(
            watts_from_gap(Duration::from_nanos(999)),
            Err(RateError::GapTooShort)
        );
    }

    #[test]
    fn test_first_pulse_sets_timestamp_but_no_rate() {
        let mut state = RateState::new();
        let t1 = Instant::now();

        state.record_pulse(t1);

        assert_eq!(state.pulse_count(), 1);
        assert_eq!(state.last_pulse(), Some(t1));
        assert_eq!(state.watts(), 0);
    }

    #[test]
    fn test_second_pulse_computes_rate() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);

        state.record_pulse(t1);
        state.record_pulse(t2);

        assert_eq!(state.pulse_count(), 2);
        assert_eq!(state.last_pulse(), Some(t2));
        assert_eq!(state.watts(), 1000);
    }

    #[test]
    fn test_zero_gap_pulse_keeps_previous_rate() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);

        state.record_pulse(t1);
        state.record_pulse(t2);
        state.record_pulse(t2); // same instant: no derivable rate

        assert_eq!(state.pulse_count(), 3);
        assert_eq!(state.watts(), 1000);
        assert_eq!(state.last_pulse(), Some(t2));
    }

    #[test]
    fn test_pulse_count_is_monotonic() {
        let mut state = RateState::new();
        let t1 = Instant::now();

        for i in 0..10 {
            state.record_pulse(t1 + micros(i * 1_000_000));
            assert_eq!(state.pulse_count(), i + 1);
        }
    }

    #[test]
    fn test_reading_before_any_pulse() {
        let state = RateState::new();
        let reading = state.reading_at(Instant::now());

        assert_eq!(reading.pulses, 0);
        assert_eq!(reading.watts, 0);
        assert!(!reading.decelerating);
    }

    #[test]
    fn test_reading_after_one_pulse_is_unmarked() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        state.record_pulse(t1);

        // A live estimate exists but there is no stored rate below it.
        let reading = state.reading_at(t1 + micros(2_000_000));

        assert_eq!(reading.pulses, 1);
        assert_eq!(reading.watts, 0);
        assert!(!reading.decelerating);
    }

    #[test]
    fn test_reading_reports_stored_rate_when_steady() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);
        state.record_pulse(t1);
        state.record_pulse(t2);

        // Queried shortly after the edge: live estimate is far above the
        // stored rate, so the stored value is reported unmarked.
        let reading = state.reading_at(t2 + micros(1_000_000));

        assert_eq!(reading.pulses, 2);
        assert_eq!(reading.watts, 1000);
        assert!(!reading.decelerating);
    }

    #[test]
    fn test_reading_flags_deceleration_with_live_value() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);
        state.record_pulse(t1);
        state.record_pulse(t2);

        // Twice the previous gap has elapsed with no new edge: the live
        // estimate halves and is reported, marked.
        let reading = state.reading_at(t2 + micros(12_000_000));

        assert_eq!(reading.pulses, 2);
        assert_eq!(reading.watts, 500);
        assert!(reading.decelerating);
    }

    #[test]
    fn test_reading_does_not_mutate_state() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);
        state.record_pulse(t1);
        state.record_pulse(t2);

        let _ = state.reading_at(t2 + micros(12_000_000));

        assert_eq!(state.pulse_count(), 2);
        assert_eq!(state.watts(), 1000);
        assert_eq!(state.last_pulse(), Some(t2));
    }

    #[test]
    fn test_reading_zero_gap_query_is_unmarked() {
        let mut state = RateState::new();
        let t1 = Instant::now();
        let t2 = t1 + micros(6_000_000);
        state.record_pulse(t1);
        state.record_pulse(t2);

        // Querying at the exact instant of the last edge: the live
        // estimate is unavailable, the stored rate stands.
        let reading = state.reading_at(t2);

        assert_eq!(reading.watts, 1000);
        assert!(!reading.decelerating);
    }
}
