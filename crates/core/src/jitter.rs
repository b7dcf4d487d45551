//! Jitter buffer timing.
//!
//! Two pieces live here:
//!
//! - [`JitterEstimator`]: the RFC 3550 §6.4.1 inter-arrival jitter estimate
//!   a packet source reports as its dynamic jitter.
//! - [`JitterWindow`]: decides whether the queue head may be released yet,
//!   and how late it is if the release is overdue.
//!
//! All release arithmetic is done in RTP clock units, relative to the
//! source's first RTP timestamp.

use std::time::{Duration, Instant};

/// Convert milliseconds to RTP clock units.
pub fn ms_to_rtp(ms: i64, clock_rate: u32) -> i64 {
    ms * clock_rate as i64 / 1000
}

/// Convert RTP clock units to milliseconds.
pub fn rtp_to_ms(rtp: i64, clock_rate: u32) -> i64 {
    if clock_rate == 0 {
        return 0;
    }
    rtp * 1000 / clock_rate as i64
}

/// Signed distance from `first_rtp_time` to `rtp_time`, valid while the
/// two are less than 2^31 ticks apart.
pub fn relative_rtp_time(first_rtp_time: u32, rtp_time: u32) -> i64 {
    rtp_time.wrapping_sub(first_rtp_time) as i32 as i64
}

/// Running inter-arrival jitter estimate (RFC 3550 §6.4.1).
///
/// `J += (|D| - J) / 16`, where `D` compares the RTP timestamp spacing of
/// two consecutive packets with their arrival spacing.
#[derive(Debug)]
pub struct JitterEstimator {
    clock_rate: u32,
    jitter_us: u64,
    last: Option<(u32, Instant)>,
}

impl JitterEstimator {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            jitter_us: 0,
            last: None,
        }
    }

    /// Feed one packet's RTP timestamp and arrival instant.
    pub fn update(&mut self, rtp_time: u32, arrival: Instant) {
        let Some((last_rtp, last_arrival)) = self.last.replace((rtp_time, arrival)) else {
            return;
        };
        if self.clock_rate == 0 {
            return;
        }

        let rtp_delta = relative_rtp_time(last_rtp, rtp_time).unsigned_abs();
        let ts_delta_us = rtp_delta * 1_000_000 / self.clock_rate as u64;
        let arrival_delta_us = if arrival >= last_arrival {
            arrival.duration_since(last_arrival)
        } else {
            last_arrival.duration_since(arrival)
        }
        .as_micros() as u64;

        let d = ts_delta_us.abs_diff(arrival_delta_us);
        self.jitter_us = (self.jitter_us * 15 + d) / 16;

        tracing::trace!(
            ts_delta_us,
            arrival_delta_us,
            jitter_us = self.jitter_us,
            "jitter sample"
        );
    }

    pub fn jitter_ms(&self) -> u32 {
        (self.jitter_us / 1000) as u32
    }
}

/// How the queue head relates to its release deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lateness {
    /// Still inside the jitter window; keep buffering.
    Buffering,
    /// Due, within tolerance.
    OnTime,
    /// Overshot its deadline by more than the jitter tolerance. Worth a
    /// warning, processed normally.
    Late,
    /// Overshot by more than tolerance plus the safety margin. The
    /// cursor must be resynchronised.
    TooLate,
}

/// Jitter window evaluated at one instant, in RTP clock units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    /// Stream time elapsed since the first packet arrived.
    pub played: i64,
    /// `static + min(dynamic, cap)`.
    pub tolerance: i64,
    /// Extra slack past `tolerance` before a packet counts as too late.
    pub margin: i64,
}

impl JitterWindow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now: Instant,
        first_arrival: Instant,
        clock_rate: u32,
        static_jitter_ms: u32,
        dynamic_jitter_ms: u32,
        dynamic_cap: Duration,
        margin_multiplier: f64,
    ) -> Self {
        let played_ms = now.saturating_duration_since(first_arrival).as_millis() as i64;
        let base = ms_to_rtp(static_jitter_ms as i64, clock_rate);
        let dynamic = ms_to_rtp(dynamic_jitter_ms as i64, clock_rate)
            .min(ms_to_rtp(dynamic_cap.as_millis() as i64, clock_rate));

        Self {
            played: ms_to_rtp(played_ms, clock_rate),
            tolerance: base + dynamic,
            margin: (dynamic as f64 * margin_multiplier) as i64,
        }
    }

    /// Position of `rtp_time` relative to `first_rtp_time`, unwrapped
    /// around the play position so streams longer than half the 32-bit
    /// timestamp range keep their ordering.
    pub fn unwrap_rtp_time(&self, first_rtp_time: u32, rtp_time: u32) -> i64 {
        let anchor = first_rtp_time.wrapping_add(self.played as u32);
        self.played + rtp_time.wrapping_sub(anchor) as i32 as i64
    }

    /// How far past its deadline a packet at relative time `rtp_time` is.
    /// Negative while still buffering.
    pub fn overshoot(&self, rtp_time: i64) -> i64 {
        self.played - (rtp_time + self.tolerance)
    }

    pub fn classify(&self, rtp_time: i64) -> Lateness {
        let diff = self.overshoot(rtp_time);
        if diff < 0 {
            Lateness::Buffering
        } else if diff > self.tolerance + self.margin {
            Lateness::TooLate
        } else if diff > self.tolerance {
            Lateness::Late
        } else {
            Lateness::OnTime
        }
    }

    /// Whether a packet at `rtp_time` can still be played in time.
    pub fn is_salvageable(&self, rtp_time: i64) -> bool {
        rtp_time + self.tolerance >= self.played
    }
}
