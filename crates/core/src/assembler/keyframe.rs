use std::time::{Duration, Instant};

use super::access_unit::NalUnit;
use crate::media::h265::{NAL_SPS, is_inter, is_intra};
use crate::media::sps;

/// Holds back inter pictures until an intra picture has been seen for the
/// current resolution.
#[derive(Debug, Default)]
pub struct KeyframeGate {
    first_intra_seen: bool,
    last_intra_at: Option<Instant>,
    width: u32,
    height: u32,
}

impl KeyframeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a NAL unit. Returns `false` if it must be dropped.
    pub fn admit(&mut self, unit: &NalUnit, now: Instant) -> bool {
        let Some(nal_type) = unit.nal_type() else {
            return true;
        };

        if nal_type == NAL_SPS {
            self.check_dimensions(&unit.data);
        }

        if is_intra(nal_type) {
            self.last_intra_at = Some(now);
            if !self.first_intra_seen {
                self.first_intra_seen = true;
                tracing::debug!(
                    rtp_time = unit.rtp_time,
                    size = unit.data.len(),
                    "first intra frame to be decoded"
                );
            }
        }

        self.first_intra_seen || !is_inter(nal_type)
    }

    fn check_dimensions(&mut self, sps_nal: &[u8]) {
        let Some((width, height)) = sps::parse_dimensions(sps_nal) else {
            tracing::debug!(size = sps_nal.len(), "SPS dimensions unreadable");
            return;
        };
        if (width, height) != (self.width, self.height) {
            tracing::debug!(
                old = format_args!("{}x{}", self.width, self.height),
                new = format_args!("{}x{}", width, height),
                "new resolution"
            );
            self.first_intra_seen = false;
            self.width = width;
            self.height = height;
        }
    }

    pub fn first_intra_seen(&self) -> bool {
        self.first_intra_seen
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Time since the last intra unit, `None` if there never was one.
    pub fn since_last_intra(&self, now: Instant) -> Option<Duration> {
        self.last_intra_at
            .map(|at| now.saturating_duration_since(at))
    }
}
