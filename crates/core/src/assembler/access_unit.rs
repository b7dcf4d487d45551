use std::time::Instant;

use crate::media::h265::{START_CODE, nal_type};
use crate::packet::Packet;
use crate::sink::AccessUnit;

/// One NAL unit (2-byte header included) with the timing of the packet
/// that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub data: Vec<u8>,
    pub rtp_time: u32,
    pub arrival: Instant,
    pub orientation: Option<u8>,
}

impl NalUnit {
    /// A single-NAL packet's payload is the NAL unit itself.
    pub fn from_packet(packet: Packet) -> Self {
        Self {
            data: packet.payload,
            rtp_time: packet.rtp_time,
            arrival: packet.arrival,
            orientation: packet.orientation,
        }
    }

    /// A NAL unit carved out of `packet`, sharing its timing.
    pub fn with_timing_of(data: Vec<u8>, packet: &Packet) -> Self {
        Self {
            data,
            rtp_time: packet.rtp_time,
            arrival: packet.arrival,
            orientation: packet.orientation,
        }
    }

    pub fn nal_type(&self) -> Option<u8> {
        self.data.first().map(|&b| nal_type(b))
    }
}

/// Collects the NAL units of one RTP timestamp.
///
/// Never holds two timestamps: a unit with a new timestamp first flushes
/// whatever is pending.
#[derive(Debug, Default)]
pub struct AccessUnitBuilder {
    rtp_time: u32,
    units: Vec<NalUnit>,
    damaged: bool,
    /// Damage that also applies to the access unit after the pending one.
    carry_damage: bool,
}

impl AccessUnitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. Returns the previous access unit if this one starts a
    /// new timestamp.
    pub fn push(&mut self, unit: NalUnit) -> Option<AccessUnit> {
        let finished = if !self.units.is_empty() && unit.rtp_time != self.rtp_time {
            self.take()
        } else {
            None
        };
        self.rtp_time = unit.rtp_time;
        self.units.push(unit);
        finished
    }

    /// Flag the pending access unit as assembled across a loss.
    ///
    /// A lost packet may belong to the pending timestamp or to the next
    /// one, so when units are pending the following access unit is flagged
    /// as well.
    pub fn mark_damaged(&mut self) {
        self.damaged = true;
        if !self.units.is_empty() {
            self.carry_damage = true;
        }
    }

    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    pub fn pending(&self) -> usize {
        self.units.len()
    }

    /// Build the pending access unit and reset. `None` if nothing is pending.
    pub fn take(&mut self) -> Option<AccessUnit> {
        let first = self.units.first()?;
        let rtp_time = first.rtp_time;
        let arrival = first.arrival;
        let orientation = self.units.iter().find_map(|u| u.orientation);

        let total: usize = self.units.iter().map(|u| START_CODE.len() + u.data.len()).sum();
        let mut data = Vec::with_capacity(total);
        for unit in &self.units {
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(&unit.data);
        }

        tracing::trace!(
            nal_units = self.units.len(),
            bytes = data.len(),
            rtp_time,
            damaged = self.damaged,
            "access unit complete"
        );

        let carried = std::mem::take(&mut self.carry_damage);
        let damaged = std::mem::replace(&mut self.damaged, carried);
        self.units.clear();

        Some(AccessUnit {
            data,
            rtp_time,
            arrival,
            orientation,
            damaged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ts: u32, body: u8) -> NalUnit {
        NalUnit {
            data: vec![0x02, 0x01, body],
            rtp_time: ts,
            arrival: Instant::now(),
            orientation: None,
        }
    }

    #[test]
    fn timestamp_change_flushes() {
        let mut b = AccessUnitBuilder::new();
        assert!(b.push(unit(100, 1)).is_none());
        assert!(b.push(unit(100, 2)).is_none());
        assert!(b.push(unit(100, 3)).is_none());

        let au = b.push(unit(101, 4)).unwrap();
        assert_eq!(au.rtp_time, 100);
        assert_eq!(
            au.data,
            vec![
                0, 0, 0, 1, 0x02, 0x01, 1, //
                0, 0, 0, 1, 0x02, 0x01, 2, //
                0, 0, 0, 1, 0x02, 0x01, 3,
            ]
        );
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn damage_spans_pending_and_next_unit() {
        let mut b = AccessUnitBuilder::new();
        b.push(unit(1, 0));
        b.mark_damaged();
        let au = b.push(unit(2, 0)).unwrap();
        assert!(au.damaged);
        assert!(b.is_damaged());

        assert!(b.push(unit(3, 0)).unwrap().damaged);
        assert!(!b.take().unwrap().damaged);
        assert!(b.take().is_none());
    }

    #[test]
    fn damage_before_first_unit_stays_local() {
        let mut b = AccessUnitBuilder::new();
        b.mark_damaged();
        b.push(unit(1, 0));
        assert!(b.push(unit(2, 0)).unwrap().damaged);
        assert!(!b.take().unwrap().damaged);
    }

    #[test]
    fn orientation_from_first_carrier() {
        let mut b = AccessUnitBuilder::new();
        b.push(unit(1, 0));
        let mut second = unit(1, 1);
        second.orientation = Some(3);
        b.push(second);
        let mut third = unit(1, 2);
        third.orientation = Some(1);
        b.push(third);
        assert_eq!(b.take().unwrap().orientation, Some(3));
    }
}
