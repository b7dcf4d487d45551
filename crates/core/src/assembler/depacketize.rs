//! Payload dispatch: single NAL, aggregation and fragmentation packets.

use std::time::Instant;

use super::HevcAssembler;
use super::access_unit::NalUnit;
use crate::error::{AssemblerError, AssemblyStatus, Result};
use crate::gap;
use crate::jitter::{JitterWindow, Lateness, rtp_to_ms};
use crate::media::h265::{
    FU_HEADER_LEN, FuHeader, NAL_AP, NAL_FU, NAL_PACI, is_inter, nal_type, split_aggregation,
};
use crate::nack;
use crate::packet::{Packet, PacketQueue, seq_diff};
use crate::sink::AccessUnitSink;
use crate::source::PacketSource;

/// Result of walking the queue from an FU start fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FragmentScan {
    /// The end fragment has not arrived yet.
    Incomplete,
    /// `count` queued packets form the unit, ending at `last_seq`.
    /// `salvaged` is set when holes were tolerated.
    Complete {
        count: usize,
        last_seq: u16,
        salvaged: bool,
    },
    /// A hole in an intra unit; wait for the missing fragment.
    Gap,
    /// A packet cannot continue this run. `seq` is the slot the run
    /// expected next; on an inter run with a hole that is the missing
    /// packet, so the offending packet stays queued.
    Mismatch { seq: u16 },
    /// An inter unit with too few connected fragments to keep.
    Unsalvageable { last_seq: u16 },
}

/// Walk the fragments of the FU run starting at the queue head.
pub(crate) fn scan_fragments(queue: &PacketQueue, start: FuHeader, salvage_ratio: f64) -> FragmentScan {
    let Some(first) = queue.front() else {
        return FragmentScan::Incomplete;
    };
    if start.end {
        return FragmentScan::Complete {
            count: 1,
            last_seq: first.seq,
            salvaged: false,
        };
    }

    let inter = is_inter(start.nal_type);
    let mut expected = first.seq.wrapping_add(1);
    let mut count = 1usize;
    let mut connected = 1usize;
    let mut snapped = false;

    for packet in queue.iter().skip(1) {
        if packet.seq != expected {
            tracing::trace!(
                expected,
                got = packet.seq,
                nal_type = start.nal_type,
                "fragment sequence not complete"
            );
            snapped = true;
            if !inter {
                return FragmentScan::Gap;
            }
        }
        if !snapped {
            connected += 1;
        }

        let continues = FuHeader::parse(&packet.payload).is_some_and(|fu| {
            fu.nal_type == start.nal_type && fu.tid == start.tid && !fu.start
        }) && packet.rtp_time == first.rtp_time;
        if !continues {
            return FragmentScan::Mismatch { seq: expected };
        }

        count += 1;
        expected = packet.seq.wrapping_add(1);

        if FuHeader::parse(&packet.payload).is_some_and(|fu| fu.end) {
            let span = seq_diff(first.seq, expected).max(1) as f64;
            let ratio = connected as f64 / span;
            tracing::trace!(count, connected, span, ratio, "fragment run complete");
            if snapped && ratio < salvage_ratio {
                return FragmentScan::Unsalvageable {
                    last_seq: packet.seq,
                };
            }
            return FragmentScan::Complete {
                count,
                last_seq: packet.seq,
                salvaged: snapped,
            };
        }
    }

    FragmentScan::Incomplete
}

impl<S: AccessUnitSink> HevcAssembler<S> {
    /// Run the jitter window, NACK scan and gap handling, then consume the
    /// queue head if it is the packet the cursor expects.
    pub(super) fn add_nal_unit<P: PacketSource>(
        &mut self,
        source: &mut P,
        now: Instant,
    ) -> AssemblyStatus {
        let (Some(head), Some((first_rtp_time, first_arrival))) =
            (source.queue().front(), source.timing_origin())
        else {
            return AssemblyStatus::InsufficientData;
        };
        let head_seq = head.seq;
        let head_rtp_time = head.rtp_time;

        let static_ms = source.static_jitter_ms();
        let dynamic_ms = source.dynamic_jitter_ms();
        let clock_rate = source.clock_rate();
        let window = JitterWindow::new(
            now,
            first_arrival,
            clock_rate,
            static_ms,
            dynamic_ms,
            self.config.dynamic_jitter_cap,
            self.config.late_margin_multiplier,
        );
        let head_rtp = window.unwrap_rtp_time(first_rtp_time, head_rtp_time);

        nack::add_nack(source);

        match window.classify(head_rtp) {
            Lateness::Buffering => {
                tracing::trace!(seq = head_seq, "buffering in jitter buffer");
                return AssemblyStatus::InsufficientData;
            }
            Lateness::OnTime => {}
            Lateness::Late => {
                tracing::warn!(
                    seq = head_seq,
                    static_ms,
                    dynamic_ms,
                    tolerance_ms = rtp_to_ms(window.tolerance, clock_rate),
                    "packet arrived after its jitter tolerance"
                );
            }
            Lateness::TooLate => {
                let resync = gap::pick_proper_seq(source.queue(), first_rtp_time, &window);
                tracing::warn!(
                    seq = head_seq,
                    expected = ?self.next_expected,
                    resync = ?resync,
                    overshoot_ms = rtp_to_ms(window.overshoot(head_rtp), clock_rate),
                    static_ms,
                    dynamic_ms,
                    multiplier = self.config.late_margin_multiplier,
                    "packet too late, resynchronising"
                );
                let skipped = resync != Some(head_seq)
                    || self.next_expected.is_some_and(|e| e != head_seq);
                if resync.is_some() {
                    self.next_expected = resync;
                }
                if skipped {
                    self.access_unit.mark_damaged();
                }
            }
        }

        if let Some(expected) = self.next_expected {
            let size = source.queue().len();
            let removed = gap::delete_unit_under_seq(source.queue_mut(), expected);
            if removed > 0 {
                source.report_abandoned(removed);
                tracing::warn!(removed, queued = size, expected, "stale packets discarded");
            }
        }

        let Some(head) = source.queue().front() else {
            return AssemblyStatus::InsufficientData;
        };
        let head_seq = head.seq;

        match self.next_expected {
            None => self.next_expected = Some(head_seq),
            Some(expected) if expected != head_seq => {
                tracing::trace!(expected, got = head_seq, "not the sequence number expected");
                return AssemblyStatus::SequenceMismatch;
            }
            Some(_) => {}
        }

        let Some(&first_byte) = head.payload.first() else {
            tracing::trace!(seq = head_seq, "ignoring empty payload");
            self.discard_head(source);
            return AssemblyStatus::MalformedPacket;
        };
        if first_byte & 0x80 != 0 {
            tracing::trace!(seq = head_seq, "ignoring payload with forbidden bit set");
            self.discard_head(source);
            return AssemblyStatus::MalformedPacket;
        }

        match nal_type(first_byte) {
            0 => {
                tracing::trace!(seq = head_seq, "ignoring undefined NAL type");
                self.discard_head(source);
                AssemblyStatus::Ok
            }
            t if t < NAL_AP => {
                let Some(packet) = self.take_head(source) else {
                    return AssemblyStatus::InsufficientData;
                };
                self.add_single_nal_unit(source, NalUnit::from_packet(packet), now);
                AssemblyStatus::Ok
            }
            NAL_AP => {
                let Some(packet) = self.take_head(source) else {
                    return AssemblyStatus::InsufficientData;
                };
                if self.add_aggregation_packet(source, &packet, now) {
                    AssemblyStatus::Ok
                } else {
                    AssemblyStatus::MalformedPacket
                }
            }
            NAL_FU => match self.add_fragmented_nal_unit(source, now) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(error = %e, "fragment reassembly aborted");
                    AssemblyStatus::InsufficientData
                }
            },
            NAL_PACI => {
                tracing::trace!(seq = head_seq, "ignoring payload content information packet");
                self.discard_head(source);
                AssemblyStatus::MalformedPacket
            }
            t => {
                tracing::trace!(seq = head_seq, nal_type = t, "ignoring unsupported payload");
                self.discard_head(source);
                AssemblyStatus::MalformedPacket
            }
        }
    }

    /// Route one NAL unit through the keyframe gate into the access unit.
    fn add_single_nal_unit<P: PacketSource>(
        &mut self,
        source: &mut P,
        unit: NalUnit,
        now: Instant,
    ) {
        tracing::trace!(
            size = unit.data.len(),
            nal_type = ?unit.nal_type(),
            rtp_time = unit.rtp_time,
            "single NAL unit"
        );

        if !self.keyframes.admit(&unit, now) {
            tracing::debug!(
                rtp_time = unit.rtp_time,
                "dropping inter frames until an intra frame arrives, FIR issued"
            );
            self.stats.dropped_inter_units += 1;
            self.request_intra_refresh(source);
            return;
        }

        if let Some(au) = self.access_unit.push(unit) {
            self.emit_access_unit(au);
        }
    }

    /// All-or-nothing: a malformed record rejects the whole packet.
    fn add_aggregation_packet<P: PacketSource>(
        &mut self,
        source: &mut P,
        packet: &Packet,
        now: Instant,
    ) -> bool {
        let Some(records) = split_aggregation(&packet.payload) else {
            tracing::debug!(
                seq = packet.seq,
                size = packet.payload.len(),
                "discarding malformed aggregation packet"
            );
            return false;
        };
        let units: Vec<NalUnit> = records
            .into_iter()
            .map(|nal| NalUnit::with_timing_of(nal.to_vec(), packet))
            .collect();
        for unit in units {
            self.add_single_nal_unit(source, unit, now);
        }
        true
    }

    fn add_fragmented_nal_unit<P: PacketSource>(
        &mut self,
        source: &mut P,
        now: Instant,
    ) -> Result<AssemblyStatus> {
        let first = source.queue().front().ok_or(AssemblerError::EmptyQueue)?;

        let Some(start) = FuHeader::parse(&first.payload) else {
            tracing::trace!(size = first.payload.len(), "ignoring malformed FU packet");
            self.discard_head(source);
            return Ok(AssemblyStatus::MalformedPacket);
        };
        if !start.start {
            tracing::trace!(seq = first.seq, "start bit not set on first fragment");
            self.discard_head(source);
            return Ok(AssemblyStatus::MalformedPacket);
        }

        match scan_fragments(source.queue(), start, self.config.salvage_ratio) {
            FragmentScan::Incomplete => Ok(AssemblyStatus::InsufficientData),
            FragmentScan::Gap => Ok(AssemblyStatus::SequenceMismatch),
            FragmentScan::Mismatch { seq } => {
                tracing::trace!(seq, "ignoring malformed FU run");
                self.access_unit.mark_damaged();
                self.discard_through(source, seq);
                Ok(AssemblyStatus::MalformedPacket)
            }
            FragmentScan::Unsalvageable { last_seq } => {
                tracing::debug!(last_seq, "too many fragments lost, dropping inter unit");
                self.access_unit.mark_damaged();
                self.discard_through(source, last_seq);
                Ok(AssemblyStatus::MalformedPacket)
            }
            FragmentScan::Complete {
                count,
                last_seq,
                salvaged,
            } => {
                self.next_expected = Some(last_seq.wrapping_add(1));

                let fragments = source.queue_mut().take_front(count);
                let body_len: usize = fragments
                    .iter()
                    .map(|p| p.payload.len() - FU_HEADER_LEN)
                    .sum();
                let mut data = Vec::with_capacity(2 + body_len);
                data.extend_from_slice(&start.nal_header());
                for fragment in &fragments {
                    data.extend_from_slice(&fragment.payload[FU_HEADER_LEN..]);
                }

                let Some(head) = fragments.first() else {
                    return Err(AssemblerError::EmptyQueue);
                };
                let mut unit = NalUnit::with_timing_of(data, head);
                unit.orientation = fragments.iter().rev().find_map(|p| p.orientation);

                if salvaged {
                    tracing::debug!(last_seq, count, "inter unit salvaged across a gap");
                    self.access_unit.mark_damaged();
                }
                tracing::trace!(
                    fragments = count,
                    size = unit.data.len(),
                    "assembled a NAL unit from fragments"
                );

                self.add_single_nal_unit(source, unit, now);
                Ok(AssemblyStatus::Ok)
            }
        }
    }

    fn take_head<P: PacketSource>(&mut self, source: &mut P) -> Option<Packet> {
        let packet = source.queue_mut().pop_front()?;
        self.advance_cursor();
        Some(packet)
    }

    fn discard_head<P: PacketSource>(&mut self, source: &mut P) {
        self.take_head(source);
    }

    /// Drop the queue up to and including `seq` and move the cursor past it.
    fn discard_through<P: PacketSource>(&mut self, source: &mut P, seq: u16) {
        let next = seq.wrapping_add(1);
        self.next_expected = Some(next);
        let removed = gap::delete_unit_under_seq(source.queue_mut(), next);
        if removed > 0 {
            source.report_abandoned(removed);
        }
    }

    fn advance_cursor(&mut self) {
        if let Some(seq) = self.next_expected.as_mut() {
            *seq = seq.wrapping_add(1);
        }
    }
}
