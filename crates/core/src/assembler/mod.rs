//! The assembly engine.
//!
//! [`HevcAssembler`] pulls packets from a [`PacketSource`] and turns them
//! into access units for an [`AccessUnitSink`]. Each call consumes at most
//! one NAL unit's worth of packets and returns an [`AssemblyStatus`] telling
//! the caller whether to call again, wait for input, or wait for a missing
//! packet. [`HevcAssembler::on_packet_received`] wraps that loop.

pub mod access_unit;
mod depacketize;
pub mod keyframe;

use std::time::Instant;

use crate::config::AssemblerConfig;
use crate::error::{AssemblerError, AssemblyStatus, Result};
use crate::sink::{AccessUnit, AccessUnitSink, AssemblerEvent};
use crate::source::PacketSource;

pub use access_unit::{AccessUnitBuilder, NalUnit};
pub use keyframe::KeyframeGate;

/// Counters kept by one assembler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    pub access_units: u64,
    pub damaged_access_units: u64,
    pub malformed_packets: u64,
    pub dropped_inter_units: u64,
    pub lost_packets: u64,
    pub intra_requests: u64,
}

/// HEVC depacketizer for one RTP source.
#[derive(Debug)]
pub struct HevcAssembler<S: AccessUnitSink> {
    config: AssemblerConfig,
    sink: S,
    next_expected: Option<u16>,
    access_unit: AccessUnitBuilder,
    keyframes: KeyframeGate,
    /// When the receive loop first saw the current sequence mismatch.
    mismatch_since: Option<Instant>,
    stats: AssemblerStats,
}

impl<S: AccessUnitSink> HevcAssembler<S> {
    pub fn new(config: AssemblerConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            next_expected: None,
            access_unit: AccessUnitBuilder::new(),
            keyframes: KeyframeGate::new(),
            mismatch_since: None,
            stats: AssemblerStats::default(),
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// The sequence number the engine will consume next, once known.
    pub fn next_expected_seq(&self) -> Option<u16> {
        self.next_expected
    }

    pub fn keyframes(&self) -> &KeyframeGate {
        &self.keyframes
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Try to make progress on `source` using the current time.
    pub fn assemble_more<P: PacketSource>(&mut self, source: &mut P) -> AssemblyStatus {
        self.assemble_more_at(source, Instant::now())
    }

    /// Try to make progress on `source` as of `now`.
    ///
    /// A malformed packet escalates to an intra refresh request when no
    /// intra unit has been seen within the configured interval.
    pub fn assemble_more_at<P: PacketSource>(
        &mut self,
        source: &mut P,
        now: Instant,
    ) -> AssemblyStatus {
        let status = self.add_nal_unit(source, now);
        if status == AssemblyStatus::MalformedPacket {
            self.stats.malformed_packets += 1;
            let stale = self
                .keyframes
                .since_last_intra(now)
                .is_none_or(|elapsed| elapsed > self.config.intra_refresh_after);
            if stale {
                tracing::debug!("malformed packet without a recent intra frame, FIR issued");
                self.request_intra_refresh(source);
            }
        }
        status
    }

    /// Drive the engine after new packets arrived.
    pub fn on_packet_received<P: PacketSource>(&mut self, source: &mut P) -> AssemblyStatus {
        self.on_packet_received_at(source, Instant::now())
    }

    /// Assemble until the engine needs more input.
    ///
    /// A sequence mismatch is tolerated for the configured wait, measured
    /// from the first call that saw it. After that the expected packet is
    /// declared lost and assembly continues. Returns the status that
    /// stopped the loop.
    pub fn on_packet_received_at<P: PacketSource>(
        &mut self,
        source: &mut P,
        now: Instant,
    ) -> AssemblyStatus {
        loop {
            let status = self.assemble_more_at(source, now);
            match status {
                AssemblyStatus::Ok | AssemblyStatus::MalformedPacket => {
                    self.mismatch_since = None;
                }
                AssemblyStatus::InsufficientData => {
                    self.mismatch_since = None;
                    return status;
                }
                AssemblyStatus::SequenceMismatch => {
                    let since = *self.mismatch_since.get_or_insert(now);
                    if now.saturating_duration_since(since) < self.config.sequence_wait {
                        return status;
                    }
                    self.mismatch_since = None;
                    if let Err(e) = self.packet_lost() {
                        tracing::warn!(error = %e, "cannot declare packet lost");
                        return status;
                    }
                }
            }
        }
    }

    /// The transport gave up on the packet the cursor points at.
    pub fn packet_lost(&mut self) -> Result<()> {
        let Some(expected) = self.next_expected.as_mut() else {
            return Err(AssemblerError::NoExpectedSequence);
        };
        tracing::debug!(seq = *expected, "packet lost");
        *expected = expected.wrapping_add(1);
        self.stats.lost_packets += 1;
        self.access_unit.mark_damaged();
        Ok(())
    }

    /// The sender left. Any partial access unit stays pending; call
    /// [`flush`](Self::flush) first to keep it.
    pub fn on_bye(&mut self) {
        tracing::debug!(
            pending = self.access_unit.pending(),
            "BYE received, end of stream"
        );
        self.sink.emit(AssemblerEvent::EndOfStream);
    }

    /// Emit the pending access unit, if any.
    pub fn flush(&mut self) -> bool {
        match self.access_unit.take() {
            Some(au) => {
                self.emit_access_unit(au);
                true
            }
            None => false,
        }
    }

    fn emit_access_unit(&mut self, au: AccessUnit) {
        self.stats.access_units += 1;
        if au.damaged {
            self.stats.damaged_access_units += 1;
        }
        self.sink.emit(AssemblerEvent::AccessUnit(au));
    }

    fn request_intra_refresh<P: PacketSource>(&mut self, source: &mut P) {
        self.stats.intra_requests += 1;
        source.request_intra_refresh();
    }
}
