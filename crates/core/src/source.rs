//! Packet source contract and the in-memory reference source.
//!
//! The assembler never receives packets itself. It works on a
//! [`PacketSource`]: the queue of packets received for one SSRC, the timing
//! metadata recorded while receiving them, and a feedback path back to the
//! sender (NACK, FIR).

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::jitter::JitterEstimator;
use crate::media::rtp::RtpView;
use crate::packet::{Packet, PacketQueue};

/// Everything the assembler reads from and writes to a stream source.
pub trait PacketSource {
    fn queue(&self) -> &PacketQueue;

    fn queue_mut(&mut self) -> &mut PacketQueue;

    /// RTP timestamp and arrival instant of the first packet received.
    /// `None` until a packet has arrived.
    fn timing_origin(&self) -> Option<(u32, Instant)>;

    fn clock_rate(&self) -> u32;

    /// Target buffering delay.
    fn static_jitter_ms(&self) -> u32;

    /// Current inter-arrival jitter estimate.
    fn dynamic_jitter_ms(&self) -> u32;

    /// Last sequence number covered by a retransmission request.
    fn highest_nack(&self) -> Option<u16>;

    fn set_highest_nack(&mut self, seq: Option<u16>);

    /// Ask the sender to retransmit `start_seq` and every slot set in `mask`
    /// (bit `i` is `start_seq + 1 + i`). `head_seq` is the queue head at
    /// the time of the request.
    fn request_retransmission(&mut self, start_seq: u16, mask: u16, head_seq: u16);

    /// `count` queued packets were discarded without being assembled.
    fn report_abandoned(&mut self, count: usize);

    /// Ask the sender for a fresh intra picture.
    fn request_intra_refresh(&mut self);
}

/// A request the transport layer should turn into RTCP feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// Generic NACK (RFC 4585 §6.2.1).
    Nack { start: u16, mask: u16, head: u16 },
    /// Full intra request (RFC 5104 §4.3.1).
    IntraRefresh,
}

/// In-memory [`PacketSource`] fed by the transport layer.
///
/// Orders incoming packets, records the timing origin, estimates jitter,
/// and queues feedback for the transport to send.
#[derive(Debug)]
pub struct RtpSource {
    ssrc: u32,
    config: SourceConfig,
    queue: PacketQueue,
    origin: Option<(u32, Instant)>,
    first_seq: Option<u16>,
    jitter: JitterEstimator,
    highest_nack: Option<u16>,
    abandoned: u64,
    duplicates: u64,
    feedback: VecDeque<Feedback>,
}

impl RtpSource {
    pub fn new(ssrc: u32, config: SourceConfig) -> Self {
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            clock_rate = config.clock_rate,
            static_jitter_ms = config.static_jitter_ms,
            "RTP source created"
        );
        Self {
            ssrc,
            jitter: JitterEstimator::new(config.clock_rate),
            config,
            queue: PacketQueue::new(),
            origin: None,
            first_seq: None,
            highest_nack: None,
            abandoned: 0,
            duplicates: 0,
            feedback: VecDeque::new(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn first_seq(&self) -> Option<u16> {
        self.first_seq
    }

    /// Queue a received packet. Duplicates are counted and dropped.
    pub fn push(&mut self, packet: Packet) {
        if self.origin.is_none() {
            self.origin = Some((packet.rtp_time, packet.arrival));
            self.first_seq = Some(packet.seq);
            tracing::debug!(
                ssrc = format_args!("{:#010X}", self.ssrc),
                seq = packet.seq,
                rtp_time = packet.rtp_time,
                "first packet received"
            );
        }
        self.jitter.update(packet.rtp_time, packet.arrival);

        let seq = packet.seq;
        if !self.queue.insert(packet) {
            self.duplicates += 1;
            tracing::trace!(seq, "duplicate packet dropped");
        }
    }

    /// Parse an RTP datagram and queue its payload.
    pub fn push_rtp(&mut self, datagram: &[u8], arrival: Instant) -> Result<()> {
        let view = RtpView::parse(datagram, self.config.cvo_extension_id)?;
        self.push_view(&view, arrival);
        Ok(())
    }

    /// Queue the payload of an already parsed RTP packet.
    pub fn push_view(&mut self, view: &RtpView<'_>, arrival: Instant) {
        let packet = Packet::new(view.sequence, view.timestamp, arrival, view.payload.to_vec())
            .with_orientation(view.orientation);
        self.push(packet);
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Total packets discarded by the assembler.
    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Take every pending feedback request, oldest first.
    pub fn drain_feedback(&mut self) -> Vec<Feedback> {
        self.feedback.drain(..).collect()
    }
}

impl PacketSource for RtpSource {
    fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    fn queue_mut(&mut self) -> &mut PacketQueue {
        &mut self.queue
    }

    fn timing_origin(&self) -> Option<(u32, Instant)> {
        self.origin
    }

    fn clock_rate(&self) -> u32 {
        self.config.clock_rate
    }

    fn static_jitter_ms(&self) -> u32 {
        self.config.static_jitter_ms
    }

    fn dynamic_jitter_ms(&self) -> u32 {
        self.jitter.jitter_ms()
    }

    fn highest_nack(&self) -> Option<u16> {
        self.highest_nack
    }

    fn set_highest_nack(&mut self, seq: Option<u16>) {
        self.highest_nack = seq;
    }

    fn request_retransmission(&mut self, start_seq: u16, mask: u16, head_seq: u16) {
        self.feedback.push_back(Feedback::Nack {
            start: start_seq,
            mask,
            head: head_seq,
        });
    }

    fn report_abandoned(&mut self, count: usize) {
        self.abandoned += count as u64;
    }

    fn request_intra_refresh(&mut self) {
        self.feedback.push_back(Feedback::IntraRefresh);
    }
}
