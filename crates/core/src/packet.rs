//! Received packets and the per-source packet queue.

use std::collections::VecDeque;
use std::time::Instant;

/// Serial-number "less than" for 16-bit RTP sequence numbers (RFC 1982).
pub fn seq_lt(a: u16, b: u16) -> bool {
    let d = b.wrapping_sub(a);
    d != 0 && d < 0x8000
}

/// Signed distance from `a` to `b`, positive when `b` comes after `a`.
pub fn seq_diff(a: u16, b: u16) -> i32 {
    b.wrapping_sub(a) as i16 as i32
}

/// One received RTP packet, reduced to what the assembler reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u16,
    pub rtp_time: u32,
    pub arrival: Instant,
    pub payload: Vec<u8>,
    /// CVO byte (coordination of video orientation).
    pub orientation: Option<u8>,
}

impl Packet {
    pub fn new(seq: u16, rtp_time: u32, arrival: Instant, payload: Vec<u8>) -> Self {
        Self {
            seq,
            rtp_time,
            arrival,
            payload,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Option<u8>) -> Self {
        self.orientation = orientation;
        self
    }
}

/// Packets of one source, ordered by sequence number with wraparound.
///
/// Backed by a ring buffer so the assembler's head and prefix removals are
/// index advances. Once removed, a packet never comes back.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn get(&self, index: usize) -> Option<&Packet> {
        self.packets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    pub fn pop_front(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Insert at the position given by the sequence number.
    ///
    /// Returns `false` (and drops the packet) if the sequence number is
    /// already queued.
    pub fn insert(&mut self, packet: Packet) -> bool {
        // Packets almost always arrive in order; search from the back.
        let mut idx = self.packets.len();
        while idx > 0 {
            let prev = self.packets[idx - 1].seq;
            if prev == packet.seq {
                return false;
            }
            if seq_lt(prev, packet.seq) {
                break;
            }
            idx -= 1;
        }
        self.packets.insert(idx, packet);
        true
    }

    /// Remove every packet ordered before `seq`. Returns how many went.
    pub fn drain_before(&mut self, seq: u16) -> usize {
        let count = self
            .packets
            .iter()
            .take_while(|p| seq_lt(p.seq, seq))
            .count();
        self.packets.drain(..count);
        count
    }

    /// Remove the first `count` packets and hand them back in order.
    pub fn take_front(&mut self, count: usize) -> Vec<Packet> {
        let count = count.min(self.packets.len());
        self.packets.drain(..count).collect()
    }
}
