//! H.265 (HEVC) payload format, RFC 7798.
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**. The NAL type is in bits 1..6 of the
//!   first byte, the temporal id (plus one) in the low 3 bits of the second.
//!
//!   ```text
//!   0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//!   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!   |F|   Type    |  LayerId  | TID |
//!   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!   ```
//!
//! - **FU header**: 2-byte payload header with type 49, then one byte
//!   `[S|E|Type]` with a 6-bit type field. Three bytes precede each
//!   fragment body.
//!
//! - **Aggregation packets** use type 48 and carry `[len16][NAL]` records.

use super::rtp::{RTP_HEADER_LEN, RtpHeader};

const DEFAULT_MTU: usize = 1400;

pub const NAL_TYPE_MASK: u8 = 0x3F;

pub const NAL_SPS: u8 = 33;
/// Aggregation packet.
pub const NAL_AP: u8 = 48;
/// Fragmentation unit.
pub const NAL_FU: u8 = 49;
/// Payload content information (not supported).
pub const NAL_PACI: u8 = 50;

/// Annex B start code placed before every NAL unit of an access unit.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Payload header (2 bytes) plus FU header (1 byte).
pub const FU_HEADER_LEN: usize = 3;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// NAL unit type from the first header byte.
pub fn nal_type(first_byte: u8) -> u8 {
    (first_byte >> 1) & NAL_TYPE_MASK
}

/// BLA, IDR and CRA pictures plus the reserved IRAP range (16..=23).
pub fn is_intra(nal_type: u8) -> bool {
    (16..=23).contains(&nal_type)
}

/// Trailing, TSA, STSA, RADL and RASL pictures (0..=15).
pub fn is_inter(nal_type: u8) -> bool {
    nal_type < 16
}

/// Parsed 3-byte FU prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader {
    pub start: bool,
    pub end: bool,
    /// Type of the fragmented NAL unit.
    pub nal_type: u8,
    /// Low 3 bits of the second payload header byte.
    pub tid: u8,
}

impl FuHeader {
    /// Parse the FU prefix. Returns `None` for payloads too short to hold
    /// one or whose payload header is not type 49.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < FU_HEADER_LEN || nal_type(payload[0]) != NAL_FU {
            return None;
        }
        Some(Self {
            start: payload[2] & FU_START != 0,
            end: payload[2] & FU_END != 0,
            nal_type: payload[2] & NAL_TYPE_MASK,
            tid: payload[1] & 0x07,
        })
    }

    /// The 2-byte NAL header this FU run reassembles into.
    pub fn nal_header(&self) -> [u8; 2] {
        [self.nal_type << 1, self.tid]
    }
}

/// Split an aggregation packet into its NAL units.
///
/// Records are `[len16 BE][len bytes]` following the 1-byte type byte.
/// Returns `None` if the payload is too short to hold a record or any
/// length overruns it. A trailing remainder shorter than a length prefix is
/// padding; zero-length records are skipped.
pub fn split_aggregation(payload: &[u8]) -> Option<Vec<&[u8]>> {
    if payload.len() < 3 {
        return None;
    }

    let mut units = Vec::new();
    let mut rest = &payload[1..];
    while rest.len() >= 2 {
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let record = rest.get(2..2 + len)?;
        if !record.is_empty() {
            units.push(record);
        }
        rest = &rest[2 + len..];
    }

    if !rest.is_empty() {
        tracing::trace!(padding = rest.len(), "padding at end of aggregation packet");
    }
    Some(units)
}

/// H.265 RTP packetizer (RFC 7798).
///
/// - **Single NAL unit** (§4.4.1): NALs that fit within the MTU are sent
///   as-is behind the 12-byte RTP header.
/// - **Fragmentation unit** (§4.4.3): larger NALs are split. Each fragment
///   carries the 3-byte FU prefix:
///
///   ```text
///   Payload header: [F|Type=49|LayerId|TID]   (2 bytes)
///   FU header:      [S|E|FuType]              (1 byte)
///   Fragment data:  [...]                     (up to MTU - 3 bytes)
///   ```
///
/// The marker bit is set on the last packet of each access unit.
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    mtu: usize,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            mtu: DEFAULT_MTU,
        }
    }

    /// Maximum RTP payload size. Values below 4 are raised to 4 so every
    /// fragment carries at least one body byte.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(FU_HEADER_LEN + 1);
        self
    }

    /// Start numbering at `sequence` instead of 0.
    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.header = self.header.with_sequence(sequence);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    pub fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }

    /// Packetize one Annex B access unit, then advance the RTP timestamp by
    /// `timestamp_increment` (typically `90000 / fps`).
    pub fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let nal_units = extract_nal_units(encoded_data);
        let mut packets = Vec::new();

        for (i, nal) in nal_units.iter().enumerate() {
            let is_last = i == nal_units.len() - 1;
            packets.append(&mut self.packetize_nal(nal, is_last));
        }

        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "frame packetized"
        );

        packets
    }

    /// Packetize a single NAL unit (2-byte header included).
    pub fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();

        if nal_unit.len() < 2 {
            return packets;
        }

        if nal_unit.len() <= self.mtu {
            let hdr = self.header.write(is_last_nal);
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + nal_unit.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(nal_unit);
            packets.push(packet);
            return packets;
        }

        let fu_type = nal_type(nal_unit[0]);
        // Keep F and the LayerId MSB, replace the type with 49.
        let indicator = [(nal_unit[0] & 0x81) | (NAL_FU << 1), nal_unit[1]];
        let payload = &nal_unit[2..];

        let max_fragment = self.mtu - FU_HEADER_LEN;
        let mut offset = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk_size = remaining.min(max_fragment);
            let chunk = &payload[offset..offset + chunk_size];

            let start_bit = if offset == 0 { FU_START } else { 0 };
            let end_bit = if last_fragment { FU_END } else { 0 };

            let hdr = self.header.write(is_last_nal && last_fragment);
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + FU_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(&indicator);
            packet.push(start_bit | end_bit | fu_type);
            packet.extend_from_slice(chunk);
            packets.push(packet);

            offset += chunk_size;
        }

        tracing::trace!(
            fu_type,
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU fragmented NAL unit"
        );

        packets
    }
}

/// Extract NAL units from an Annex B bitstream.
///
/// Handles both 4-byte `00 00 00 01` and 3-byte `00 00 01` start codes,
/// tracking each start code's length so boundaries stay exact when the two
/// are mixed.
pub fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };

        if start < end {
            nal_units.push(data[start..end].to_vec());
        }
    }

    nal_units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nal_type_classes() {
        assert_eq!(nal_type(0x26), 19); // IDR_W_RADL
        assert_eq!(nal_type(0x02), 1); // TRAIL_R
        assert_eq!(nal_type(0x42), NAL_SPS);
        assert_eq!(nal_type(0x62), NAL_FU);
        assert!(is_intra(19));
        assert!(is_intra(21));
        assert!(!is_intra(1));
        assert!(is_inter(1));
        assert!(!is_inter(NAL_SPS));
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x40, 0x01];
        data.extend_from_slice(&[0, 0, 1, 0x42, 0x01]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x40, 0x01], vec![0x42, 0x01]]);
        assert!(extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    #[test]
    fn small_nal_single_packet() {
        let mut p = H265Packetizer::new(96, 0x1234);
        let packets = p.packetize_nal(&[0x02, 0x01, 0xAA, 0xBB], true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), RTP_HEADER_LEN + 4);
        assert_eq!(packets[0][1] & 0x80, 0x80);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = H265Packetizer::new(96, 0x1234).with_mtu(100);
        let mut nal = vec![0x26, 0x01];
        nal.extend((0..250).map(|i| i as u8));
        let packets = p.packetize_nal(&nal, true);
        assert_eq!(packets.len(), 3);

        let first = FuHeader::parse(&packets[0][RTP_HEADER_LEN..]).unwrap();
        assert!(first.start && !first.end);
        assert_eq!(first.nal_type, 19);
        assert_eq!(first.tid, 1);

        let last = packets.last().unwrap();
        let fu = FuHeader::parse(&last[RTP_HEADER_LEN..]).unwrap();
        assert!(!fu.start && fu.end);
        assert_eq!(last[1] & 0x80, 0x80);
        assert_eq!(packets[0][1] & 0x80, 0);
        assert!(packets.iter().all(|p| p.len() <= RTP_HEADER_LEN + 100));
    }

    #[test]
    fn packetize_advances_timestamp() {
        let mut p = H265Packetizer::new(96, 0x1234).with_sequence(10);
        p.packetize(&[0, 0, 0, 1, 0x02, 0x01, 0xAA], 3000);
        let packets = p.packetize(&[0, 0, 0, 1, 0x02, 0x01, 0xBB], 3000);
        assert_eq!(packets.len(), 1);
        assert_eq!(u16::from_be_bytes([packets[0][2], packets[0][3]]), 11);
        assert_eq!(p.next_rtp_timestamp(), 6000);
    }

    #[test]
    fn aggregation_split() {
        let payload = [
            NAL_AP << 1,
            0x00,
            0x03,
            0x40,
            0x01,
            0x0C, // VPS
            0x00,
            0x00, // empty record
            0x00,
            0x02,
            0x44,
            0x01, // PPS
            0x00, // padding
        ];
        let units = split_aggregation(&payload).unwrap();
        assert_eq!(units, vec![&[0x40, 0x01, 0x0C][..], &[0x44, 0x01][..]]);

        assert!(split_aggregation(&[NAL_AP << 1, 0x00]).is_none());
        assert!(split_aggregation(&[NAL_AP << 1, 0x00, 0x05, 0x40, 0x01]).is_none());
    }

    #[test]
    fn fu_header_rejects_other_types() {
        assert!(FuHeader::parse(&[0x02, 0x01, 0x80]).is_none());
        assert!(FuHeader::parse(&[0x62, 0x01]).is_none());
        assert_eq!(
            FuHeader::parse(&[0x62, 0x01, 0x93]).map(|fu| fu.nal_header()),
            Some([0x26, 0x01])
        );
    }
}
