use rand::RngExt as _;

use crate::error::{Result, RtpErrorKind};

/// Length of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Header extension profile for one-byte elements (RFC 8285 §4.2).
const ONE_BYTE_EXTENSION_PROFILE: u16 = 0xBEDE;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Sender-side state: the sequence number advances on every
/// [`write`](Self::write), the timestamp on every frame. The timestamp is
/// kept as u64 and truncated on the wire.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Start numbering at an arbitrary sequence number.
    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Borrowed view of a received RTP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpView<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// CVO byte, when the datagram carries the negotiated extension element.
    pub orientation: Option<u8>,
    /// Payload with CSRCs, extension and padding stripped.
    pub payload: &'a [u8],
}

impl<'a> RtpView<'a> {
    /// Parse an RTP datagram.
    ///
    /// `cvo_id` is the one-byte extension element id negotiated for video
    /// orientation; `None` skips extension decoding entirely.
    pub fn parse(data: &'a [u8], cvo_id: Option<u8>) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(RtpErrorKind::TooShort.into());
        }
        if data[0] >> 6 != 2 {
            return Err(RtpErrorKind::BadVersion.into());
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0f) as usize;

        let mut offset = RTP_HEADER_LEN + 4 * csrc_count;
        if data.len() < offset {
            return Err(RtpErrorKind::TooShort.into());
        }

        let mut orientation = None;
        if has_extension {
            if data.len() < offset + 4 {
                return Err(RtpErrorKind::BadExtension.into());
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let start = offset + 4;
            let end = start + 4 * words;
            if data.len() < end {
                return Err(RtpErrorKind::BadExtension.into());
            }
            if let (ONE_BYTE_EXTENSION_PROFILE, Some(id)) = (profile, cvo_id) {
                orientation = find_one_byte_element(&data[start..end], id);
            }
            offset = end;
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(RtpErrorKind::BadPadding.into());
            }
            end -= pad;
        }

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            orientation,
            payload: &data[offset..end],
        })
    }
}

/// First data byte of the one-byte extension element `id`.
fn find_one_byte_element(ext: &[u8], id: u8) -> Option<u8> {
    let mut i = 0;
    while i < ext.len() {
        let b = ext[i];
        if b == 0 {
            i += 1;
            continue;
        }
        let elem_id = b >> 4;
        let len = (b & 0x0f) as usize + 1;
        if elem_id == 15 {
            break;
        }
        if elem_id == id {
            return ext.get(i + 1).copied();
        }
        i += 1 + len;
    }
    None
}
