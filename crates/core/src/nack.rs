//! Retransmission requests for sequence gaps in the queue.

use crate::packet::{seq_diff, seq_lt};
use crate::source::PacketSource;

/// Slots one request can cover after its first missing packet.
pub const NACK_MASK_BITS: u16 = 16;

/// One retransmission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackRequest {
    /// First missing sequence number.
    pub start: u16,
    /// Bit `i` set means `start + 1 + i` is missing too.
    pub mask: u16,
    /// Queue head when the request was built.
    pub head: u16,
    /// Packets covered by the request (at most 17).
    pub count: u16,
}

/// Look for the first gap not yet requested and ask for it.
///
/// Scanning starts at the first packet at or after the source's NACK
/// watermark. A backwards step in the queue (a reset) clears the watermark.
/// At most one request is issued per call.
pub fn add_nack(source: &mut impl PacketSource) -> Option<NackRequest> {
    let queue = source.queue();
    let head = queue.front()?.seq;
    let mut watermark = source.highest_nack();

    let start_idx = match watermark {
        Some(wm) => queue.iter().position(|p| !seq_lt(p.seq, wm))?,
        None => 0,
    };

    let mut found = None;
    let mut prev = queue.get(start_idx)?.seq;
    for packet in queue.iter().skip(start_idx + 1) {
        let seq = packet.seq;
        let step = seq_diff(prev, seq);

        if step < 0 {
            tracing::debug!(from = prev, to = seq, "sequence went backwards, NACK watermark reset");
            watermark = None;
        }

        let last_missing = seq.wrapping_sub(1);
        let unrequested = watermark.is_none_or(|wm| seq_lt(wm, last_missing));
        if step > 1 && unrequested {
            found = Some((prev.wrapping_add(1), last_missing));
            break;
        }
        prev = seq;
    }

    let Some((start, last_missing)) = found else {
        source.set_highest_nack(watermark);
        return None;
    };

    source.set_highest_nack(Some(last_missing));

    let missing = seq_diff(start, last_missing) as u16 + 1;
    let following = (missing - 1).min(NACK_MASK_BITS);
    let mask = if following == NACK_MASK_BITS {
        u16::MAX
    } else {
        (1u16 << following) - 1
    };

    tracing::debug!(
        start,
        last_missing,
        missing,
        mask = format_args!("{:#06X}", mask),
        head,
        "NACK issued"
    );
    source.request_retransmission(start, mask, head);

    Some(NackRequest {
        start,
        mask,
        head,
        count: following + 1,
    })
}
