//! Sequence gap handling: stale-packet discard and cursor resynchronisation.

use crate::jitter::JitterWindow;
use crate::packet::PacketQueue;

/// Drop every queued packet ordered before `seq`. Returns the count removed.
pub fn delete_unit_under_seq(queue: &mut PacketQueue, seq: u16) -> usize {
    queue.drain_before(seq)
}

/// Choose where the cursor should jump after the head turned out to be
/// hopelessly late: the first packet that can still be played in time, or
/// the head itself if none can. `None` on an empty queue.
pub fn pick_proper_seq(
    queue: &PacketQueue,
    first_rtp_time: u32,
    window: &JitterWindow,
) -> Option<u16> {
    let head = queue.front()?.seq;
    let pick = queue
        .iter()
        .find(|p| window.is_salvageable(window.unwrap_rtp_time(first_rtp_time, p.rtp_time)))
        .map_or(head, |p| p.seq);
    Some(pick)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::jitter::ms_to_rtp;
    use crate::packet::Packet;

    fn queue_of(entries: &[(u16, u32)]) -> PacketQueue {
        let t0 = Instant::now();
        let mut q = PacketQueue::new();
        for &(seq, ts) in entries {
            q.insert(Packet::new(seq, ts, t0, vec![0x02, 0x01]));
        }
        q
    }

    fn window(played_ms: i64, tolerance_ms: i64) -> JitterWindow {
        JitterWindow {
            played: ms_to_rtp(played_ms, 90_000),
            tolerance: ms_to_rtp(tolerance_ms, 90_000),
            margin: 0,
        }
    }

    #[test]
    fn delete_under_reports_count() {
        let mut q = queue_of(&[(5, 0), (6, 0), (9, 0)]);
        assert_eq!(delete_unit_under_seq(&mut q, 7), 2);
        assert_eq!(q.front().map(|p| p.seq), Some(9));
    }

    #[test]
    fn pick_first_salvageable() {
        // played 1000 ms, tolerance 100 ms: anything stamped >= 900 ms is ok
        let q = queue_of(&[
            (1, ms_to_rtp(100, 90_000) as u32),
            (2, ms_to_rtp(500, 90_000) as u32),
            (3, ms_to_rtp(950, 90_000) as u32),
            (4, ms_to_rtp(990, 90_000) as u32),
        ]);
        assert_eq!(pick_proper_seq(&q, 0, &window(1000, 100)), Some(3));
    }

    #[test]
    fn pick_defaults_to_head() {
        let q = queue_of(&[(40, 0), (41, 10)]);
        assert_eq!(pick_proper_seq(&q, 0, &window(5000, 100)), Some(40));
        assert_eq!(pick_proper_seq(&PacketQueue::new(), 0, &window(0, 0)), None);
    }

    #[test]
    fn pick_handles_timestamp_wrap() {
        let first = u32::MAX - 900;
        let q = queue_of(&[(7, first), (8, first.wrapping_add(90_000))]);
        let w = window(1000, 50);
        assert_eq!(pick_proper_seq(&q, first, &w), Some(8));
    }
}
