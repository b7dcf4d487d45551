//! End-to-end: packetizer → simulated link → source → assembler.
//!
//! A virtual clock drives everything. Packets are queued at their arrival
//! time and the receive loop is polled every few milliseconds, the way a
//! transport thread with a short timer would.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use hevc_depay::assembler::AssemblerStats;
use hevc_depay::{
    AccessUnit, AssemblerConfig, AssemblerEvent, Feedback, H265Packetizer, SourceConfig, Stream,
    StreamRegistry,
};
use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

const SSRC: u32 = 0x1234_5678;
const MTU: usize = 1200;
const FRAME_TICKS: u32 = 3000;
const FRAME_INTERVAL: Duration = Duration::from_micros(33_333);
const POLL: Duration = Duration::from_millis(5);

const SPS_704X480: [u8; 44] = [
    0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0xb0, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03,
    0x00, 0x5a, 0xa0, 0x05, 0x82, 0x01, 0xe1, 0x63, 0x6b, 0x92, 0x45, 0x2f, 0xcd, 0xc1, 0x41, 0x81,
    0x41, 0x00, 0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0x03, 0x00, 0x0c, 0xa1,
];

/// A NAL unit with a body free of start-code emulation.
fn nal(header: [u8; 2], len: usize, seed: usize) -> Vec<u8> {
    let mut out = header.to_vec();
    out.extend((0..len).map(|i| ((i + seed) % 251) as u8 + 1));
    out
}

fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    nals.iter()
        .flat_map(|n| [0u8, 0, 0, 1].into_iter().chain(n.iter().copied()))
        .collect()
}

/// `count` frames: an IRAP with parameter sets every `idr_every` frames,
/// trailing pictures in between. Every third picture is large enough to be
/// fragmented.
fn clip(count: usize, idr_every: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            if i % idr_every == 0 {
                annex_b(&[
                    nal([0x40, 0x01], 20, i),
                    SPS_704X480.to_vec(),
                    nal([0x44, 0x01], 6, i),
                    nal([0x26, 0x01], 3000, i),
                ])
            } else if i % 3 == 0 {
                annex_b(&[nal([0x02, 0x01], 2500, i)])
            } else {
                annex_b(&[nal([0x02, 0x01], 700, i)])
            }
        })
        .collect()
}

/// RTP datagrams per frame.
fn packetize(frames: &[Vec<u8>], first_seq: u16) -> Vec<Vec<Vec<u8>>> {
    let mut packetizer = H265Packetizer::new(96, SSRC)
        .with_mtu(MTU)
        .with_sequence(first_seq);
    frames
        .iter()
        .map(|f| packetizer.packetize(f, FRAME_TICKS))
        .collect()
}

fn seq_of(datagram: &[u8]) -> u16 {
    u16::from_be_bytes([datagram[2], datagram[3]])
}

/// Every packet arrives exactly when its frame was captured.
fn on_time(packets: &[Vec<Vec<u8>>]) -> Vec<(Duration, Vec<u8>)> {
    packets
        .iter()
        .enumerate()
        .flat_map(|(i, frame)| {
            let at = FRAME_INTERVAL * i as u32;
            frame.iter().map(move |p| (at, p.clone()))
        })
        .collect()
}

struct Outcome {
    units: Vec<AccessUnit>,
    feedback: Vec<Feedback>,
    stats: AssemblerStats,
    abandoned: u64,
    dimensions: (u32, u32),
}

fn replay(mut arrivals: Vec<(Duration, Vec<u8>)>) -> Outcome {
    arrivals.sort_by_key(|(at, _)| *at);

    let source_config = SourceConfig {
        static_jitter_ms: 100,
        ..SourceConfig::default()
    };
    let mut stream = Stream::new(SSRC, source_config, AssemblerConfig::default(), Vec::new());
    let base = Instant::now();
    let end = arrivals.last().map_or(Duration::ZERO, |(at, _)| *at) + Duration::from_millis(300);

    let mut feedback = Vec::new();
    let mut pending = arrivals.into_iter().peekable();
    let mut t = Duration::ZERO;
    while t <= end {
        while let Some((at, datagram)) = pending.next_if(|(at, _)| *at <= t) {
            stream.source.push_rtp(&datagram, base + at).unwrap();
        }
        stream.poll_at(base + t);
        feedback.extend(stream.source.drain_feedback());
        t += POLL;
    }
    stream.assembler.flush();

    let units = stream
        .assembler
        .sink()
        .iter()
        .filter_map(|e| match e {
            AssemblerEvent::AccessUnit(au) => Some(au.clone()),
            AssemblerEvent::EndOfStream => None,
        })
        .collect();

    Outcome {
        units,
        feedback,
        stats: stream.assembler.stats(),
        abandoned: stream.source.abandoned(),
        dimensions: stream.assembler.keyframes().dimensions(),
    }
}

fn rtp_time_of(frame: usize) -> u32 {
    frame as u32 * FRAME_TICKS
}

/// Undamaged access units must be bit-exact copies of what was sent.
fn assert_intact_units_match(units: &[AccessUnit], frames: &[Vec<u8>]) {
    let by_time: HashMap<u32, &Vec<u8>> = frames
        .iter()
        .enumerate()
        .map(|(i, f)| (rtp_time_of(i), f))
        .collect();
    for au in units.iter().filter(|au| !au.damaged) {
        assert_eq!(
            Some(&&au.data),
            by_time.get(&au.rtp_time),
            "access unit at {} differs from what was sent",
            au.rtp_time
        );
    }
}

#[test]
fn clean_link_round_trip_across_sequence_wrap() {
    let frames = clip(30, 15);
    let packets = packetize(&frames, 65_500);
    assert!(packets.iter().map(Vec::len).sum::<usize>() > 36);

    let out = replay(on_time(&packets));

    assert_eq!(out.units.len(), frames.len());
    for (au, frame) in out.units.iter().zip(&frames) {
        assert_eq!(&au.data, frame);
        assert!(!au.damaged);
    }
    assert_eq!(out.units[7].rtp_time, rtp_time_of(7));
    assert!(out.feedback.is_empty());
    assert_eq!(out.stats.lost_packets, 0);
    assert_eq!(out.abandoned, 0);
    assert_eq!(out.dimensions, (704, 480));
}

#[test]
fn reordered_packets_are_put_back_in_order() {
    let frames = clip(30, 15);
    let packets = packetize(&frames, 1000);
    let mut arrivals = on_time(&packets);
    for (i, (at, _)) in arrivals.iter_mut().enumerate() {
        if i % 4 == 1 {
            *at += Duration::from_millis(20);
        }
    }

    let out = replay(arrivals);

    assert_eq!(out.units.len(), frames.len());
    assert!(out.units.iter().all(|au| !au.damaged));
    assert_intact_units_match(&out.units, &frames);
    assert_eq!(out.stats.lost_packets, 0);
}

#[test]
fn lost_packet_is_nacked_then_declared_lost() {
    let frames = clip(30, 15);
    let mut packets = packetize(&frames, 40_000);
    assert_eq!(packets[10].len(), 1);
    let lost = packets[10].remove(0);
    let lost_seq = seq_of(&lost);

    let out = replay(on_time(&packets));

    assert!(out.feedback.iter().any(|f| matches!(
        f,
        Feedback::Nack { start, mask: 0, .. } if *start == lost_seq
    )));
    assert_eq!(out.stats.lost_packets, 1);

    let times: Vec<u32> = out.units.iter().map(|au| au.rtp_time).collect();
    assert_eq!(out.units.len(), frames.len() - 1);
    assert!(!times.contains(&rtp_time_of(10)));

    let damaged: Vec<u32> = out
        .units
        .iter()
        .filter(|au| au.damaged)
        .map(|au| au.rtp_time)
        .collect();
    assert_eq!(damaged, vec![rtp_time_of(9), rtp_time_of(11)]);
    assert_intact_units_match(&out.units, &frames);
}

#[test]
fn nothing_decodable_before_first_intra() {
    let frames = clip(30, 15);
    let mut packets = packetize(&frames, 7);
    packets[0].clear();

    let out = replay(on_time(&packets));

    assert_eq!(out.units.len(), 15);
    assert_eq!(out.units[0].rtp_time, rtp_time_of(15));
    for (au, frame) in out.units.iter().zip(&frames[15..]) {
        assert_eq!(&au.data, frame);
    }
    assert_eq!(out.stats.dropped_inter_units, 14);
    assert!(out.feedback.contains(&Feedback::IntraRefresh));
    assert_eq!(out.stats.intra_requests, 14);
}

#[test]
fn seeded_lossy_link_never_emits_corrupt_intact_units() {
    let frames = clip(60, 20);
    let packets = packetize(&frames, 65_000);
    let mut rng = StdRng::seed_from_u64(0x5EED);

    let mut dropped = 0usize;
    let mut arrivals = Vec::new();
    for (i, frame) in packets.iter().enumerate() {
        let sent = FRAME_INTERVAL * i as u32;
        for datagram in frame {
            // The receiver cannot see losses before its first packet, so the
            // first frame always gets through.
            if i > 0 && rng.random_bool(0.05) {
                dropped += 1;
                continue;
            }
            let delay = Duration::from_millis(rng.random_range(0..40));
            arrivals.push((sent + delay, datagram.clone()));
        }
    }

    let out = replay(arrivals);

    assert!(!out.units.is_empty());
    assert!(
        out.units.windows(2).all(|w| w[0].rtp_time < w[1].rtp_time),
        "access units out of order"
    );
    assert_intact_units_match(&out.units, &frames);
    if dropped > 0 {
        assert!(out.units.len() < frames.len() || out.units.iter().any(|au| au.damaged));
    }
    assert!(out.units.iter().all(|au| au.data.starts_with(&[0, 0, 0, 1])));
}

#[test]
fn registry_ends_stream_on_bye() {
    let frames = clip(5, 5);
    let packets = packetize(&frames, 0);

    let (tx, rx) = mpsc::channel();
    let registry = StreamRegistry::new(SourceConfig::default(), AssemblerConfig::default(), move |_| {
        tx.clone()
    });
    let base = Instant::now();
    for (at, datagram) in on_time(&packets) {
        registry.deliver_at(&datagram, base + at).unwrap();
    }
    let end = FRAME_INTERVAL * 5;
    let mut t = end;
    while t < end + Duration::from_millis(100) {
        registry.poll_all_at(base + t);
        t += POLL;
    }
    let stream = registry.get(SSRC).unwrap();
    assert!(stream.lock().assembler.flush());
    assert!(registry.bye(SSRC));
    assert!(registry.get(SSRC).is_none());

    let events: Vec<AssemblerEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), frames.len() + 1);
    assert_eq!(events.last(), Some(&AssemblerEvent::EndOfStream));
    for (event, frame) in events.iter().zip(&frames) {
        match event {
            AssemblerEvent::AccessUnit(au) => assert_eq!(&au.data, frame),
            AssemblerEvent::EndOfStream => panic!("end of stream before the last frame"),
        }
    }
}
