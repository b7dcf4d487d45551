use clap::Parser;
use hevc_depay::media::h265::{extract_nal_units, nal_type};
use hevc_depay::{
    AssemblerConfig, AssemblerEvent, Feedback, H265Packetizer, SourceConfig, StreamRegistry,
};
use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Polling period of the simulated receive thread.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(
    name = "hevc-replay",
    about = "Replay an H.265 Annex-B file through a lossy RTP link and reassemble it"
)]
struct Args {
    /// Annex-B H.265 input
    input: PathBuf,

    /// Where to write the reassembled Annex-B stream
    #[arg(long, short, default_value = "out.h265")]
    output: PathBuf,

    /// Frame rate used to space RTP timestamps
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Maximum RTP payload size
    #[arg(long, default_value_t = 1200)]
    mtu: usize,

    /// Packet loss probability (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Maximum extra network delay in ms; packets are reordered within it
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Seed for the loss and delay simulation
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Receiver buffering delay in ms
    #[arg(long, default_value_t = 100)]
    static_jitter_ms: u32,
}

#[derive(Debug, Default)]
struct Summary {
    frames: usize,
    sent: usize,
    dropped: usize,
    access_units: u64,
    damaged: u64,
    nacks: usize,
    intra_requests: usize,
    lost: u64,
    abandoned: u64,
    bytes_out: usize,
}

/// Group NAL units into access units: a parameter set or a first slice
/// segment after picture data starts a new one.
fn split_access_units(nals: Vec<Vec<u8>>) -> Vec<Vec<Vec<u8>>> {
    let mut frames: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut has_picture = false;

    for nal in nals {
        let Some(&first) = nal.first() else {
            continue;
        };
        let t = nal_type(first);
        let is_vcl = t < 32;
        let starts_picture = is_vcl && nal.get(2).is_some_and(|b| b & 0x80 != 0);
        let is_prefix = (32..=40).contains(&t);

        if has_picture && (starts_picture || is_prefix) {
            frames.push(std::mem::take(&mut current));
            has_picture = false;
        }
        has_picture |= is_vcl;
        current.push(nal);
    }
    if !current.is_empty() {
        frames.push(current);
    }
    frames
}

fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn run(args: &Args) -> hevc_depay::Result<Summary> {
    let input = std::fs::read(&args.input)?;
    let frames = split_access_units(extract_nal_units(&input));
    tracing::info!(frames = frames.len(), bytes = input.len(), "input loaded");

    let mut summary = Summary {
        frames: frames.len(),
        ..Summary::default()
    };

    let fps = args.fps.max(1);
    let ticks = 90_000 / fps;
    let interval = Duration::from_secs(1) / fps;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut packetizer = H265Packetizer::with_random_ssrc(96).with_mtu(args.mtu);

    let mut arrivals: Vec<(Duration, Vec<u8>)> = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        let sent_at = interval * i as u32;
        for datagram in packetizer.packetize(&annex_b(frame), ticks) {
            summary.sent += 1;
            if rng.random_bool(args.loss.clamp(0.0, 1.0)) {
                summary.dropped += 1;
                continue;
            }
            let delay = if args.delay_ms > 0 {
                Duration::from_millis(rng.random_range(0..=args.delay_ms))
            } else {
                Duration::ZERO
            };
            arrivals.push((sent_at + delay, datagram));
        }
    }
    arrivals.sort_by_key(|(at, _)| *at);

    let source_config = SourceConfig {
        static_jitter_ms: args.static_jitter_ms,
        ..SourceConfig::default()
    };
    let (tx, rx) = mpsc::channel();
    let registry = StreamRegistry::new(source_config, AssemblerConfig::default(), move |_| {
        tx.clone()
    });

    let base = Instant::now();
    let end = arrivals.last().map_or(Duration::ZERO, |(at, _)| *at)
        + Duration::from_millis(u64::from(args.static_jitter_ms) + 500);
    let mut pending = arrivals.into_iter().peekable();
    let mut now = Duration::ZERO;
    while now <= end {
        while let Some((at, datagram)) = pending.next_if(|(at, _)| *at <= now) {
            if let Err(e) = registry.deliver_at(&datagram, base + at) {
                tracing::warn!(error = %e, "dropping undecodable datagram");
            }
        }
        registry.poll_all_at(base + now);

        for stream in registry.streams() {
            for feedback in stream.lock().source.drain_feedback() {
                match feedback {
                    Feedback::Nack { start, mask, .. } => {
                        tracing::debug!(start, mask = format_args!("{:#06X}", mask), "NACK");
                        summary.nacks += 1;
                    }
                    Feedback::IntraRefresh => summary.intra_requests += 1,
                }
            }
        }
        now += POLL_INTERVAL;
    }

    for ssrc in registry.ssrcs() {
        if let Some(stream) = registry.get(ssrc) {
            let mut stream = stream.lock();
            stream.assembler.flush();
            let stats = stream.assembler.stats();
            summary.lost += stats.lost_packets;
            summary.abandoned += stream.source.abandoned();
        }
        registry.bye(ssrc);
    }
    drop(registry);

    let mut output = Vec::new();
    for event in rx.try_iter() {
        match event {
            AssemblerEvent::AccessUnit(au) => {
                summary.access_units += 1;
                if au.damaged {
                    summary.damaged += 1;
                }
                output.extend_from_slice(&au.data);
            }
            AssemblerEvent::EndOfStream => tracing::debug!("end of stream"),
        }
    }
    summary.bytes_out = output.len();
    std::fs::write(&args.output, &output)?;

    Ok(summary)
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match run(&args) {
        Ok(s) => {
            println!(
                "{} frames, {} packets sent, {} dropped by the link",
                s.frames, s.sent, s.dropped
            );
            println!(
                "{} access units written to {} ({} bytes), {} damaged",
                s.access_units,
                args.output.display(),
                s.bytes_out,
                s.damaged
            );
            println!(
                "{} NACKs, {} intra refresh requests, {} declared lost, {} abandoned",
                s.nacks, s.intra_requests, s.lost, s.abandoned
            );
        }
        Err(e) => {
            eprintln!("Replay failed: {}", e);
            std::process::exit(1);
        }
    }
}
