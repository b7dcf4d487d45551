use std::time::Duration;

/// Default RTP clock rate for video (RFC 7798 §7.1).
pub const DEFAULT_CLOCK_RATE: u32 = 90_000;

/// Default static (target) jitter buffering delay.
pub const DEFAULT_STATIC_JITTER_MS: u32 = 50;

/// Tuning knobs of the assembly engine.
///
/// The ratio and multiplier are empirical heuristics, not protocol
/// constants, so they are exposed rather than baked in.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Upper bound applied to the source's dynamic jitter estimate.
    pub dynamic_jitter_cap: Duration,
    /// A packet is hopelessly late once it overshoots its expiry by
    /// `tolerance + capped_dynamic_jitter * late_margin_multiplier`.
    pub late_margin_multiplier: f64,
    /// Minimum connected fraction for salvaging an inter-frame FU run
    /// that has holes in it.
    pub salvage_ratio: f64,
    /// Malformed packets escalate to an intra refresh once no intra unit
    /// has arrived for this long.
    pub intra_refresh_after: Duration,
    /// How long the receive loop waits on a missing packet before
    /// declaring it lost.
    pub sequence_wait: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            dynamic_jitter_cap: Duration::from_millis(150),
            late_margin_multiplier: 1.5,
            salvage_ratio: 0.5,
            intra_refresh_after: Duration::from_secs(1),
            sequence_wait: Duration::from_millis(10),
        }
    }
}

/// Settings of the reference [`RtpSource`](crate::source::RtpSource).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    /// Target buffering delay. Practical range is 50–1000 ms.
    pub static_jitter_ms: u32,
    /// One-byte header extension id carrying CVO, if negotiated.
    pub cvo_extension_id: Option<u8>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            clock_rate: DEFAULT_CLOCK_RATE,
            static_jitter_ms: DEFAULT_STATIC_JITTER_MS,
            cvo_extension_id: None,
        }
    }
}
