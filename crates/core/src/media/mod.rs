//! HEVC payload format and RTP framing.
//!
//! - [`rtp`]: RTP fixed header writer and datagram parser (RFC 3550 §5.1).
//! - [`h265`]: NAL header, FU and AP definitions (RFC 7798) and a
//!   packetizer producing single-NAL and FU packets.
//! - [`sps`]: picture dimensions from a sequence parameter set.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame travels as one or more RTP packets sharing one
//! 90 kHz timestamp. The 16-bit wrapping sequence number is what the
//! receiver uses for reordering and loss detection.

pub mod h265;
pub mod rtp;
pub mod sps;
