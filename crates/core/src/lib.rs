//! Jitter-buffered HEVC (H.265) RTP depacketizer.
//!
//! Packets arrive on a [`PacketSource`] (usually an [`RtpSource`]). Each
//! call into the [`HevcAssembler`] waits out the jitter window, asks for
//! retransmission of gaps, skips what is hopelessly late, reassembles
//! single, aggregated and fragmented NAL units, holds inter pictures back
//! until an intra picture arrives, and hands complete Annex-B access units
//! to an [`AccessUnitSink`].

pub mod assembler;
pub mod config;
pub mod error;
pub mod gap;
pub mod jitter;
pub mod media;
pub mod nack;
pub mod packet;
pub mod sink;
pub mod source;
pub mod stream;

pub use assembler::{AssemblerStats, HevcAssembler};
pub use config::{AssemblerConfig, SourceConfig};
pub use error::{AssemblerError, AssemblyStatus, Result};
pub use media::h265::H265Packetizer;
pub use packet::{Packet, PacketQueue};
pub use sink::{AccessUnit, AccessUnitSink, AssemblerEvent};
pub use source::{Feedback, PacketSource, RtpSource};
pub use stream::{Stream, StreamRegistry};
