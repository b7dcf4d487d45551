//! Error and status types for the depacketizer.

use std::fmt;

/// Outcome of one [`HevcAssembler::assemble_more`](crate::HevcAssembler::assemble_more) call.
///
/// None of these are errors. They tell the caller what to do next:
///
/// - [`Ok`](Self::Ok) and [`MalformedPacket`](Self::MalformedPacket): the
///   queue head was consumed, call again right away.
/// - [`InsufficientData`](Self::InsufficientData): the head is still inside
///   the jitter window, or the queue is empty. Wait for more input.
/// - [`SequenceMismatch`](Self::SequenceMismatch): the head is not the
///   packet the cursor expects. Wait for it (or declare it lost).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStatus {
    Ok,
    InsufficientData,
    SequenceMismatch,
    MalformedPacket,
}

/// Errors that can occur in the depacketizer library.
///
/// Runtime stream conditions (loss, lateness, bad payloads) are reported as
/// [`AssemblyStatus`] instead. The variants here are caller contract
/// violations and parse failures on the way into the engine.
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    /// Underlying I/O error (reading or writing bitstream files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A loss was reported before the first packet established a cursor.
    #[error("no expected sequence number established yet")]
    NoExpectedSequence,

    /// Fragment reassembly was invoked with nothing queued.
    #[error("packet queue is empty")]
    EmptyQueue,

    /// Failed to parse an RTP fixed header (RFC 3550 §5.1).
    #[error("RTP parse error: {kind}")]
    Rtp { kind: RtpErrorKind },
}

/// Specific kind of RTP header parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpErrorKind {
    /// Fewer bytes than the fixed header plus CSRC list.
    TooShort,
    /// Version field is not 2.
    BadVersion,
    /// Padding count is zero or larger than the payload.
    BadPadding,
    /// Header extension length runs past the end of the datagram.
    BadExtension,
}

impl fmt::Display for RtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "datagram too short"),
            Self::BadVersion => write!(f, "unsupported version"),
            Self::BadPadding => write!(f, "invalid padding"),
            Self::BadExtension => write!(f, "truncated header extension"),
        }
    }
}

impl From<RtpErrorKind> for AssemblerError {
    fn from(kind: RtpErrorKind) -> Self {
        Self::Rtp { kind }
    }
}

/// Convenience alias for `Result<T, AssemblerError>`.
pub type Result<T> = std::result::Result<T, AssemblerError>;
