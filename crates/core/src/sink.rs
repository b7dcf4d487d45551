//! Downstream emission of assembled access units.

use std::sync::mpsc::Sender;
use std::time::Instant;

/// One decodable frame: every NAL unit of one RTP timestamp, each behind a
/// `00 00 00 01` start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub rtp_time: u32,
    /// Arrival of the packet that carried the first NAL unit.
    pub arrival: Instant,
    pub orientation: Option<u8>,
    /// A loss-recovery path was taken while this unit was assembled.
    pub damaged: bool,
}

/// What the assembler hands downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerEvent {
    AccessUnit(AccessUnit),
    /// The sender said BYE.
    EndOfStream,
}

/// Receiver of assembled access units.
///
/// Emission is synchronous with the flush decision, so at most one
/// accumulation is ever pending inside the assembler.
pub trait AccessUnitSink {
    fn emit(&mut self, event: AssemblerEvent);
}

impl AccessUnitSink for Vec<AssemblerEvent> {
    fn emit(&mut self, event: AssemblerEvent) {
        self.push(event);
    }
}

impl AccessUnitSink for Sender<AssemblerEvent> {
    fn emit(&mut self, event: AssemblerEvent) {
        if self.send(event).is_err() {
            tracing::warn!("access unit receiver dropped, event discarded");
        }
    }
}

impl<S: AccessUnitSink + ?Sized> AccessUnitSink for Box<S> {
    fn emit(&mut self, event: AssemblerEvent) {
        (**self).emit(event);
    }
}
