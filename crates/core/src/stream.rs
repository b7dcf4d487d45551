//! Per-SSRC streams and the registry that owns them.
//!
//! A [`Stream`] pairs one [`RtpSource`] with its [`HevcAssembler`]. The
//! [`StreamRegistry`] maps SSRCs to streams so a receive thread and an
//! assembly thread can share them. Each stream sits behind its own mutex;
//! holding it is what serialises calls into one assembler.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::assembler::HevcAssembler;
use crate::config::{AssemblerConfig, SourceConfig};
use crate::error::{AssemblyStatus, Result};
use crate::media::rtp::RtpView;
use crate::sink::AccessUnitSink;
use crate::source::RtpSource;

/// One RTP source and the engine assembling it.
#[derive(Debug)]
pub struct Stream<S: AccessUnitSink> {
    pub source: RtpSource,
    pub assembler: HevcAssembler<S>,
}

impl<S: AccessUnitSink> Stream<S> {
    pub fn new(ssrc: u32, source_config: SourceConfig, config: AssemblerConfig, sink: S) -> Self {
        Stream {
            source: RtpSource::new(ssrc, source_config),
            assembler: HevcAssembler::new(config, sink),
        }
    }

    /// Run the receive loop over whatever is queued.
    pub fn poll_at(&mut self, now: Instant) -> AssemblyStatus {
        self.assembler.on_packet_received_at(&mut self.source, now)
    }

    /// The sender said BYE.
    pub fn bye(&mut self) {
        self.assembler.on_bye();
    }
}

type SinkFactory<S> = dyn Fn(u32) -> S + Send + Sync;

/// Thread-safe registry of active streams, keyed by SSRC.
///
/// Streams are created on their first packet; the sink for each one comes
/// from the factory given at construction.
pub struct StreamRegistry<S: AccessUnitSink> {
    streams: Arc<RwLock<HashMap<u32, Arc<Mutex<Stream<S>>>>>>,
    source_config: SourceConfig,
    config: AssemblerConfig,
    make_sink: Arc<SinkFactory<S>>,
}

impl<S: AccessUnitSink> Clone for StreamRegistry<S> {
    fn clone(&self) -> Self {
        StreamRegistry {
            streams: Arc::clone(&self.streams),
            source_config: self.source_config.clone(),
            config: self.config.clone(),
            make_sink: Arc::clone(&self.make_sink),
        }
    }
}

impl<S: AccessUnitSink> StreamRegistry<S> {
    pub fn new(
        source_config: SourceConfig,
        config: AssemblerConfig,
        make_sink: impl Fn(u32) -> S + Send + Sync + 'static,
    ) -> Self {
        StreamRegistry {
            streams: Arc::new(RwLock::new(HashMap::new())),
            source_config,
            config,
            make_sink: Arc::new(make_sink),
        }
    }

    /// Look up a stream by SSRC.
    pub fn get(&self, ssrc: u32) -> Option<Arc<Mutex<Stream<S>>>> {
        self.streams.read().get(&ssrc).cloned()
    }

    /// Look up a stream, creating it if this SSRC is new.
    pub fn get_or_create(&self, ssrc: u32) -> Arc<Mutex<Stream<S>>> {
        if let Some(stream) = self.get(ssrc) {
            return stream;
        }

        let mut streams = self.streams.write();
        let stream = streams.entry(ssrc).or_insert_with(|| {
            tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "stream created");
            Arc::new(Mutex::new(Stream::new(
                ssrc,
                self.source_config.clone(),
                self.config.clone(),
                (self.make_sink)(ssrc),
            )))
        });
        Arc::clone(stream)
    }

    /// Parse an RTP datagram, queue it on its stream and assemble.
    pub fn deliver(&self, datagram: &[u8]) -> Result<AssemblyStatus> {
        self.deliver_at(datagram, Instant::now())
    }

    /// [`deliver`](Self::deliver) with an explicit arrival time.
    pub fn deliver_at(&self, datagram: &[u8], now: Instant) -> Result<AssemblyStatus> {
        let view = RtpView::parse(datagram, self.source_config.cvo_extension_id)?;
        let stream = self.get_or_create(view.ssrc);
        let mut stream = stream.lock();
        stream.source.push_view(&view, now);
        Ok(stream.poll_at(now))
    }

    /// Run every stream's receive loop, e.g. from a timer once input stops.
    pub fn poll_all_at(&self, now: Instant) {
        for stream in self.streams() {
            stream.lock().poll_at(now);
        }
    }

    /// Emit end-of-stream for `ssrc` and drop it. Returns `false` for an
    /// unknown SSRC.
    pub fn bye(&self, ssrc: u32) -> bool {
        let removed = self.streams.write().remove(&ssrc);
        let Some(stream) = removed else {
            tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "BYE for unknown stream");
            return false;
        };
        stream.lock().bye();

        let total = self.streams.read().len();
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            total_streams = total,
            "stream removed"
        );
        true
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        self.streams.read().keys().copied().collect()
    }

    pub fn streams(&self) -> Vec<Arc<Mutex<Stream<S>>>> {
        self.streams.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}
