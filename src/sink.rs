use crate::error::GlimmerResult;
use crate::model::{Show, UNIVERSE_SIZE};
use crate::sink_artnet::ArtnetSink;

/// Sink contract for transmitting rendered DMX frames.
///
/// `stream` is fire-and-forget: one call per rendered frame, no
/// acknowledgment, and callers treat a failure as best-effort. `close` is
/// idempotent and releases any underlying resources.
pub trait DmxSink {
    /// Transmit one frame for the given universe.
    fn stream(&mut self, universe: u16, frame: &[u8; UNIVERSE_SIZE]) -> GlimmerResult<()>;
    /// Release the sink. Safe to call more than once.
    fn close(&mut self);
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Vec<(u16, [u8; UNIVERSE_SIZE])>,
    closed: bool,
}

impl MemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the captured frames in stream order.
    pub fn frames(&self) -> &[(u16, [u8; UNIVERSE_SIZE])] {
        &self.frames
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DmxSink for MemorySink {
    fn stream(&mut self, universe: u16, frame: &[u8; UNIVERSE_SIZE]) -> GlimmerResult<()> {
        self.frames.push((universe, *frame));
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Select the output sink for a show.
///
/// An `artnet` section with an address streams unicast to that address;
/// without one, frames are broadcast. A show with no `artnet` section
/// broadcasts with default settings.
pub fn create_sink(show: &Show) -> GlimmerResult<Box<dyn DmxSink>> {
    let config = show.artnet.clone().unwrap_or_default();
    Ok(Box::new(ArtnetSink::new(&config)?))
}
