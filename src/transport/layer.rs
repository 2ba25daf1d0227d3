//! The physical node at the bottom of every chain.

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::trace;

use crate::core::{Error, Frame, Layer, LayerCore, Result};

/// Bottom layer: owns no protocol, only the byte stream.
///
/// Outbound frames are coalesced into one write buffer that the driver
/// drains with [`poll_transmit`](Self::poll_transmit). Inbound chunks are
/// forwarded upward unframed; the layer above reassembles them.
#[derive(Debug, Default)]
pub struct TransportLayer {
    core: LayerCore,
    outbound: BytesMut,
    closed: bool,
    destroyed: bool,
}

impl TransportLayer {
    /// Create a transport layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a chunk read from the socket.
    pub fn receive(&mut self, bytes: &[u8]) {
        if bytes.is_empty() || self.destroyed {
            return;
        }
        trace!(len = bytes.len(), "transport read");
        self.core.forward_up(Frame::new(Bytes::copy_from_slice(bytes)));
    }

    /// Take everything ready to be written to the socket.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.send_next_message();
        if self.outbound.is_empty() {
            return None;
        }
        let bytes = self.outbound.split().freeze();
        trace!(len = bytes.len(), "transport write");
        Some(bytes)
    }

    /// Bytes waiting for the driver.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len() + self.core.queue.size(false)
    }
}

impl Layer for TransportLayer {
    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn lower_mut(&mut self) -> Option<&mut dyn Layer> {
        None
    }

    fn send_next_message(&mut self) {
        if self.destroyed {
            self.core.queue.clear();
            return;
        }
        while let Some(frame) = self.core.queue.dequeue() {
            self.outbound.extend_from_slice(&frame.data);
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<()> {
        self.core.forward_up(frame);
        Ok(())
    }

    fn handle_destroy(&mut self, _error: &Error) {
        self.outbound.clear();
        self.destroyed = true;
        self.closed = true;
    }

    fn process_inbound(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_timeout(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
