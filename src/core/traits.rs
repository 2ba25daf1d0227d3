//! Core traits for the layered pipeline.
//!
//! A pipeline is a chain of [`Layer`]s. Each layer owns the layer beneath it
//! (toward the wire); the topmost layer is an [`Endpoint`] owned by the
//! driver task.
//!
//! ```text
//!   application ──► Endpoint (e.g. ConnectedLayer)
//!                      │ send() / poll_forward()
//!                   EncapsulationLayer
//!                      │
//!                   TransportLayer ◄──► socket (driver)
//! ```

use bytes::Bytes;
use tokio::time::Instant;

use super::error::{Error, Result};
use super::frame::Frame;
use super::layer::LayerCore;
use crate::transport::TransportLayer;

/// A stage of the protocol pipeline.
///
/// Concrete layers implement the hooks; queueing, forwarding and teardown
/// come from the provided methods and [`forward`](super::forward).
pub trait Layer {
    /// Shared queue/outbox/reassembler state.
    fn core(&self) -> &LayerCore;

    /// Mutable access to the shared state.
    fn core_mut(&mut self) -> &mut LayerCore;

    /// The layer beneath this one, if any.
    fn lower_mut(&mut self) -> Option<&mut dyn Layer>;

    /// Pull frames from this layer's queue and push them toward the wire.
    fn send_next_message(&mut self);

    /// Interpret one complete inbound frame.
    ///
    /// An `Err` is a protocol violation and destroys the chain.
    fn handle_data(&mut self, frame: Frame) -> Result<()>;

    /// Release layer-specific resources and reject pending entries.
    fn handle_destroy(&mut self, error: &Error);

    /// Pull frames the lower layer forwarded and deliver them here.
    fn process_inbound(&mut self) -> Result<()>;

    /// Earliest timer in this layer or below.
    fn poll_timeout(&self) -> Option<Instant>;

    /// Fire every timer due at `now`, here and below.
    fn handle_timeout(&mut self, now: Instant) -> Result<()>;

    /// Start a graceful shutdown of this layer and everything below it.
    fn close(&mut self);

    /// Check if a graceful shutdown has finished.
    fn is_closed(&self) -> bool;

    /// Enqueue a frame on the lower layer (or on this layer if it is the
    /// bottom of the chain) and let that layer transmit.
    fn send(&mut self, frame: Frame, priority: bool) {
        match self.lower_mut() {
            Some(lower) => {
                lower.core_mut().queue.enqueue(frame, priority);
                lower.send_next_message();
            }
            None => {
                self.core_mut().queue.enqueue(frame, priority);
                self.send_next_message();
            }
        }
    }

    /// Next frame this layer forwarded upward.
    fn poll_forward(&mut self) -> Option<Frame> {
        self.core_mut().upward.pop_front()
    }

    /// Tear the layer down: clear queues and reject everything pending.
    fn destroy(&mut self, error: Error) {
        self.core_mut().clear();
        self.handle_destroy(&error);
    }
}

/// Topmost layer of a pipeline, driven by [`transport::run`](crate::transport::run).
pub trait Endpoint: Layer + Send + 'static {
    /// Application requests this endpoint accepts.
    type Command: Send + 'static;

    /// Handle one application request.
    fn handle_command(&mut self, command: Self::Command);

    /// The physical node at the bottom of the chain.
    fn transport_mut(&mut self) -> &mut TransportLayer;

    /// Feed raw bytes read from the socket through the chain.
    fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport_mut().receive(bytes);
        self.process_inbound()
    }
}

/// Request codec collaborator: turns a logical request into bytes and a
/// reply's bytes back into a decoded value or device error.
pub trait RequestCodec {
    /// Decoded reply type.
    type Reply;

    /// Encode the request body.
    fn encode(&self) -> Bytes;

    /// Decode reply bytes, mapping a device error status to `Err`.
    fn decode(&self, reply: Bytes) -> Result<Self::Reply>;
}
