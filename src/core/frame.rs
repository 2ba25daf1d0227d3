//! Frames passed between layers.

use bytes::Bytes;
use tokio::time::Duration;

use super::error::Error;

/// Correlation handle a layer attaches to a request so the reply can find it.
pub type ContextKey = u64;

/// Routing metadata that travels with a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingInfo {
    /// Frame belongs to a connected (Class 3) exchange.
    pub connected: bool,
    /// Connection id the frame is addressed with on the way down, or the
    /// caller-side id it was attributed to on the way up.
    pub connection_id: Option<u32>,
    /// Connection id the peer uses when replying.
    pub reply_connection_id: Option<u32>,
}

impl RoutingInfo {
    /// Routing for an unconnected exchange.
    pub fn unconnected() -> Self {
        Self::default()
    }

    /// Routing for a connected exchange.
    pub fn connected(connection_id: u32, reply_connection_id: u32) -> Self {
        Self {
            connected: true,
            connection_id: Some(connection_id),
            reply_connection_id: Some(reply_connection_id),
        }
    }
}

/// An opaque byte payload plus routing and correlation metadata.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Payload bytes.
    pub data: Bytes,
    /// Routing metadata.
    pub routing: RoutingInfo,
    /// Correlation handle of the request this frame belongs to.
    pub context: Option<ContextKey>,
    /// Failure the layer beneath attached instead of a payload.
    pub fault: Option<Error>,
    /// How long a lower layer keeps the reply mapping for this request.
    /// `None` uses that layer's own request timeout.
    pub timeout: Option<Duration>,
}

impl Frame {
    /// Create a frame with no metadata.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attach routing metadata.
    pub fn with_routing(mut self, routing: RoutingInfo) -> Self {
        self.routing = routing;
        self
    }

    /// Attach a correlation handle.
    pub fn with_context(mut self, context: ContextKey) -> Self {
        self.context = Some(context);
        self
    }

    /// Bound how long the reply to this frame is awaited below.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Frame that carries only a failure for the given handle.
    pub fn fault(context: Option<ContextKey>, routing: RoutingInfo, error: Error) -> Self {
        Self {
            data: Bytes::new(),
            routing,
            context,
            fault: Some(error),
            timeout: None,
        }
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
