//! Core pipeline building blocks.
//!
//! Everything here is transport- and protocol-agnostic: counters, queues,
//! reassembly, correlation, and the [`Layer`] trait every concrete layer
//! implements.

pub mod constants;
mod correlation;
mod counter;
mod error;
mod frame;
mod layer;
mod queue;
mod reassembler;
mod traits;

pub use correlation::{respond, Completion, CorrelationRegistry, Responder};
pub use counter::SequenceCounter;
pub use error::{Error, FrameError, Result};
pub use frame::{ContextKey, Frame, RoutingInfo};
pub use layer::{forward, LayerCore};
pub use queue::FrameQueue;
pub use reassembler::{FrameLength, StreamReassembler};
pub use traits::{Endpoint, Layer, RequestCodec};
