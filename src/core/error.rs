//! Error types for the EtherNet/IP pipeline.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Structural decode failures.
///
/// Any of these means the framing on the wire can no longer be trusted, so
/// they always surface as [`Error::Protocol`] and destroy the chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame shorter than its fixed layout requires.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size needed.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Common Packet Format item this client does not understand.
    #[error("unknown common packet item type {0:#06x}")]
    UnknownItem(u16),

    /// Known item type in a position or command where it is not allowed.
    #[error("unexpected common packet item type {0:#06x}")]
    UnexpectedItem(u16),

    /// Reply carried a different number of packet items than its command allows.
    #[error("unexpected item count: expected {expected}, got {actual}")]
    UnexpectedItemCount {
        /// Item count the command defines.
        expected: u16,
        /// Item count on the wire.
        actual: u16,
    },

    /// Declared length disagrees with the bytes that follow.
    #[error("length mismatch: declared {declared}, available {available}")]
    LengthMismatch {
        /// Length field value.
        declared: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Reply service code does not answer the request that was sent.
    #[error("invalid reply service {0:#04x}")]
    InvalidService(u8),
}

/// Errors surfaced by the pipeline to callers.
///
/// Cloneable so a single destruction cause can reject every outstanding
/// request.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Malformed frame from the peer.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    /// A pending request saw no reply in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Nonzero status in an encapsulation header.
    #[error("encapsulation status {status:#06x}: {description}")]
    Encapsulation {
        /// Raw status word.
        status: u32,
        /// Description from the encapsulation status table.
        description: &'static str,
    },

    /// Nonzero CIP general status in a message-router reply.
    #[error("CIP status {status:#04x}: {description}")]
    Cip {
        /// General status code.
        status: u8,
        /// Extended status words.
        extended: Vec<u16>,
        /// Description from the general status table.
        description: &'static str,
    },

    /// Forward Open refused in a way no fallback can recover from.
    #[error("connection rejected with CIP status {status:#04x} ({extended:04x?}): {description}")]
    ConnectionRejected {
        /// General status code.
        status: u8,
        /// Extended status words.
        extended: Vec<u16>,
        /// Description from the general status table.
        description: &'static str,
    },

    /// Modbus exception response.
    #[error("modbus exception {code:#04x}: {description}")]
    ModbusException {
        /// Exception code.
        code: u8,
        /// Human readable meaning.
        description: &'static str,
    },

    /// Socket failure.
    #[error("transport failure: {0}")]
    Transport(Arc<io::Error>),

    /// Peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Pipeline shut down locally.
    #[error("pipeline closed")]
    Closed,

    /// Operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// A newer request claimed the same correlation handle.
    #[error("correlation handle reused before reply arrived")]
    ContextSuperseded,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(Arc::new(err))
    }
}

impl Error {
    /// Check if this error destroys the chain it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::Transport(_)
                | Error::ConnectionClosed
                | Error::ConnectionRejected { .. }
        )
    }

    /// Check if this error was reported by the device rather than the link.
    pub fn is_device_status(&self) -> bool {
        matches!(
            self,
            Error::Encapsulation { .. }
                | Error::Cip { .. }
                | Error::ConnectionRejected { .. }
                | Error::ModbusException { .. }
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
