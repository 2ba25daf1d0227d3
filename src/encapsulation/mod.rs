//! EtherNet/IP encapsulation.
//!
//! Every message on the TCP stream is a 24-byte [`EncapsulationHeader`]
//! followed by a command-specific body. Unconnected and connected CIP
//! traffic travels in Common Packet Format bodies ([`cpf`]) of SendRRData
//! and SendUnitData respectively; everything else is an administrative
//! command matched to its reply by command code.

pub mod cpf;
mod header;
mod session;

pub use header::{
    encode, frame_length, status_description, Command, EncapsulationHeader, SenderContext,
    HEADER_SIZE, REGISTER_SESSION_BODY,
};
pub use session::{EncapsulationLayer, SessionState};
