//! Modbus TCP.
//!
//! A sibling of the encapsulation layer: [`ModbusLayer`] sits directly on a
//! [`TransportLayer`](crate::transport::TransportLayer), frames PDUs with an
//! MBAP header and matches replies by transaction id.

mod layer;
pub mod mbap;

pub use layer::{ModbusLayer, ModbusRequest};
pub use mbap::MbapHeader;
