//! Async client handles.
//!
//! Each handle owns nothing but a channel into a driver task that owns the
//! layer chain and the socket.

#[allow(clippy::module_inception)]
mod client;
mod config;
#[cfg(feature = "modbus")]
mod modbus;

pub use client::{EipClient, UnsolicitedReceiver};
pub use config::{ClientConfig, ClientConfigBuilder};
#[cfg(feature = "modbus")]
pub use modbus::ModbusClient;
