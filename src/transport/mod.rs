//! Transport layer.
//!
//! The bottom of every pipeline: [`TransportLayer`] is the physical node the
//! protocol layers enqueue bytes on, and [`run`] is the task that moves those
//! bytes over an async stream.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Connected messaging / Modbus          │
//! ├─────────────────────────────────────────┤
//! │   Encapsulation session                 │
//! ├─────────────────────────────────────────┤
//! │   TransportLayer                        │  ← This module
//! ├─────────────────────────────────────────┤
//! │   TCP (driver task)                     │
//! └─────────────────────────────────────────┘
//! ```

mod driver;
mod layer;

pub use driver::{run, Message};
pub use layer::TransportLayer;
