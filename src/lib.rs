//! # enip-protocol
//!
//! Client-side EtherNet/IP: encapsulation sessions, CIP connected
//! messaging, and a Modbus TCP sibling layer, all built from one layered
//! pipeline over a single stream transport.
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  ConnectedLayer (CIP)    │   │                          │
//! ├──────────────────────────┤   │  ModbusLayer (MBAP)      │
//! │  EncapsulationLayer      │   │                          │
//! ├──────────────────────────┴───┴──────────────────────────┤
//! │  TransportLayer + async driver (TCP)                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every layer is a sans-IO state machine implementing [`core::Layer`]. It
//! queues outbound frames, correlates replies to the requests that caused
//! them, and tears down everything it owns when the stream fails. One tokio
//! task per pipeline drives the chain; application code talks to it through
//! cloneable handles.
//!
//! ## Feature Flags
//!
//! - `modbus` (default): Modbus TCP layer and client
//!
//! ## Modules
//!
//! - [`core`]: counters, queues, reassembly, correlation, traits and errors
//! - [`transport`]: the physical node and the async driver
//! - [`encapsulation`]: EtherNet/IP encapsulation header, CPF and session
//! - [`cip`]: message-router codec, Forward Open/Close and connected messaging
//! - [`modbus`]: MBAP framing (requires `modbus` feature)
//! - [`client`]: async client handles and configuration
//!
//! ## Example Usage
//!
//! ```no_run
//! use enip_protocol::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let config = ClientConfig::builder()
//!     .rpi(500_000)
//!     .max_connection_size(4000)
//!     .build();
//! let (client, _unsolicited) = EipClient::connect("10.0.0.5:44818", config).await?;
//!
//! // Get Attribute Single: identity object, instance 1, attribute 7
//! let request = MessageRouterRequest::new(0x0E, vec![0x20, 0x01, 0x24, 0x01, 0x30, 0x07], vec![]);
//! let reply = client.call(&request, true).await?;
//! println!("product name: {:?}", reply.data);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod transport;

pub mod encapsulation;

pub mod cip;

// Modbus TCP (feature-gated)
#[cfg(feature = "modbus")]
#[cfg_attr(docsrs, doc(cfg(feature = "modbus")))]
pub mod modbus;

pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{Message, TransportLayer};

    pub use crate::encapsulation::{Command, EncapsulationLayer, SessionState};

    pub use crate::cip::{
        ConnectedLayer, ConnectionInfo, ConnectionParameters, ConnectionState,
        MessageRouterReply, MessageRouterRequest,
    };

    #[cfg(feature = "modbus")]
    pub use crate::modbus::{ModbusLayer, ModbusRequest};

    pub use crate::client::{ClientConfig, ClientConfigBuilder, EipClient};

    #[cfg(feature = "modbus")]
    pub use crate::client::ModbusClient;
}

// Re-export commonly used items at crate root
pub use crate::core::{Error, FrameError, Result};

pub use client::{ClientConfig, EipClient};

#[cfg(feature = "modbus")]
pub use client::ModbusClient;
