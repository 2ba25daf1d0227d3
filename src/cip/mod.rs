//! Common Industrial Protocol messaging.
//!
//! [`MessageRouterRequest`] is the request codec used for both message
//! kinds. Unconnected requests ride in SendRRData and are correlated by
//! sender context; connected requests ride in SendUnitData over a
//! connection negotiated by [`ConnectedLayer`] and are correlated by
//! sequence count.

mod connection;
pub mod forward_open;
pub mod message;
pub mod status;

pub use connection::{ConnectedLayer, ConnectionInfo, ConnectionState, Request};
pub use forward_open::{
    ConnectionParameters, ConnectionPriority, ConnectionType, NetworkConnectionParameters,
};
pub use message::{MessageRouterReply, MessageRouterRequest, CONNECTION_MANAGER_PATH};
