//! Protocol constants.

use std::time::Duration;

/// Well-known TCP port for EtherNet/IP explicit messaging.
pub const ENIP_PORT: u16 = 44818;

/// Well-known TCP port for Modbus TCP.
pub const MODBUS_PORT: u16 = 502;

/// Unacknowledged bytes the encapsulation layer may put on the wire before it
/// must observe a response.
pub const SEND_BUDGET: usize = 1500;

/// Upper bound on how long a graceful disconnect waits for Forward Close.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Modulus of the connected-message sequence count.
pub const SEQUENCE_MODULUS: u64 = 1 << 16;

/// Modulus of caller correlation handles.
pub const CONTEXT_MODULUS: u64 = 1 << 32;

/// Read buffer used by the driver.
pub const READ_BUFFER_SIZE: usize = 4096;
