//! CIP general and Connection Manager extended status tables.

use crate::core::Error;

/// Success.
pub const SUCCESS: u8 = 0x00;
/// Connection failure; details in the extended status.
pub const CONNECTION_FAILURE: u8 = 0x01;
/// More data follows in a later reply.
pub const PARTIAL_TRANSFER: u8 = 0x06;
/// The object does not implement the service.
pub const SERVICE_NOT_SUPPORTED: u8 = 0x08;

/// Extended status of a Forward Open that collides with an open connection.
pub const DUPLICATE_FORWARD_OPEN: u16 = 0x0100;
/// Short form of the duplicate-connection status some targets report.
pub const CONNECTION_IN_USE: u16 = 0x0001;

/// Check if a Forward Open rejection means the connection already exists.
pub fn is_duplicate_connection(status: u8, extended: &[u16]) -> bool {
    status == CONNECTION_FAILURE
        && matches!(extended.first(), Some(&(DUPLICATE_FORWARD_OPEN | CONNECTION_IN_USE)))
}

/// Check if a general status carries a usable reply.
pub fn is_success(status: u8) -> bool {
    matches!(status, SUCCESS | PARTIAL_TRANSFER)
}

/// Description of a general status code.
pub fn general_status_description(status: u8) -> &'static str {
    match status {
        0x00 => "success",
        0x01 => "connection failure",
        0x02 => "resource unavailable",
        0x03 => "invalid parameter value",
        0x04 => "path segment error",
        0x05 => "path destination unknown",
        0x06 => "partial transfer",
        0x07 => "connection lost",
        0x08 => "service not supported",
        0x09 => "invalid attribute value",
        0x0A => "attribute list error",
        0x0B => "already in requested mode/state",
        0x0C => "object state conflict",
        0x0D => "object already exists",
        0x0E => "attribute not settable",
        0x0F => "privilege violation",
        0x10 => "device state conflict",
        0x11 => "reply data too large",
        0x12 => "fragmentation of a primitive value",
        0x13 => "not enough data",
        0x14 => "attribute not supported",
        0x15 => "too much data",
        0x16 => "object does not exist",
        0x17 => "service fragmentation sequence not in progress",
        0x18 => "no stored attribute data",
        0x19 => "store operation failure",
        0x1A => "routing failure, request packet too large",
        0x1B => "routing failure, response packet too large",
        0x1C => "missing attribute list entry data",
        0x1D => "invalid attribute value list",
        0x1E => "embedded service error",
        0x1F => "vendor specific error",
        0x20 => "invalid parameter",
        0x21 => "write-once value or medium already written",
        0x22 => "invalid reply received",
        0x25 => "key failure in path",
        0x26 => "path size invalid",
        0x27 => "unexpected attribute in list",
        0x28 => "invalid member id",
        0x29 => "member not settable",
        0x2A => "group 2 only server general failure",
        _ => "unknown CIP status",
    }
}

/// Description of a Connection Manager extended status (general status 0x01).
pub fn connection_status_description(extended: u16) -> &'static str {
    match extended {
        0x0001 | 0x0100 => "connection in use or duplicate forward open",
        0x0103 => "transport class and trigger combination not supported",
        0x0106 => "ownership conflict",
        0x0107 => "target connection not found",
        0x0108 => "invalid network connection parameter",
        0x0109 => "invalid connection size",
        0x0110 => "target for connection not configured",
        0x0111 => "RPI not supported",
        0x0113 => "out of connections",
        0x0114 => "vendor id or product code mismatch",
        0x0115 => "product type mismatch",
        0x0116 => "revision mismatch",
        0x0117 => "invalid produced or consumed application path",
        0x0118 => "invalid or inconsistent configuration application path",
        0x011A => "target object out of connections",
        0x011B => "RPI smaller than production inhibit time",
        0x0203 => "connection timed out",
        0x0204 => "unconnected request timed out",
        0x0205 => "parameter error in unconnected request",
        0x0206 => "message too large for unconnected send",
        0x0301 => "no buffer memory available",
        0x0302 => "network bandwidth not available",
        0x0303 => "no consumed connection id filter available",
        0x0311 => "port not available",
        0x0312 => "link address not valid",
        0x0315 => "invalid segment in connection path",
        0x0316 => "error in forward close service connection path",
        _ => "unknown connection manager status",
    }
}

fn description(status: u8, extended: &[u16]) -> &'static str {
    match (status, extended.first()) {
        (CONNECTION_FAILURE, Some(&code)) => connection_status_description(code),
        _ => general_status_description(status),
    }
}

/// Error for a failed message-router reply.
pub fn cip_error(status: u8, extended: Vec<u16>) -> Error {
    Error::Cip {
        status,
        description: description(status, &extended),
        extended,
    }
}

/// Error for a refused Forward Open.
pub fn rejection_error(status: u8, extended: Vec<u16>) -> Error {
    Error::ConnectionRejected {
        status,
        description: description(status, &extended),
        extended,
    }
}
