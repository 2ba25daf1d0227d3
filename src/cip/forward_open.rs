//! Forward Open / Forward Close bodies and connection parameters.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::message::{service, MessageRouterRequest, CONNECTION_MANAGER_PATH};
use crate::core::FrameError;

/// Largest connection size the 16-bit parameter form can carry.
pub const MAX_NORMAL_SIZE: u16 = 511;

/// Connection size used when the target refuses Large Forward Open.
pub const FALLBACK_SIZE: u16 = 500;

/// Network connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionType {
    /// Null connection.
    Null = 0,
    /// Multicast.
    Multicast = 1,
    /// Point to point.
    PointToPoint = 2,
}

/// Network connection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPriority {
    /// Low.
    Low = 0,
    /// High.
    High = 1,
    /// Scheduled.
    Scheduled = 2,
    /// Urgent.
    Urgent = 3,
}

/// Network connection parameters word.
///
/// ```text
/// normal (u16): 15 owner | 14-13 type | 11-10 priority | 9 variable | 8-0 size
/// large  (u32): 31 owner | 30-29 type | 27-26 priority | 25 variable | 15-0 size
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConnectionParameters {
    /// Redundant owner bit.
    pub redundant_owner: bool,
    /// Connection type.
    pub connection_type: ConnectionType,
    /// Priority.
    pub priority: ConnectionPriority,
    /// Variable (true) or fixed (false) size.
    pub variable_size: bool,
    /// Maximum connection size in bytes.
    pub max_size: u16,
}

impl NetworkConnectionParameters {
    /// Check if the size needs the 32-bit form.
    pub fn is_large(&self) -> bool {
        self.max_size > MAX_NORMAL_SIZE
    }

    /// 16-bit form. The size is truncated to 9 bits.
    pub fn encode_normal(&self) -> u16 {
        (u16::from(self.redundant_owner) << 15)
            | ((self.connection_type as u16 & 0x3) << 13)
            | ((self.priority as u16 & 0x3) << 10)
            | (u16::from(self.variable_size) << 9)
            | (self.max_size & 0x01FF)
    }

    /// 32-bit form.
    pub fn encode_large(&self) -> u32 {
        (u32::from(self.redundant_owner) << 31)
            | ((self.connection_type as u32 & 0x3) << 29)
            | ((self.priority as u32 & 0x3) << 26)
            | (u32::from(self.variable_size) << 25)
            | u32::from(self.max_size)
    }
}

/// Settings an originator supplies for Forward Open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Connection path to the target (port segment, then class/instance).
    pub route_path: Bytes,
    /// Requested packet interval in microseconds, both directions.
    pub rpi_us: u32,
    /// Connection timeout multiplier exponent: timeout is RPI × 4 × 2^n.
    pub timeout_multiplier: u8,
    /// Priority/tick time byte.
    pub priority_tick: u8,
    /// Timeout ticks.
    pub timeout_ticks: u8,
    /// Originator vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// Maximum connection size in bytes.
    pub max_size: u16,
    /// Connection type, both directions.
    pub connection_type: ConnectionType,
    /// Connection priority, both directions.
    pub priority: ConnectionPriority,
    /// Variable-size connection.
    pub variable_size: bool,
    /// Redundant owner.
    pub redundant_owner: bool,
    /// Transport class/trigger byte: bit 7 direction, bits 6-4 trigger, bits 3-0 class.
    pub transport_class_trigger: u8,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            route_path: Bytes::from_static(&[0x01, 0x00, 0x20, 0x02, 0x24, 0x01]),
            rpi_us: 2_000_000,
            timeout_multiplier: 1,
            priority_tick: 0x0A,
            timeout_ticks: 0x05,
            vendor_id: 0x1337,
            originator_serial: 0x0042_4242,
            max_size: 500,
            connection_type: ConnectionType::PointToPoint,
            priority: ConnectionPriority::Low,
            variable_size: true,
            redundant_owner: false,
            transport_class_trigger: 0xA3,
        }
    }
}

impl ConnectionParameters {
    /// Network connection parameters with an explicit size.
    pub fn network_parameters(&self, max_size: u16) -> NetworkConnectionParameters {
        NetworkConnectionParameters {
            redundant_owner: self.redundant_owner,
            connection_type: self.connection_type,
            priority: self.priority,
            variable_size: self.variable_size,
            max_size,
        }
    }
}

/// Identifiers drawn for one Forward Open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIds {
    /// O→T connection id proposed by the originator.
    pub o_to_t: u32,
    /// T→O connection id.
    pub t_to_o: u32,
    /// Connection serial number.
    pub serial: u16,
}

/// Forward Open request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOpenRequest {
    /// Priority/tick time byte.
    pub priority_tick: u8,
    /// Timeout ticks.
    pub timeout_ticks: u8,
    /// Proposed ids and serial.
    pub ids: ConnectionIds,
    /// Vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// Timeout multiplier exponent.
    pub timeout_multiplier: u8,
    /// O→T requested packet interval (µs).
    pub o_to_t_rpi: u32,
    /// O→T network parameters.
    pub o_to_t_params: NetworkConnectionParameters,
    /// T→O requested packet interval (µs).
    pub t_to_o_rpi: u32,
    /// T→O network parameters.
    pub t_to_o_params: NetworkConnectionParameters,
    /// Transport class/trigger byte.
    pub transport_class_trigger: u8,
    /// Connection path.
    pub path: Bytes,
    /// Use Large Forward Open with 32-bit network parameters.
    pub large: bool,
}

impl ForwardOpenRequest {
    /// Build a request from connection settings.
    ///
    /// A normal request whose configured size does not fit the 16-bit form
    /// uses [`FALLBACK_SIZE`].
    pub fn new(params: &ConnectionParameters, ids: ConnectionIds, large: bool) -> Self {
        let size = if large || params.max_size <= MAX_NORMAL_SIZE {
            params.max_size
        } else {
            FALLBACK_SIZE
        };
        let network = params.network_parameters(size);
        Self {
            priority_tick: params.priority_tick,
            timeout_ticks: params.timeout_ticks,
            ids,
            vendor_id: params.vendor_id,
            originator_serial: params.originator_serial,
            timeout_multiplier: params.timeout_multiplier,
            o_to_t_rpi: params.rpi_us,
            o_to_t_params: network,
            t_to_o_rpi: params.rpi_us,
            t_to_o_params: network,
            transport_class_trigger: params.transport_class_trigger,
            path: params.route_path.clone(),
            large,
        }
    }

    /// Forward Open or Large Forward Open.
    pub fn service(&self) -> u8 {
        if self.large {
            service::LARGE_FORWARD_OPEN
        } else {
            service::FORWARD_OPEN
        }
    }

    /// Serialize the service data.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(44 + self.path.len());
        buf.put_u8(self.priority_tick);
        buf.put_u8(self.timeout_ticks);
        buf.put_u32_le(self.ids.o_to_t);
        buf.put_u32_le(self.ids.t_to_o);
        buf.put_u16_le(self.ids.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u8(self.timeout_multiplier);
        buf.put_slice(&[0, 0, 0]);
        buf.put_u32_le(self.o_to_t_rpi);
        self.put_network_parameters(&mut buf, &self.o_to_t_params);
        buf.put_u32_le(self.t_to_o_rpi);
        self.put_network_parameters(&mut buf, &self.t_to_o_params);
        buf.put_u8(self.transport_class_trigger);
        put_path(&mut buf, &self.path);
        buf.freeze()
    }

    fn put_network_parameters(&self, buf: &mut BytesMut, params: &NetworkConnectionParameters) {
        if self.large {
            buf.put_u32_le(params.encode_large());
        } else {
            buf.put_u16_le(params.encode_normal());
        }
    }

    /// Message-router request addressed to the Connection Manager.
    pub fn to_message(&self) -> MessageRouterRequest {
        MessageRouterRequest::new(
            self.service(),
            Bytes::from_static(&CONNECTION_MANAGER_PATH),
            self.encode_body(),
        )
    }
}

/// Successful Forward Open reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOpenReply {
    /// O→T connection id chosen by the target.
    pub o_to_t_id: u32,
    /// T→O connection id.
    pub t_to_o_id: u32,
    /// Connection serial number.
    pub serial: u16,
    /// Vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// O→T actual packet interval (µs).
    pub o_to_t_api: u32,
    /// T→O actual packet interval (µs).
    pub t_to_o_api: u32,
    /// Application reply.
    pub application_reply: Bytes,
}

impl ForwardOpenReply {
    const SIZE: usize = 26;

    /// Parse the service data of a successful reply.
    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < Self::SIZE {
            return Err(FrameError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let o_to_t_id = bytes.get_u32_le();
        let t_to_o_id = bytes.get_u32_le();
        let serial = bytes.get_u16_le();
        let vendor_id = bytes.get_u16_le();
        let originator_serial = bytes.get_u32_le();
        let o_to_t_api = bytes.get_u32_le();
        let t_to_o_api = bytes.get_u32_le();
        let application_reply = take_application_reply(&mut bytes)?;

        Ok(Self {
            o_to_t_id,
            t_to_o_id,
            serial,
            vendor_id,
            originator_serial,
            o_to_t_api,
            t_to_o_api,
            application_reply,
        })
    }

    /// The slower of the two actual packet intervals.
    pub fn packet_interval(&self) -> Duration {
        Duration::from_micros(u64::from(self.o_to_t_api.max(self.t_to_o_api)))
    }
}

/// Forward Close request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCloseRequest {
    /// Priority/tick time byte.
    pub priority_tick: u8,
    /// Timeout ticks.
    pub timeout_ticks: u8,
    /// Serial number of the connection to close.
    pub serial: u16,
    /// Vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// Connection path.
    pub path: Bytes,
}

impl ForwardCloseRequest {
    /// Build a request closing the connection with `serial`.
    pub fn new(params: &ConnectionParameters, serial: u16) -> Self {
        Self {
            priority_tick: params.priority_tick,
            timeout_ticks: params.timeout_ticks,
            serial,
            vendor_id: params.vendor_id,
            originator_serial: params.originator_serial,
            path: params.route_path.clone(),
        }
    }

    /// Serialize the service data.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.path.len());
        buf.put_u8(self.priority_tick);
        buf.put_u8(self.timeout_ticks);
        buf.put_u16_le(self.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u8(self.path.len().div_ceil(2) as u8);
        buf.put_u8(0);
        buf.put_slice(&self.path);
        if self.path.len() % 2 == 1 {
            buf.put_u8(0);
        }
        buf.freeze()
    }

    /// Message-router request addressed to the Connection Manager.
    pub fn to_message(&self) -> MessageRouterRequest {
        MessageRouterRequest::new(
            service::FORWARD_CLOSE,
            Bytes::from_static(&CONNECTION_MANAGER_PATH),
            self.encode_body(),
        )
    }
}

/// Successful Forward Close reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCloseReply {
    /// Connection serial number.
    pub serial: u16,
    /// Vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// Application reply.
    pub application_reply: Bytes,
}

impl ForwardCloseReply {
    const SIZE: usize = 10;

    /// Parse the service data of a successful reply.
    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < Self::SIZE {
            return Err(FrameError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let serial = bytes.get_u16_le();
        let vendor_id = bytes.get_u16_le();
        let originator_serial = bytes.get_u32_le();
        let application_reply = take_application_reply(&mut bytes)?;

        Ok(Self {
            serial,
            vendor_id,
            originator_serial,
            application_reply,
        })
    }
}

/// Connection timeout for a packet interval: interval × 4 × 2^multiplier.
pub fn connection_timeout(packet_interval: Duration, timeout_multiplier: u8) -> Duration {
    packet_interval * 4 * (1u32 << timeout_multiplier.min(7))
}

/// Keep-alive resend period: three quarters of the connection timeout.
pub fn keep_alive_interval(packet_interval: Duration, timeout_multiplier: u8) -> Duration {
    connection_timeout(packet_interval, timeout_multiplier) * 3 / 4
}

fn put_path(buf: &mut BytesMut, path: &[u8]) {
    buf.put_u8(path.len().div_ceil(2) as u8);
    buf.put_slice(path);
    if path.len() % 2 == 1 {
        buf.put_u8(0);
    }
}

/// Application reply: size in words, reserved byte, data.
fn take_application_reply(bytes: &mut Bytes) -> Result<Bytes, FrameError> {
    let words = bytes.get_u8() as usize;
    bytes.advance(1);
    let len = words * 2;
    if bytes.len() < len {
        return Err(FrameError::LengthMismatch {
            declared: len,
            available: bytes.len(),
        });
    }
    Ok(bytes.split_to(len))
}
