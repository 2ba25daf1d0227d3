//! Modbus Application Protocol header (big-endian).
//!
//! ```text
//! +----------------+-------------+--------+---------+-----+
//! | Transaction id | Protocol id | Length | Unit id | PDU |
//! | u16            | u16 (0)     | u16    | u8      | ... |
//! +----------------+-------------+--------+---------+-----+
//! ```
//! `Length` counts the unit id and the PDU.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::FrameError;

/// Header size including the unit id.
pub const MBAP_SIZE: usize = 7;

/// Bytes before the length-counted part of a frame.
const PREFIX_SIZE: usize = 6;

/// Function code bit marking an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// Parsed MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction id echoed by the server.
    pub transaction_id: u16,
    /// Protocol id, 0 for Modbus.
    pub protocol_id: u16,
    /// Length of unit id plus PDU.
    pub length: u16,
    /// Unit id.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse from the start of `bytes`.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MBAP_SIZE {
            return Err(FrameError::TooShort {
                expected: MBAP_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            transaction_id: bytes.get_u16(),
            protocol_id: bytes.get_u16(),
            length: bytes.get_u16(),
            unit_id: bytes.get_u8(),
        })
    }
}

/// Build a request frame.
pub fn encode(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MBAP_SIZE + pdu.len());
    buf.put_u16(transaction_id);
    buf.put_u16(0);
    buf.put_u16((pdu.len() + 1) as u16);
    buf.put_u8(unit_id);
    buf.put_slice(pdu);
    buf.freeze()
}

/// Frame length function for the stream reassembler.
pub fn frame_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < PREFIX_SIZE {
        return None;
    }
    let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
    Some(PREFIX_SIZE + length)
}

/// Description of a Modbus exception code.
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        // read holding registers 0..2 on unit 1
        let frame = encode(0x0102, 1, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(hex::encode(&frame), "010200000006010300000002");
        assert_eq!(frame_length(&frame), Some(frame.len()));
    }

    #[test]
    fn test_header_decode() {
        let header = MbapHeader::decode(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83, 0x02])
            .unwrap();
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.length, 3);
        assert_eq!(header.unit_id, 0x11);
    }

    #[test]
    fn test_frame_length_needs_prefix() {
        assert_eq!(frame_length(&[0, 1, 0, 0, 0]), None);
    }
}
