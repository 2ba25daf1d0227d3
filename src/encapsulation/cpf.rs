//! Common Packet Format bodies of SendRRData and SendUnitData.
//!
//! ```text
//! +------------------+---------+-------+----------------+-------------+
//! | Interface handle | Timeout | Count | Address item   | Data item   |
//! | u32 (0)          | u16     | u16=2 | type,len,value | type,len,.. |
//! +------------------+---------+-------+----------------+-------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::FrameError;

/// Item type codes.
pub mod item_type {
    /// Null address (unconnected).
    pub const NULL_ADDRESS: u16 = 0x0000;
    /// Connected address carrying a connection id.
    pub const CONNECTED_ADDRESS: u16 = 0x00A1;
    /// Connected transport data.
    pub const CONNECTED_DATA: u16 = 0x00B1;
    /// Unconnected message data.
    pub const UNCONNECTED_DATA: u16 = 0x00B2;
}

/// Interface handle, timeout and item count.
const PREFIX_SIZE: usize = 8;
/// Item type and length.
const ITEM_HEADER_SIZE: usize = 4;

/// Payload and addressing recovered from a data command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Connection id from a connected address item; `None` for a null address.
    pub connection_id: Option<u32>,
    /// Contents of the data item.
    pub data: Bytes,
}

/// Size of the body [`encode_unconnected`] produces for `data_len` bytes.
pub fn unconnected_len(data_len: usize) -> usize {
    PREFIX_SIZE + ITEM_HEADER_SIZE + ITEM_HEADER_SIZE + data_len
}

/// Size of the body [`encode_connected`] produces for `data_len` bytes.
pub fn connected_len(data_len: usize) -> usize {
    PREFIX_SIZE + ITEM_HEADER_SIZE + 4 + ITEM_HEADER_SIZE + data_len
}

/// SendRRData body: null address plus unconnected data.
pub fn encode_unconnected(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(unconnected_len(data.len()));
    put_prefix(&mut buf);
    buf.put_u16_le(item_type::NULL_ADDRESS);
    buf.put_u16_le(0);
    buf.put_u16_le(item_type::UNCONNECTED_DATA);
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
    buf.freeze()
}

/// SendUnitData body: connected address plus connected data.
pub fn encode_connected(connection_id: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(connected_len(data.len()));
    put_prefix(&mut buf);
    buf.put_u16_le(item_type::CONNECTED_ADDRESS);
    buf.put_u16_le(4);
    buf.put_u32_le(connection_id);
    buf.put_u16_le(item_type::CONNECTED_DATA);
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
    buf.freeze()
}

fn put_prefix(buf: &mut BytesMut) {
    buf.put_u32_le(0);
    buf.put_u16_le(0);
    buf.put_u16_le(2);
}

/// Parse a SendRRData or SendUnitData body.
///
/// Exactly two items are accepted: an address item followed by a data item
/// of the matching kind.
pub fn decode(mut body: Bytes) -> Result<DataPacket, FrameError> {
    if body.len() < PREFIX_SIZE {
        return Err(FrameError::TooShort {
            expected: PREFIX_SIZE,
            actual: body.len(),
        });
    }
    body.advance(6);
    let count = body.get_u16_le();
    if count != 2 {
        return Err(FrameError::UnexpectedItemCount {
            expected: 2,
            actual: count,
        });
    }

    let (address_type, mut address) = take_item(&mut body)?;
    let connection_id = match address_type {
        item_type::NULL_ADDRESS => None,
        item_type::CONNECTED_ADDRESS => {
            if address.len() != 4 {
                return Err(FrameError::LengthMismatch {
                    declared: address.len(),
                    available: 4,
                });
            }
            Some(address.get_u32_le())
        }
        item_type::CONNECTED_DATA | item_type::UNCONNECTED_DATA => {
            return Err(FrameError::UnexpectedItem(address_type));
        }
        other => return Err(FrameError::UnknownItem(other)),
    };

    let (data_type, data) = take_item(&mut body)?;
    match (data_type, connection_id) {
        (item_type::UNCONNECTED_DATA, None) | (item_type::CONNECTED_DATA, Some(_)) => {}
        (
            item_type::UNCONNECTED_DATA
            | item_type::CONNECTED_DATA
            | item_type::NULL_ADDRESS
            | item_type::CONNECTED_ADDRESS,
            _,
        ) => return Err(FrameError::UnexpectedItem(data_type)),
        (other, _) => return Err(FrameError::UnknownItem(other)),
    }

    Ok(DataPacket {
        connection_id,
        data,
    })
}

fn take_item(body: &mut Bytes) -> Result<(u16, Bytes), FrameError> {
    if body.len() < ITEM_HEADER_SIZE {
        return Err(FrameError::TooShort {
            expected: ITEM_HEADER_SIZE,
            actual: body.len(),
        });
    }
    let kind = body.get_u16_le();
    let len = body.get_u16_le() as usize;
    if body.len() < len {
        return Err(FrameError::LengthMismatch {
            declared: len,
            available: body.len(),
        });
    }
    Ok((kind, body.split_to(len)))
}
