//! Encapsulation header codec.
//!
//! Wire format (24 bytes, little-endian), followed by `length` payload bytes:
//! ```text
//! +---------+--------+----------------+--------+-----------------+---------+
//! | Command | Length | Session handle | Status | Sender context  | Options |
//! | 2 bytes | 2 bytes| 4 bytes        | 4 bytes| 8 bytes         | 4 bytes |
//! +---------+--------+----------------+--------+-----------------+---------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::{Error, FrameError};

/// Encapsulation header size.
pub const HEADER_SIZE: usize = 24;

/// RegisterSession body: protocol version 1, no option flags.
pub const REGISTER_SESSION_BODY: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Encapsulation command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// No operation; the target never replies.
    Nop = 0x0000,
    /// Enumerate communication services.
    ListServices = 0x0004,
    /// Identify the device.
    ListIdentity = 0x0063,
    /// Enumerate non-CIP interfaces.
    ListInterfaces = 0x0064,
    /// Open a session.
    RegisterSession = 0x0065,
    /// Close a session; the target never replies.
    UnregisterSession = 0x0066,
    /// Unconnected request/reply.
    SendRRData = 0x006F,
    /// Connected data.
    SendUnitData = 0x0070,
    /// Interface status.
    IndicateStatus = 0x0072,
    /// Cancel a pending request.
    Cancel = 0x0073,
}

impl Command {
    /// Parse a command code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Self::Nop),
            0x0004 => Some(Self::ListServices),
            0x0063 => Some(Self::ListIdentity),
            0x0064 => Some(Self::ListInterfaces),
            0x0065 => Some(Self::RegisterSession),
            0x0066 => Some(Self::UnregisterSession),
            0x006F => Some(Self::SendRRData),
            0x0070 => Some(Self::SendUnitData),
            0x0072 => Some(Self::IndicateStatus),
            0x0073 => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the target answers this command.
    pub fn expects_reply(self) -> bool {
        !matches!(self, Self::Nop | Self::UnregisterSession)
    }

    /// Check if this is an administrative command matched by code alone.
    pub fn is_administrative(self) -> bool {
        matches!(
            self,
            Self::Nop
                | Self::ListServices
                | Self::ListIdentity
                | Self::ListInterfaces
                | Self::IndicateStatus
                | Self::Cancel
        )
    }
}

/// 8-byte sender context echoed by the target.
///
/// Treated as one little-endian counter: increments start at the low byte
/// and carry upward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SenderContext([u8; 8]);

impl SenderContext {
    /// Wrap raw context bytes.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw context bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Add one, carrying from the low byte.
    pub fn increment(&mut self) {
        for byte in &mut self.0 {
            let (value, carry) = byte.overflowing_add(1);
            *byte = value;
            if !carry {
                break;
            }
        }
    }

    /// Context as an integer key.
    pub fn to_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

/// Parsed encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulationHeader {
    /// Raw command code (may be one this client does not know).
    pub command: u16,
    /// Payload length.
    pub length: u16,
    /// Session handle.
    pub session_handle: u32,
    /// Status word, 0 on success.
    pub status: u32,
    /// Sender context.
    pub sender_context: SenderContext,
    /// Options word.
    pub options: u32,
}

impl EncapsulationHeader {
    /// Header for an outbound request.
    pub fn new(
        command: Command,
        session_handle: u32,
        sender_context: SenderContext,
        length: u16,
    ) -> Self {
        Self {
            command: command.as_u16(),
            length,
            session_handle,
            status: 0,
            sender_context,
            options: 0,
        }
    }

    /// Known command, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.command)
    }

    /// Serialize into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u16_le(self.command);
        buf.put_u16_le(self.length);
        buf.put_u32_le(self.session_handle);
        buf.put_u32_le(self.status);
        buf.put_slice(self.sender_context.as_bytes());
        buf.put_u32_le(self.options);
    }

    /// Parse from the start of `bytes`.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let command = bytes.get_u16_le();
        let length = bytes.get_u16_le();
        let session_handle = bytes.get_u32_le();
        let status = bytes.get_u32_le();
        let mut context = [0u8; 8];
        bytes.copy_to_slice(&mut context);
        let options = bytes.get_u32_le();

        Ok(Self {
            command,
            length,
            session_handle,
            status,
            sender_context: SenderContext(context),
            options,
        })
    }

    /// Map a nonzero status to an error.
    pub fn check_status(&self) -> Result<(), Error> {
        match self.status {
            0 => Ok(()),
            status => Err(Error::Encapsulation {
                status,
                description: status_description(status),
            }),
        }
    }
}

/// Build a complete encapsulation packet.
pub fn encode(
    command: Command,
    session_handle: u32,
    sender_context: SenderContext,
    payload: &[u8],
) -> Bytes {
    let header = EncapsulationHeader::new(
        command,
        session_handle,
        sender_context,
        payload.len() as u16,
    );
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    header.encode_into(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Frame length function for the stream reassembler.
pub fn frame_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }
    let length = u16::from_le_bytes([buffer[2], buffer[3]]) as usize;
    Some(HEADER_SIZE + length)
}

/// Description of an encapsulation status code.
pub fn status_description(status: u32) -> &'static str {
    match status {
        0x0000 => "success",
        0x0001 => "invalid or unsupported encapsulation command",
        0x0002 => "insufficient memory resources to handle the command",
        0x0003 => "poorly formed or incorrect data in the command",
        0x0064 => "invalid session handle",
        0x0065 => "invalid message length",
        0x0069 => "unsupported encapsulation protocol revision",
        _ => "unknown encapsulation status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_session_wire_image() {
        let packet = encode(
            Command::RegisterSession,
            0,
            SenderContext::default(),
            &REGISTER_SESSION_BODY,
        );
        assert_eq!(
            hex::encode(&packet),
            concat!(
                "6500", "0400", "00000000", "00000000", "0000000000000000", "00000000",
                "01000000"
            )
        );
    }

    #[test]
    fn test_header_decode() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&0x006Fu16.to_le_bytes());
        bytes[2..4].copy_from_slice(&10u16.to_le_bytes());
        bytes[4..8].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&0x64u32.to_le_bytes());
        bytes[12] = 9;

        let header = EncapsulationHeader::decode(&bytes).unwrap();
        assert_eq!(header.command(), Some(Command::SendRRData));
        assert_eq!(header.length, 10);
        assert_eq!(header.session_handle, 0x1234_5678);
        assert_eq!(header.sender_context.to_u64(), 9);
        assert!(matches!(
            header.check_status(),
            Err(Error::Encapsulation {
                status: 0x64,
                description: "invalid session handle"
            })
        ));
    }

    #[test]
    fn test_header_too_short() {
        assert_eq!(
            EncapsulationHeader::decode(&[0u8; 10]),
            Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: 10
            })
        );
    }

    #[test]
    fn test_sender_context_carries() {
        let mut context = SenderContext::from_bytes([0xFF, 0xFF, 0, 0, 0, 0, 0, 0]);
        context.increment();
        assert_eq!(context.as_bytes(), &[0, 0, 1, 0, 0, 0, 0, 0]);

        let mut context = SenderContext::from_bytes([0xFF; 8]);
        context.increment();
        assert_eq!(context.to_u64(), 0);
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0u8; 23]), None);
        let mut header = [0u8; HEADER_SIZE];
        header[2] = 0x10;
        header[3] = 0x01;
        assert_eq!(frame_length(&header), Some(HEADER_SIZE + 0x0110));
    }

    #[test]
    fn test_command_classes() {
        assert!(!Command::Nop.expects_reply());
        assert!(Command::ListIdentity.expects_reply());
        assert!(Command::ListIdentity.is_administrative());
        assert!(!Command::SendRRData.is_administrative());
        assert_eq!(Command::from_u16(0x1234), None);
    }
}
