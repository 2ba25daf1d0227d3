//! Message-router request and reply codec.
//!
//! ```text
//! request: service | path words | path (padded to words) | data
//! reply:   service|0x80 | reserved | general status | ext words | ext status | data
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::status;
use crate::core::{FrameError, RequestCodec, Result};

/// Service codes.
pub mod service {
    /// Get Attributes All.
    pub const GET_ATTRIBUTES_ALL: u8 = 0x01;
    /// Get Attribute Single.
    pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
    /// Set Attribute Single.
    pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
    /// Forward Close.
    pub const FORWARD_CLOSE: u8 = 0x4E;
    /// Forward Open.
    pub const FORWARD_OPEN: u8 = 0x54;
    /// Large Forward Open.
    pub const LARGE_FORWARD_OPEN: u8 = 0x5B;
    /// Bit set in every reply service code.
    pub const REPLY: u8 = 0x80;
}

/// Connection Manager object, instance 1.
pub const CONNECTION_MANAGER_PATH: [u8; 4] = [0x20, 0x06, 0x24, 0x01];

/// Message-router request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterRequest {
    /// Service code.
    pub service: u8,
    /// Request path; padded with a zero byte if odd.
    pub path: Bytes,
    /// Service data.
    pub data: Bytes,
}

impl MessageRouterRequest {
    /// Create a request.
    pub fn new(service: u8, path: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            service,
            path: path.into(),
            data: data.into(),
        }
    }

    /// Serialize the request.
    pub fn encode(&self) -> Bytes {
        let words = self.path.len().div_ceil(2);
        let mut buf = BytesMut::with_capacity(2 + words * 2 + self.data.len());
        buf.put_u8(self.service);
        buf.put_u8(words as u8);
        buf.put_slice(&self.path);
        if self.path.len() % 2 == 1 {
            buf.put_u8(0);
        }
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

impl RequestCodec for MessageRouterRequest {
    type Reply = MessageRouterReply;

    fn encode(&self) -> Bytes {
        MessageRouterRequest::encode(self)
    }

    fn decode(&self, reply: Bytes) -> Result<MessageRouterReply> {
        let reply = MessageRouterReply::decode(reply)?;
        reply.expect_service(self.service)?;
        reply.check()?;
        Ok(reply)
    }
}

/// Message-router reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterReply {
    /// Reply service code (request service | 0x80).
    pub service: u8,
    /// General status.
    pub status: u8,
    /// Extended status words.
    pub extended: Vec<u16>,
    /// Reply data.
    pub data: Bytes,
}

impl MessageRouterReply {
    /// Parse a reply.
    pub fn decode(mut bytes: Bytes) -> std::result::Result<Self, FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::TooShort {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let service = bytes.get_u8();
        if service & service::REPLY == 0 {
            return Err(FrameError::InvalidService(service));
        }
        bytes.advance(1);
        let status = bytes.get_u8();
        let words = bytes.get_u8() as usize;
        if bytes.len() < words * 2 {
            return Err(FrameError::LengthMismatch {
                declared: words * 2,
                available: bytes.len(),
            });
        }
        let extended = (0..words).map(|_| bytes.get_u16_le()).collect();

        Ok(Self {
            service,
            status,
            extended,
            data: bytes,
        })
    }

    /// Check that this reply answers `request_service`.
    pub fn expect_service(&self, request_service: u8) -> std::result::Result<(), FrameError> {
        if self.service == request_service | service::REPLY {
            Ok(())
        } else {
            Err(FrameError::InvalidService(self.service))
        }
    }

    /// Check if the general status carries a usable reply.
    pub fn is_success(&self) -> bool {
        status::is_success(self.status)
    }

    /// Map an error status to [`Error::Cip`](crate::core::Error::Cip).
    pub fn check(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(status::cip_error(self.status, self.extended.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;

    #[test]
    fn test_request_layout() {
        let request = MessageRouterRequest::new(
            service::GET_ATTRIBUTE_SINGLE,
            vec![0x20, 0x01, 0x24, 0x01, 0x30, 0x07],
            vec![],
        );
        assert_eq!(hex::encode(request.encode()), "0e03200124013007");

        let odd = MessageRouterRequest::new(0x4C, vec![0x91, 0x03, b'a', b'b', b'c'], vec![1]);
        assert_eq!(hex::encode(odd.encode()), "4c0391036162630001");
    }

    #[test]
    fn test_reply_with_extended_status() {
        let reply = MessageRouterReply::decode(Bytes::from_static(&[
            0xD4, 0x00, 0x01, 0x01, 0x00, 0x01, 0xAA,
        ]))
        .unwrap();
        assert_eq!(reply.service, 0xD4);
        assert_eq!(reply.status, 0x01);
        assert_eq!(reply.extended, vec![0x0100]);
        assert_eq!(reply.data.as_ref(), &[0xAA]);
        assert!(!reply.is_success());
    }

    #[test]
    fn test_codec_maps_status() {
        let request = MessageRouterRequest::new(service::GET_ATTRIBUTE_SINGLE, vec![0x20, 0x01], vec![]);

        let ok = request
            .decode(Bytes::from_static(&[0x8E, 0x00, 0x00, 0x00, 0x2A]))
            .unwrap();
        assert_eq!(ok.data.as_ref(), &[0x2A]);

        let partial = request.decode(Bytes::from_static(&[0x8E, 0x00, 0x06, 0x00]));
        assert!(partial.is_ok());

        let err = request
            .decode(Bytes::from_static(&[0x8E, 0x00, 0x14, 0x00]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Cip {
                status: 0x14,
                description: "attribute not supported",
                ..
            }
        ));

        let wrong = request.decode(Bytes::from_static(&[0x81, 0x00, 0x00, 0x00]));
        assert!(matches!(
            wrong,
            Err(Error::Protocol(FrameError::InvalidService(0x81)))
        ));
    }

    #[test]
    fn test_reply_truncated_extended_status() {
        assert_eq!(
            MessageRouterReply::decode(Bytes::from_static(&[0x8E, 0x00, 0x01, 0x02, 0x00])),
            Err(FrameError::LengthMismatch {
                declared: 4,
                available: 1
            })
        );
    }
}
