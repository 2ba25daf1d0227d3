//! Scripted in-memory EtherNet/IP target.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use enip_protocol::cip::message::service;
use enip_protocol::encapsulation::{
    self, cpf, Command, EncapsulationHeader, SenderContext, HEADER_SIZE, REGISTER_SESSION_BODY,
};

pub const SESSION: u32 = 0x1122_3344;
pub const TARGET_O_TO_T: u32 = 0xC0DE_0001;

/// One encapsulation packet read from the client.
#[derive(Debug)]
pub struct Packet {
    pub header: EncapsulationHeader,
    pub body: Bytes,
}

impl Packet {
    pub fn command(&self) -> Option<Command> {
        self.header.command()
    }

    /// Message-router request carried in a SendRRData or SendUnitData body.
    pub fn cip(&self) -> Bytes {
        cpf::decode(self.body.clone())
            .expect("client sent malformed CPF")
            .data
    }
}

/// Service data of a message-router request.
pub fn service_data(request: &[u8]) -> Bytes {
    let words = request[1] as usize;
    Bytes::copy_from_slice(&request[2 + words * 2..])
}

/// Successful Forward Open reply accepting the client's T→O id.
pub fn forward_open_ok(request: &[u8]) -> Vec<u8> {
    let body = service_data(request);
    let mut reply = vec![request[0] | service::REPLY, 0, 0, 0];
    reply.extend_from_slice(&TARGET_O_TO_T.to_le_bytes());
    reply.extend_from_slice(&body[6..18]);
    reply.extend_from_slice(&2_000_000u32.to_le_bytes());
    reply.extend_from_slice(&2_000_000u32.to_le_bytes());
    reply.extend_from_slice(&[0, 0]);
    reply
}

/// Successful Forward Close reply.
pub fn forward_close_ok(request: &[u8]) -> Vec<u8> {
    let body = service_data(request);
    let mut reply = vec![service::FORWARD_CLOSE | service::REPLY, 0, 0, 0];
    reply.extend_from_slice(&body[2..10]);
    reply.extend_from_slice(&[0, 0]);
    reply
}

/// T→O connection id proposed in a Forward Open request.
pub fn proposed_t_to_o(request: &[u8]) -> u32 {
    let body = service_data(request);
    u32::from_le_bytes([body[6], body[7], body[8], body[9]])
}

pub struct FakeDevice {
    stream: DuplexStream,
    buf: BytesMut,
}

impl FakeDevice {
    /// Client end of the stream plus the device.
    pub fn pair() -> (DuplexStream, FakeDevice) {
        let (client, device) = tokio::io::duplex(64 * 1024);
        (
            client,
            FakeDevice {
                stream: device,
                buf: BytesMut::new(),
            },
        )
    }

    /// Next complete packet, or `None` once the client closed the stream.
    pub async fn next(&mut self) -> Option<Packet> {
        loop {
            if let Some(len) = encapsulation::frame_length(&self.buf) {
                if self.buf.len() >= len {
                    let frame = self.buf.split_to(len).freeze();
                    let header = EncapsulationHeader::decode(&frame).expect("bad header");
                    return Some(Packet {
                        header,
                        body: frame.slice(HEADER_SIZE..),
                    });
                }
            }
            let n = self.stream.read_buf(&mut self.buf).await.ok()?;
            if n == 0 {
                return None;
            }
        }
    }

    /// Next packet, which must carry `command`.
    pub async fn expect(&mut self, command: Command) -> Packet {
        let packet = self.next().await.expect("client closed the stream");
        assert_eq!(packet.command(), Some(command), "unexpected packet {packet:?}");
        packet
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write failed");
    }

    pub async fn reply(&mut self, request: &Packet, status: u32, payload: &[u8]) {
        let mut header = EncapsulationHeader::new(
            request.command().expect("unknown command"),
            SESSION,
            request.header.sender_context,
            payload.len() as u16,
        );
        header.status = status;
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        buf.extend_from_slice(payload);
        self.write(&buf).await;
    }

    /// Answer the RegisterSession the client sends first.
    pub async fn accept_registration(&mut self) {
        let packet = self.expect(Command::RegisterSession).await;
        assert_eq!(packet.body.as_ref(), &REGISTER_SESSION_BODY);
        self.reply(&packet, 0, &REGISTER_SESSION_BODY).await;
    }

    /// Answer a SendRRData request with a message-router reply.
    pub async fn reply_unconnected(&mut self, request: &Packet, reply: &[u8]) {
        self.reply(request, 0, &cpf::encode_unconnected(reply)).await;
    }

    /// Send a SendUnitData carrying `sequence` and a message-router reply.
    pub async fn reply_connected(&mut self, t_to_o: u32, sequence: u16, reply: &[u8]) {
        let mut data = sequence.to_le_bytes().to_vec();
        data.extend_from_slice(reply);
        let packet = encapsulation::encode(
            Command::SendUnitData,
            SESSION,
            SenderContext::default(),
            &cpf::encode_connected(t_to_o, &data),
        );
        self.write(&packet).await;
    }

    /// Register, then accept a Forward Open. Returns the client's T→O id.
    pub async fn accept_connection(&mut self) -> u32 {
        self.accept_registration().await;
        let packet = self.expect(Command::SendRRData).await;
        let request = packet.cip();
        assert_eq!(request[0], service::FORWARD_OPEN);
        self.reply_unconnected(&packet, &forward_open_ok(&request)).await;
        proposed_t_to_o(&request)
    }
}
