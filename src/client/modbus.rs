//! Modbus TCP client handle.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, oneshot};

use super::client::dial;
use super::config::ClientConfig;
use crate::core::{Error, Result};
use crate::modbus::{ModbusLayer, ModbusRequest};
use crate::transport::{self, Message, TransportLayer};

/// Handle to one Modbus TCP pipeline.
///
/// PDUs are opaque: the caller encodes the function code and data, and gets
/// the reply PDU back. Exception responses fail with
/// [`Error::ModbusException`].
#[derive(Debug, Clone)]
pub struct ModbusClient {
    tx: mpsc::UnboundedSender<Message<ModbusRequest>>,
}

impl ModbusClient {
    /// Connect over TCP and start the pipeline.
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let stream = dial(addr, &config).await?;
        Ok(Self::spawn(stream, &config))
    }

    /// Start the pipeline over an already open stream.
    pub fn spawn<S>(stream: S, config: &ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let endpoint = ModbusLayer::new(TransportLayer::new(), config.unit_id)
            .with_request_timeout(config.request_timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        // Modbus servers never send unsolicited frames.
        let (unsolicited_tx, _) = mpsc::unbounded_channel();
        tokio::spawn(transport::run(endpoint, stream, rx, unsolicited_tx));
        Self { tx }
    }

    /// Send one PDU and wait for the reply PDU.
    pub async fn request(&self, pdu: impl Into<Bytes>) -> Result<Bytes> {
        let (responder, reply) = oneshot::channel();
        self.tx
            .send(Message::Command(ModbusRequest {
                pdu: pdu.into(),
                responder,
            }))
            .map_err(|_| Error::Closed)?;
        reply.await.map_err(|_| Error::Closed)?
    }

    /// Read `count` holding registers starting at `address` (function 0x03).
    pub async fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut pdu = vec![0x03];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        let reply = self.request(pdu).await?;

        let values = reply.get(2..).unwrap_or_default();
        Ok(values
            .chunks_exact(2)
            .map(|word| u16::from_be_bytes([word[0], word[1]]))
            .collect())
    }

    /// Close the pipeline and the socket.
    pub async fn close(&self) -> Result<()> {
        let (responder, done) = oneshot::channel();
        if self.tx.send(Message::Close(responder)).is_err() {
            return Ok(());
        }
        done.await.unwrap_or(Ok(()))
    }
}
