//! EtherNet/IP client handle.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::config::ClientConfig;
use crate::cip::{ConnectedLayer, Request};
use crate::core::{Error, Frame, RequestCodec, Responder, Result};
use crate::encapsulation::Command;
use crate::transport::{self, Message, TransportLayer};

/// Frames the device sent that no request was waiting for.
pub type UnsolicitedReceiver = mpsc::UnboundedReceiver<Frame>;

/// Open a TCP stream within the configured connect timeout.
pub(crate) async fn dial(addr: impl ToSocketAddrs, config: &ClientConfig) -> Result<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(config.connect_timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Handle to one EtherNet/IP pipeline.
///
/// Clones share the pipeline; each request is correlated on its own, so
/// callers on different tasks never see each other's replies. The pipeline
/// closes gracefully when [`close`](Self::close) is called or every handle
/// has been dropped.
///
/// # Example
///
/// ```no_run
/// use enip_protocol::cip::{message::service, MessageRouterRequest};
/// use enip_protocol::client::{ClientConfig, EipClient};
///
/// # async fn run() -> enip_protocol::core::Result<()> {
/// let (client, _unsolicited) =
///     EipClient::connect("192.168.1.10:44818", ClientConfig::default()).await?;
/// client.register().await?;
///
/// let identity = MessageRouterRequest::new(
///     service::GET_ATTRIBUTES_ALL,
///     vec![0x20, 0x01, 0x24, 0x01],
///     vec![],
/// );
/// let reply = client.call(&identity, false).await?;
/// println!("{} bytes of identity", reply.data.len());
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EipClient {
    tx: mpsc::UnboundedSender<Message<Request>>,
}

impl EipClient {
    /// Connect over TCP and start the pipeline.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
    ) -> Result<(Self, UnsolicitedReceiver)> {
        let stream = dial(addr, &config).await?;
        debug!(peer = ?stream.peer_addr().ok(), "tcp connected");
        Ok(Self::spawn(stream, &config))
    }

    /// Start the pipeline over an already open stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<S>(stream: S, config: &ClientConfig) -> (Self, UnsolicitedReceiver)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let endpoint = ConnectedLayer::over_transport(
            TransportLayer::new(),
            config.connection.clone(),
            config.connect_timeout,
            config.request_timeout,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        tokio::spawn(transport::run(endpoint, stream, rx, unsolicited_tx));
        (Self { tx }, unsolicited_rx)
    }

    async fn submit<T>(&self, request: impl FnOnce(Responder<T>) -> Request) -> Result<T> {
        let (responder, reply) = oneshot::channel();
        self.tx
            .send(Message::Command(request(responder)))
            .map_err(|_| Error::Closed)?;
        reply.await.map_err(|_| Error::Closed)?
    }

    async fn command(&self, command: Command, data: Bytes) -> Result<Bytes> {
        self.submit(|responder| Request::Command {
            command,
            data,
            responder,
        })
        .await
    }

    /// Register the encapsulation session.
    ///
    /// Requests register implicitly, so this only surfaces registration
    /// failures early.
    pub async fn register(&self) -> Result<()> {
        self.submit(Request::Register).await
    }

    /// Open the CIP connection with Forward Open.
    pub async fn open(&self) -> Result<()> {
        self.submit(Request::Connect).await
    }

    /// Close the CIP connection with Forward Close; the session stays up.
    pub async fn disconnect(&self) -> Result<()> {
        self.submit(Request::Disconnect).await
    }

    /// Send a NOP carrying `data`; the device does not answer.
    pub async fn nop(&self, data: impl Into<Bytes>) -> Result<()> {
        self.command(Command::Nop, data.into()).await.map(drop)
    }

    /// ListIdentity reply body.
    pub async fn list_identity(&self) -> Result<Bytes> {
        self.command(Command::ListIdentity, Bytes::new()).await
    }

    /// ListServices reply body.
    pub async fn list_services(&self) -> Result<Bytes> {
        self.command(Command::ListServices, Bytes::new()).await
    }

    /// ListInterfaces reply body.
    pub async fn list_interfaces(&self) -> Result<Bytes> {
        self.command(Command::ListInterfaces, Bytes::new()).await
    }

    /// Send an encoded message-router request in SendRRData.
    pub async fn send_unconnected(&self, data: impl Into<Bytes>) -> Result<Bytes> {
        let data = data.into();
        self.submit(|responder| Request::Unconnected { data, responder })
            .await
    }

    /// Send an encoded message-router request over the connection.
    ///
    /// Opens the connection first if needed.
    pub async fn send_connected(&self, data: impl Into<Bytes>) -> Result<Bytes> {
        let data = data.into();
        self.submit(|responder| Request::Connected { data, responder })
            .await
    }

    /// Encode `request`, send it and decode the reply.
    pub async fn call<R: RequestCodec>(&self, request: &R, connected: bool) -> Result<R::Reply> {
        let data = request.encode();
        let reply = if connected {
            self.send_connected(data).await?
        } else {
            self.send_unconnected(data).await?
        };
        request.decode(reply)
    }

    /// Close the pipeline: Forward Close, UnregisterSession, then the socket.
    pub async fn close(&self) -> Result<()> {
        let (responder, done) = oneshot::channel();
        if self.tx.send(Message::Close(responder)).is_err() {
            return Ok(());
        }
        done.await.unwrap_or(Ok(()))
    }

    /// Check if the pipeline task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
