//! Connected (Class 3) messaging layer.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──Forward Open ok──► Connected
//!      ▲                        │                              │
//!      │        large refused: retry normal size          disconnect
//!      │        duplicate: Forward Close, retry                │
//!      │                                                       ▼
//!      └──────────── Forward Close reply or 5 s ─────── Disconnecting
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::forward_open::{
    keep_alive_interval, ConnectionIds, ConnectionParameters, ForwardCloseReply,
    ForwardCloseRequest, ForwardOpenReply, ForwardOpenRequest, MAX_NORMAL_SIZE,
};
use super::message::{service, MessageRouterReply};
use super::status::{self, SERVICE_NOT_SUPPORTED};
use crate::core::constants::{
    CONTEXT_MODULUS, DEFAULT_CONNECT_TIMEOUT, DISCONNECT_TIMEOUT, SEQUENCE_MODULUS,
};
use crate::core::{
    forward, respond, Completion, ContextKey, CorrelationRegistry, Endpoint, Error, Frame,
    FrameError, Layer, LayerCore, Responder, Result, RoutingInfo, SequenceCounter,
};
use crate::encapsulation::{self, EncapsulationLayer};
use crate::transport::TransportLayer;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Forward Open in flight.
    Connecting,
    /// Connection ids negotiated.
    Connected,
    /// Forward Close in flight; connect attempts are refused.
    Disconnecting,
}

/// A negotiated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// O→T connection id; outbound connected frames carry it.
    pub o_to_t_id: u32,
    /// T→O connection id; inbound connected frames carry it.
    pub t_to_o_id: u32,
    /// Connection serial number.
    pub serial: u16,
    /// Slower of the two actual packet intervals.
    pub packet_interval: Duration,
    /// Period of the keep-alive resend.
    pub keep_alive: Duration,
}

/// What a Forward Close was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterClose {
    /// Clearing a stale duplicate before retrying Forward Open.
    Reopen,
    /// Ordinary disconnect.
    Disconnect,
}

/// Unconnected exchanges awaiting a reply.
#[derive(Debug)]
enum Pending {
    Caller(Responder<Bytes>),
    ForwardOpen { large: bool },
    ForwardClose(AfterClose),
}

impl Completion for Pending {
    fn complete(self, result: Result<Bytes>) {
        if let Pending::Caller(responder) = self {
            responder.complete(result);
        }
    }
}

/// Requests accepted by a [`ConnectedLayer`] endpoint.
#[derive(Debug)]
pub enum Request {
    /// Register the encapsulation session.
    Register(Responder<()>),
    /// Open the connection.
    Connect(Responder<()>),
    /// Close the connection (the session stays registered).
    Disconnect(Responder<()>),
    /// Administrative encapsulation command.
    Command {
        /// Command code.
        command: encapsulation::Command,
        /// Command body.
        data: Bytes,
        /// Reply payload.
        responder: Responder<Bytes>,
    },
    /// Unconnected message-router request.
    Unconnected {
        /// Encoded request.
        data: Bytes,
        /// Reply bytes.
        responder: Responder<Bytes>,
    },
    /// Connected message-router request.
    Connected {
        /// Encoded request.
        data: Bytes,
        /// Reply bytes, without the sequence count.
        responder: Responder<Bytes>,
    },
}

/// Connected-messaging layer above an [`EncapsulationLayer`].
///
/// Negotiates the connection with Forward Open, prefixes every connected
/// request with a 16-bit sequence count that correlates the reply, and
/// resends the last connected frame when the link would otherwise go quiet
/// long enough for the target to drop the connection.
#[derive(Debug)]
pub struct ConnectedLayer {
    core: LayerCore,
    lower: EncapsulationLayer,
    params: ConnectionParameters,
    state: ConnectionState,
    connection: Option<ConnectionInfo>,
    attempt: Option<ConnectionIds>,
    forward_open_context: Option<ContextKey>,
    large_forward_open: bool,
    fallback_in_progress: bool,

    o_to_t_ids: SequenceCounter,
    t_to_o_ids: SequenceCounter,
    serials: SequenceCounter,
    sequence: SequenceCounter,
    contexts: SequenceCounter,

    unconnected: CorrelationRegistry<ContextKey, Pending>,
    /// Connected requests queued until the connection is up.
    staged: CorrelationRegistry<ContextKey, Responder<Bytes>>,
    /// Sent connected requests by sequence count.
    connected: CorrelationRegistry<u16, Responder<Bytes>>,

    last_sent: Option<Frame>,
    resend_at: Option<Instant>,
    connect_waiters: Vec<Responder<()>>,
    disconnect_waiters: Vec<Responder<()>>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    closing: bool,
    closed: bool,
}

fn random_counter(modulus: u64) -> SequenceCounter {
    SequenceCounter::starting_at(rand::random::<u64>(), modulus)
}

impl ConnectedLayer {
    /// Create a layer on top of `lower`.
    ///
    /// Connection ids and serial numbers start at random values so that
    /// independent connections to one target do not collide.
    pub fn new(lower: EncapsulationLayer, params: ConnectionParameters) -> Self {
        let request_timeout = lower.request_timeout();
        Self {
            core: LayerCore::new(),
            lower,
            params,
            state: ConnectionState::Disconnected,
            connection: None,
            attempt: None,
            forward_open_context: None,
            large_forward_open: true,
            fallback_in_progress: false,
            o_to_t_ids: random_counter(CONTEXT_MODULUS),
            t_to_o_ids: random_counter(CONTEXT_MODULUS),
            serials: random_counter(SEQUENCE_MODULUS),
            sequence: SequenceCounter::new(SEQUENCE_MODULUS),
            contexts: SequenceCounter::new(CONTEXT_MODULUS),
            unconnected: CorrelationRegistry::new(),
            staged: CorrelationRegistry::new(),
            connected: CorrelationRegistry::new(),
            last_sent: None,
            resend_at: None,
            connect_waiters: Vec::new(),
            disconnect_waiters: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout,
            closing: false,
            closed: false,
        }
    }

    /// Build the whole chain over a bare transport.
    pub fn over_transport(
        transport: TransportLayer,
        params: ConnectionParameters,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Self {
        let session =
            EncapsulationLayer::new(transport).with_timeouts(connect_timeout, request_timeout);
        let mut layer = Self::new(session, params);
        layer.connect_timeout = connect_timeout;
        layer.request_timeout = request_timeout;
        layer
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The negotiated connection, if any.
    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.connection
    }

    /// The encapsulation layer beneath.
    pub fn session(&self) -> &EncapsulationLayer {
        &self.lower
    }

    /// Mutable access to the encapsulation layer beneath.
    pub fn session_mut(&mut self) -> &mut EncapsulationLayer {
        &mut self.lower
    }

    /// Requests waiting for a reply or for the connection.
    pub fn pending_requests(&self) -> usize {
        self.connected.len() + self.staged.len() + self.unconnected.len()
    }

    /// Open the connection.
    ///
    /// Idempotent: `waiter` resolves at once when connected and joins the
    /// in-flight attempt when connecting.
    pub fn connect(&mut self, waiter: Option<Responder<()>>) {
        match self.state {
            ConnectionState::Connected => {
                if let Some(waiter) = waiter {
                    respond(waiter, Ok(()));
                }
            }
            ConnectionState::Connecting => self.connect_waiters.extend(waiter),
            ConnectionState::Disconnecting => {
                if let Some(waiter) = waiter {
                    respond(waiter, Err(Error::NotConnected));
                }
            }
            ConnectionState::Disconnected if self.closing => {
                if let Some(waiter) = waiter {
                    respond(waiter, Err(Error::Closed));
                }
            }
            ConnectionState::Disconnected => {
                self.connect_waiters.extend(waiter);
                self.state = ConnectionState::Connecting;
                self.fallback_in_progress = false;
                self.send_forward_open();
            }
        }
    }

    /// Close the connection with Forward Close.
    ///
    /// Settles within [`DISCONNECT_TIMEOUT`] whether or not the target replies.
    pub fn disconnect(&mut self, waiter: Option<Responder<()>>) {
        match self.state {
            ConnectionState::Disconnected => {
                if let Some(waiter) = waiter {
                    respond(waiter, Ok(()));
                }
            }
            ConnectionState::Disconnecting => self.disconnect_waiters.extend(waiter),
            ConnectionState::Connecting => {
                debug!("abandoning connection attempt");
                if let Some(context) = self.forward_open_context.take() {
                    let _ = self.unconnected.resolve_context(&context);
                }
                self.attempt = None;
                self.state = ConnectionState::Disconnected;
                for waiter in self.connect_waiters.drain(..) {
                    respond(waiter, Err(Error::Closed));
                }
                self.reject_queued(&Error::NotConnected);
                if let Some(waiter) = waiter {
                    respond(waiter, Ok(()));
                }
            }
            ConnectionState::Connected => {
                self.disconnect_waiters.extend(waiter);
                self.state = ConnectionState::Disconnecting;
                self.resend_at = None;
                match self.connection {
                    Some(connection) => {
                        debug!(serial = connection.serial, "closing connection");
                        self.send_forward_close(connection.serial, AfterClose::Disconnect);
                    }
                    None => self.finish_disconnect(),
                }
            }
        }
    }

    /// Send an unconnected request; only the session is needed.
    pub fn send_unconnected(&mut self, data: Bytes, responder: Responder<Bytes>) {
        if self.closing {
            respond(responder, Err(Error::Closed));
            return;
        }
        let context = self.next_context();
        if let Some(displaced) =
            self.unconnected
                .request_context(context, Pending::Caller(responder), self.request_timeout)
        {
            displaced.complete(Err(Error::ContextSuperseded));
        }
        self.send(Frame::new(data).with_context(context), false);
    }

    /// Send a connected request, opening the connection first if needed.
    pub fn send_connected(&mut self, data: Bytes, responder: Responder<Bytes>) {
        if self.closing || self.state == ConnectionState::Disconnecting {
            respond(responder, Err(Error::NotConnected));
            return;
        }
        let context = self.next_context();
        if let Some(displaced) = self
            .staged
            .request_context(context, responder, self.request_timeout)
        {
            displaced.complete(Err(Error::ContextSuperseded));
        }
        self.core
            .queue
            .enqueue(Frame::new(data).with_context(context), false);

        match self.state {
            ConnectionState::Connected => self.send_next_message(),
            ConnectionState::Disconnected => self.connect(None),
            _ => {}
        }
    }

    fn next_context(&mut self) -> ContextKey {
        self.contexts.next()
    }

    fn send_forward_open(&mut self) {
        let large = self.large_forward_open && self.params.max_size > MAX_NORMAL_SIZE;
        let ids = ConnectionIds {
            o_to_t: self.o_to_t_ids.next() as u32,
            t_to_o: self.t_to_o_ids.next() as u32,
            serial: self.serials.next() as u16,
        };
        let request = ForwardOpenRequest::new(&self.params, ids, large);
        debug!(
            serial = ids.serial,
            large,
            size = request.o_to_t_params.max_size,
            "sending forward open"
        );

        let context = self.next_context();
        self.unconnected.request_context(
            context,
            Pending::ForwardOpen { large },
            Some(self.connect_timeout),
        );
        self.attempt = Some(ids);
        self.forward_open_context = Some(context);
        self.send(
            Frame::new(request.to_message().encode())
                .with_context(context)
                .with_timeout(self.connect_timeout),
            true,
        );
    }

    fn send_forward_close(&mut self, serial: u16, after: AfterClose) {
        let request = ForwardCloseRequest::new(&self.params, serial);
        let context = self.next_context();
        self.unconnected.request_context(
            context,
            Pending::ForwardClose(after),
            Some(DISCONNECT_TIMEOUT),
        );
        self.send(
            Frame::new(request.to_message().encode())
                .with_context(context)
                .with_timeout(DISCONNECT_TIMEOUT),
            true,
        );
    }

    fn on_forward_open_reply(&mut self, frame: Frame, large: bool) -> Result<()> {
        self.forward_open_context = None;
        if self.state != ConnectionState::Connecting {
            debug!("ignoring forward open reply outside connecting state");
            return Ok(());
        }
        if let Some(err) = frame.fault {
            return Err(err);
        }

        let reply = MessageRouterReply::decode(frame.data)?;
        let requested = if large {
            service::LARGE_FORWARD_OPEN
        } else {
            service::FORWARD_OPEN
        };
        reply.expect_service(requested)?;
        if !reply.is_success() {
            return self.on_forward_open_rejected(reply, large);
        }

        let opened = ForwardOpenReply::decode(reply.data)?;
        let packet_interval = opened.packet_interval();
        let keep_alive = keep_alive_interval(packet_interval, self.params.timeout_multiplier);
        let connection = ConnectionInfo {
            o_to_t_id: opened.o_to_t_id,
            t_to_o_id: opened.t_to_o_id,
            serial: opened.serial,
            packet_interval,
            keep_alive,
        };
        debug!(
            o_to_t = connection.o_to_t_id,
            t_to_o = connection.t_to_o_id,
            serial = connection.serial,
            ?keep_alive,
            "connection established"
        );

        self.connection = Some(connection);
        self.attempt = None;
        self.fallback_in_progress = false;
        self.state = ConnectionState::Connected;
        self.resend_at = Some(Instant::now() + keep_alive);
        for waiter in self.connect_waiters.drain(..) {
            respond(waiter, Ok(()));
        }
        self.send_next_message();
        Ok(())
    }

    fn on_forward_open_rejected(&mut self, reply: MessageRouterReply, large: bool) -> Result<()> {
        if large && reply.status == SERVICE_NOT_SUPPORTED {
            debug!("large forward open not supported, retrying with normal size");
            self.large_forward_open = false;
            self.fallback_in_progress = true;
            self.send_forward_open();
            return Ok(());
        }

        if status::is_duplicate_connection(reply.status, &reply.extended)
            && !self.fallback_in_progress
        {
            if let Some(ids) = self.attempt {
                debug!(serial = ids.serial, "duplicate connection, closing it before retrying");
                self.fallback_in_progress = true;
                self.send_forward_close(ids.serial, AfterClose::Reopen);
                return Ok(());
            }
        }

        Err(status::rejection_error(reply.status, reply.extended))
    }

    fn on_forward_close_reply(&mut self, frame: Frame, after: AfterClose) -> Result<()> {
        match frame.fault {
            Some(err) => debug!(error = %err, "forward close failed"),
            None => {
                let reply = MessageRouterReply::decode(frame.data)?;
                reply.expect_service(service::FORWARD_CLOSE)?;
                if reply.is_success() {
                    let closed = ForwardCloseReply::decode(reply.data)?;
                    debug!(serial = closed.serial, "connection closed");
                } else {
                    debug!(status = reply.status, "forward close refused");
                }
            }
        }
        self.after_forward_close(after);
        Ok(())
    }

    fn after_forward_close(&mut self, after: AfterClose) {
        match after {
            AfterClose::Reopen if self.state == ConnectionState::Connecting => {
                self.send_forward_open();
            }
            AfterClose::Reopen => {}
            AfterClose::Disconnect => self.finish_disconnect(),
        }
    }

    fn finish_disconnect(&mut self) {
        if self.state != ConnectionState::Disconnecting {
            return;
        }
        self.state = ConnectionState::Disconnected;
        if let Some(connection) = self.connection.take() {
            self.lower.forget_connection(connection.t_to_o_id);
        }
        self.last_sent = None;
        self.resend_at = None;
        self.connected.fail_all(&Error::NotConnected);
        self.reject_queued(&Error::NotConnected);
        for waiter in self.disconnect_waiters.drain(..) {
            respond(waiter, Ok(()));
        }
        if self.closing {
            self.finish_close();
        }
    }

    fn finish_close(&mut self) {
        debug!("connected layer closed");
        self.unconnected.fail_all(&Error::Closed);
        self.connected.fail_all(&Error::Closed);
        self.reject_queued(&Error::Closed);
        self.lower.close();
        self.closed = true;
    }

    fn reject_queued(&mut self, error: &Error) {
        self.core.queue.clear();
        self.staged.fail_all(error);
    }

    fn on_connected_data(&mut self, frame: Frame) -> Result<()> {
        let Some(connection) = self.connection else {
            warn!("dropping connected data without a connection");
            return Ok(());
        };
        if frame.routing.connection_id != Some(connection.o_to_t_id)
            || frame.routing.reply_connection_id != Some(connection.t_to_o_id)
        {
            warn!(
                connection_id = ?frame.routing.connection_id,
                reply_connection_id = ?frame.routing.reply_connection_id,
                "dropping connected data for another connection"
            );
            return Ok(());
        }

        let mut data = frame.data;
        if data.len() < 2 {
            return Err(FrameError::TooShort {
                expected: 2,
                actual: data.len(),
            }
            .into());
        }
        let sequence = data.get_u16_le();
        match self.connected.resolve_context(&sequence) {
            Some(responder) => responder.complete(Ok(data)),
            None => debug!(sequence, "dropping stale connected reply"),
        }
        Ok(())
    }

    fn on_unconnected_data(&mut self, frame: Frame) -> Result<()> {
        let Some(context) = frame.context else {
            trace!(len = frame.len(), "unsolicited unconnected frame");
            self.core.forward_up(frame);
            return Ok(());
        };
        match self.unconnected.resolve_context(&context) {
            Some(Pending::Caller(responder)) => {
                let result = match frame.fault {
                    Some(err) => Err(err),
                    None => Ok(frame.data),
                };
                responder.complete(result);
                Ok(())
            }
            Some(Pending::ForwardOpen { large }) => self.on_forward_open_reply(frame, large),
            Some(Pending::ForwardClose(after)) => self.on_forward_close_reply(frame, after),
            None => {
                debug!(context, "dropping stale unconnected reply");
                Ok(())
            }
        }
    }

    fn resend_keep_alive(&mut self, now: Instant) {
        let Some(connection) = self.connection else {
            self.resend_at = None;
            return;
        };
        self.resend_at = Some(now + connection.keep_alive);
        if let Some(frame) = self.last_sent.clone() {
            trace!(o_to_t = connection.o_to_t_id, "keep-alive resend");
            self.send(frame, false);
        }
    }
}

impl Layer for ConnectedLayer {
    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn lower_mut(&mut self) -> Option<&mut dyn Layer> {
        Some(&mut self.lower)
    }

    fn send_next_message(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(connection) = self.connection else {
            return;
        };
        while let Some(frame) = self.core.queue.dequeue() {
            let Some(responder) = frame
                .context
                .and_then(|context| self.staged.resolve_context(&context))
            else {
                debug!("dropping abandoned connected request");
                continue;
            };

            let sequence = self.sequence.next() as u16;
            if let Some(displaced) =
                self.connected
                    .request_context(sequence, responder, self.request_timeout)
            {
                displaced.complete(Err(Error::ContextSuperseded));
            }

            let mut data = BytesMut::with_capacity(2 + frame.len());
            data.put_u16_le(sequence);
            data.extend_from_slice(&frame.data);
            let outbound = Frame::new(data.freeze()).with_routing(RoutingInfo::connected(
                connection.o_to_t_id,
                connection.t_to_o_id,
            ));
            trace!(sequence, len = outbound.len(), "connected request");

            self.last_sent = Some(outbound.clone());
            self.resend_at = Some(Instant::now() + connection.keep_alive);
            self.send(outbound, false);
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<()> {
        if frame.routing.connected {
            self.on_connected_data(frame)
        } else {
            self.on_unconnected_data(frame)
        }
    }

    fn handle_destroy(&mut self, error: &Error) {
        self.state = ConnectionState::Disconnected;
        self.connection = None;
        self.attempt = None;
        self.forward_open_context = None;
        self.last_sent = None;
        self.resend_at = None;
        for waiter in self.connect_waiters.drain(..) {
            respond(waiter, Err(error.clone()));
        }
        for waiter in self.disconnect_waiters.drain(..) {
            respond(waiter, Err(error.clone()));
        }
        self.unconnected.fail_all(error);
        self.connected.fail_all(error);
        self.staged.fail_all(error);
        self.lower.destroy(error.clone());
        self.closed = true;
    }

    fn process_inbound(&mut self) -> Result<()> {
        self.lower.process_inbound()?;
        while let Some(frame) = self.lower.poll_forward() {
            forward(self, frame)?;
        }
        Ok(())
    }

    fn poll_timeout(&self) -> Option<Instant> {
        [
            self.resend_at,
            self.unconnected.next_deadline(),
            self.staged.next_deadline(),
            self.connected.next_deadline(),
            self.lower.poll_timeout(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        self.lower.handle_timeout(now)?;

        let request_timeout = self.request_timeout.unwrap_or_default();
        let mut fatal = None;
        for (context, pending) in self.unconnected.expire(now) {
            match pending {
                Pending::Caller(responder) => {
                    debug!(context, "unconnected request timed out");
                    responder.complete(Err(Error::Timeout(request_timeout)));
                }
                Pending::ForwardOpen { .. } => {
                    if self.forward_open_context == Some(context) {
                        fatal = Some(Error::Timeout(self.connect_timeout));
                    }
                }
                Pending::ForwardClose(after) => {
                    debug!("forward close unanswered, giving up");
                    self.after_forward_close(after);
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        self.staged.expire_with_timeout(now, request_timeout);
        self.connected.expire_with_timeout(now, request_timeout);
        if self.resend_at.is_some_and(|at| at <= now) {
            self.resend_keep_alive(now);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        match self.state {
            ConnectionState::Connected => self.disconnect(None),
            ConnectionState::Connecting => {
                self.disconnect(None);
                self.finish_close();
            }
            ConnectionState::Disconnecting => {}
            ConnectionState::Disconnected => self.finish_close(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed && self.lower.is_closed()
    }
}

impl Endpoint for ConnectedLayer {
    type Command = Request;

    fn handle_command(&mut self, command: Request) {
        match command {
            Request::Register(waiter) => {
                if self.closing {
                    respond(waiter, Err(Error::Closed));
                } else {
                    self.lower.connect(Some(waiter));
                }
            }
            Request::Connect(waiter) => self.connect(Some(waiter)),
            Request::Disconnect(waiter) => self.disconnect(Some(waiter)),
            Request::Command {
                command,
                data,
                responder,
            } => self.lower.request(command, &data, responder),
            Request::Unconnected { data, responder } => self.send_unconnected(data, responder),
            Request::Connected { data, responder } => self.send_connected(data, responder),
        }
    }

    fn transport_mut(&mut self) -> &mut TransportLayer {
        self.lower.transport_mut()
    }
}
