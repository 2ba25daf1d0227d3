//! Encapsulation session layer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::cpf;
use super::header::{
    self, Command, EncapsulationHeader, SenderContext, HEADER_SIZE, REGISTER_SESSION_BODY,
};
use crate::core::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, SEND_BUDGET};
use crate::core::{
    forward, respond, Completion, ContextKey, CorrelationRegistry, Error, Frame, FrameError,
    Layer, LayerCore, Responder, Result, RoutingInfo,
};
use crate::transport::TransportLayer;

/// Session registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session handle.
    Disconnected,
    /// RegisterSession sent, reply pending.
    Connecting,
    /// Session handle valid.
    Connected,
}

/// Administrative completions, oldest first per command code.
#[derive(Debug, Default)]
struct CommandWaiters {
    waiting: HashMap<Command, VecDeque<(Responder<Bytes>, Option<Instant>)>>,
}

impl CommandWaiters {
    fn push(&mut self, command: Command, responder: Responder<Bytes>, deadline: Option<Instant>) {
        self.waiting
            .entry(command)
            .or_default()
            .push_back((responder, deadline));
    }

    fn pop(&mut self, command: Command) -> Option<Responder<Bytes>> {
        let queue = self.waiting.get_mut(&command)?;
        let (responder, _) = queue.pop_front()?;
        if queue.is_empty() {
            self.waiting.remove(&command);
        }
        Some(responder)
    }

    fn len(&self) -> usize {
        self.waiting.values().map(VecDeque::len).sum()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting
            .values()
            .flat_map(|queue| queue.iter().filter_map(|(_, deadline)| *deadline))
            .min()
    }

    fn expire(&mut self, now: Instant, timeout: Duration) {
        for (command, queue) in self.waiting.iter_mut() {
            let mut live = VecDeque::with_capacity(queue.len());
            for (responder, deadline) in queue.drain(..) {
                if deadline.is_some_and(|d| d <= now) {
                    debug!(?command, "administrative request timed out");
                    responder.complete(Err(Error::Timeout(timeout)));
                } else {
                    live.push_back((responder, deadline));
                }
            }
            *queue = live;
        }
        self.waiting.retain(|_, queue| !queue.is_empty());
    }

    fn fail_all(&mut self, error: &Error) {
        for (_, queue) in self.waiting.drain() {
            for (responder, _) in queue {
                responder.complete(Err(error.clone()));
            }
        }
    }
}

/// Session-handle layer above the transport.
///
/// Registers the session, wraps unconnected frames in SendRRData and
/// connected frames in SendUnitData, and demultiplexes replies. Outbound
/// frames are held while the session is not registered, and a batch stops
/// growing once [`SEND_BUDGET`] bytes have been sent without any reply.
#[derive(Debug)]
pub struct EncapsulationLayer {
    core: LayerCore,
    lower: TransportLayer,
    state: SessionState,
    session_handle: u32,
    sender_context: SenderContext,
    /// Sender context → caller correlation handle.
    unconnected: CorrelationRegistry<u64, ContextKey>,
    /// Reply-side connection id → caller-side connection id.
    connections: HashMap<u32, u32>,
    admin: CommandWaiters,
    connect_waiters: Vec<Responder<()>>,
    register_deadline: Option<Instant>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    sent_since_response: usize,
    closed: bool,
}

impl EncapsulationLayer {
    /// Create a layer on top of `lower` with default timeouts.
    pub fn new(lower: TransportLayer) -> Self {
        Self {
            core: LayerCore::with_reassembler(header::frame_length),
            lower,
            state: SessionState::Disconnected,
            session_handle: 0,
            sender_context: SenderContext::default(),
            unconnected: CorrelationRegistry::new(),
            connections: HashMap::new(),
            admin: CommandWaiters::default(),
            connect_waiters: Vec::new(),
            register_deadline: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            sent_since_response: 0,
            closed: false,
        }
    }

    /// Override the registration and per-request timeouts.
    pub fn with_timeouts(mut self, connect: Duration, request: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session handle assigned by the target, 0 when unregistered.
    pub fn session_handle(&self) -> u32 {
        self.session_handle
    }

    /// Check if the session is registered.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Per-request timeout applied to correlation entries.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Connected reply ids currently attributed to a caller-side id.
    pub fn tracked_connections(&self) -> usize {
        self.connections.len()
    }

    /// Stop attributing frames arriving on `reply_id`.
    pub fn forget_connection(&mut self, reply_id: u32) {
        self.connections.remove(&reply_id);
    }

    /// Bytes sent since the last inbound frame.
    pub fn sent_since_response(&self) -> usize {
        self.sent_since_response
    }

    /// Outstanding unconnected sender contexts.
    pub fn pending_unconnected(&self) -> usize {
        self.unconnected.len()
    }

    /// Outstanding administrative requests.
    pub fn pending_commands(&self) -> usize {
        self.admin.len()
    }

    /// The transport beneath this layer.
    pub fn transport_mut(&mut self) -> &mut TransportLayer {
        &mut self.lower
    }

    /// Register a session.
    ///
    /// Idempotent: `waiter` resolves at once when already connected and
    /// joins the in-flight attempt when connecting.
    pub fn connect(&mut self, waiter: Option<Responder<()>>) {
        match self.state {
            SessionState::Connected => {
                if let Some(waiter) = waiter {
                    respond(waiter, Ok(()));
                }
            }
            SessionState::Connecting => self.connect_waiters.extend(waiter),
            SessionState::Disconnected => {
                self.connect_waiters.extend(waiter);
                self.state = SessionState::Connecting;
                self.register_deadline = Some(Instant::now() + self.connect_timeout);
                debug!("registering encapsulation session");
                let packet = header::encode(
                    Command::RegisterSession,
                    0,
                    SenderContext::default(),
                    &REGISTER_SESSION_BODY,
                );
                self.send(Frame::new(packet), true);
            }
        }
    }

    /// Unregister the session and return to `Disconnected`.
    pub fn disconnect(&mut self) {
        match self.state {
            SessionState::Connected => {
                debug!(session = self.session_handle, "unregistering session");
                let packet = header::encode(
                    Command::UnregisterSession,
                    self.session_handle,
                    self.sender_context,
                    &[],
                );
                self.send(Frame::new(packet), true);
            }
            SessionState::Connecting => {
                for waiter in self.connect_waiters.drain(..) {
                    respond(waiter, Err(Error::Closed));
                }
            }
            SessionState::Disconnected => {}
        }
        self.state = SessionState::Disconnected;
        self.session_handle = 0;
        self.register_deadline = None;
        self.connections.clear();
    }

    /// Issue an administrative command, matched to its reply by code.
    ///
    /// Commands the target never answers resolve as soon as they are queued.
    pub fn request(&mut self, command: Command, data: &[u8], responder: Responder<Bytes>) {
        let packet = header::encode(command, self.session_handle, self.sender_context, data);
        trace!(?command, len = packet.len(), "administrative request");
        self.send(Frame::new(packet), true);
        if command.expects_reply() {
            let deadline = self.request_timeout.map(|t| Instant::now() + t);
            self.admin.push(command, responder, deadline);
        } else {
            respond(responder, Ok(Bytes::new()));
        }
    }

    fn encapsulated_len(frame: &Frame) -> usize {
        HEADER_SIZE
            + if frame.routing.connected {
                cpf::connected_len(frame.len())
            } else {
                cpf::unconnected_len(frame.len())
            }
    }

    fn encapsulate(&mut self, frame: Frame) -> Bytes {
        if frame.routing.connected {
            let connection_id = frame.routing.connection_id.unwrap_or_default();
            if let Some(reply_id) = frame.routing.reply_connection_id {
                self.connections.insert(reply_id, connection_id);
            }
            let body = cpf::encode_connected(connection_id, &frame.data);
            header::encode(
                Command::SendUnitData,
                self.session_handle,
                self.sender_context,
                &body,
            )
        } else {
            self.sender_context.increment();
            if let Some(caller) = frame.context {
                self.unconnected.request_context(
                    self.sender_context.to_u64(),
                    caller,
                    frame.timeout.or(self.request_timeout),
                );
            }
            let body = cpf::encode_unconnected(&frame.data);
            header::encode(
                Command::SendRRData,
                self.session_handle,
                self.sender_context,
                &body,
            )
        }
    }

    fn on_register_session(&mut self, header: &EncapsulationHeader) -> Result<()> {
        header.check_status()?;
        if self.state != SessionState::Connecting {
            debug!(session = header.session_handle, "ignoring unsolicited registration");
            return Ok(());
        }
        self.state = SessionState::Connected;
        self.session_handle = header.session_handle;
        self.register_deadline = None;
        debug!(session = self.session_handle, "session registered");
        for waiter in self.connect_waiters.drain(..) {
            respond(waiter, Ok(()));
        }
        Ok(())
    }

    fn on_unconnected_reply(&mut self, header: &EncapsulationHeader, payload: Bytes) -> Result<()> {
        let key = header.sender_context.to_u64();
        let caller = self.unconnected.resolve_context(&key);
        // Contexts start at 1, so a zero context was originated by the target.
        if caller.is_none() && key != 0 {
            debug!(context = key, "dropping stale unconnected reply");
            return Ok(());
        }
        if let Err(err) = header.check_status() {
            match caller {
                Some(caller) => self.core.forward_up(Frame::fault(
                    Some(caller),
                    RoutingInfo::unconnected(),
                    err,
                )),
                None => warn!(error = %err, "dropping unsolicited frame with error status"),
            }
            return Ok(());
        }
        let packet = cpf::decode(payload)?;
        if packet.connection_id.is_some() {
            return Err(FrameError::UnexpectedItem(cpf::item_type::CONNECTED_ADDRESS).into());
        }
        let frame = Frame::new(packet.data).with_routing(RoutingInfo::unconnected());
        self.core.forward_up(match caller {
            Some(caller) => frame.with_context(caller),
            None => frame,
        });
        Ok(())
    }

    fn on_connected_data(&mut self, header: &EncapsulationHeader, payload: Bytes) -> Result<()> {
        if let Err(err) = header.check_status() {
            warn!(error = %err, "dropping connected data with error status");
            return Ok(());
        }
        let packet = cpf::decode(payload)?;
        let Some(reply_id) = packet.connection_id else {
            return Err(FrameError::UnexpectedItem(cpf::item_type::NULL_ADDRESS).into());
        };
        let routing = RoutingInfo {
            connected: true,
            connection_id: self.connections.get(&reply_id).copied(),
            reply_connection_id: Some(reply_id),
        };
        self.core
            .forward_up(Frame::new(packet.data).with_routing(routing));
        Ok(())
    }

    fn on_command_reply(&mut self, command: Command, header: &EncapsulationHeader, payload: Bytes) {
        match self.admin.pop(command) {
            Some(responder) => responder.complete(header.check_status().map(|()| payload)),
            None => debug!(?command, "dropping reply with no waiting request"),
        }
    }
}

impl Layer for EncapsulationLayer {
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
        match self.state {
            SessionState::Connected => {}
            SessionState::Connecting => return,
            SessionState::Disconnected => {
                if !self.core.queue.is_empty() && !self.closed {
                    self.connect(None);
                }
                return;
            }
        }

        let mut batch = BytesMut::new();
        while let Some((frame, priority)) = self.core.queue.dequeue_with_lane() {
            let len = Self::encapsulated_len(&frame);
            if self.sent_since_response > 0 && self.sent_since_response + len > SEND_BUDGET {
                trace!(
                    in_flight = self.sent_since_response,
                    len,
                    "send budget reached, holding frames"
                );
                self.core.queue.requeue_front(frame, priority);
                break;
            }
            let packet = self.encapsulate(frame);
            self.sent_since_response += packet.len();
            batch.extend_from_slice(&packet);
        }

        if !batch.is_empty() {
            self.send(Frame::new(batch.freeze()), false);
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<()> {
        let header = EncapsulationHeader::decode(&frame.data)?;
        let payload = frame.data.slice(HEADER_SIZE..);
        self.sent_since_response = 0;
        trace!(
            command = header.command,
            len = header.length,
            status = header.status,
            "encapsulation frame"
        );

        match header.command() {
            Some(Command::RegisterSession) => self.on_register_session(&header)?,
            Some(Command::SendRRData) => self.on_unconnected_reply(&header, payload)?,
            Some(Command::SendUnitData) => self.on_connected_data(&header, payload)?,
            Some(command) if command.is_administrative() => {
                self.on_command_reply(command, &header, payload)
            }
            Some(command) => debug!(?command, "ignoring reply to one-way command"),
            None => warn!(command = header.command, "dropping unknown encapsulation command"),
        }

        self.send_next_message();
        Ok(())
    }

    fn handle_destroy(&mut self, error: &Error) {
        self.state = SessionState::Disconnected;
        self.session_handle = 0;
        self.register_deadline = None;
        self.sent_since_response = 0;
        for waiter in self.connect_waiters.drain(..) {
            respond(waiter, Err(error.clone()));
        }
        self.admin.fail_all(error);
        self.unconnected.drain();
        self.connections.clear();
        self.lower.destroy(error.clone());
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
            self.register_deadline,
            self.unconnected.next_deadline(),
            self.admin.next_deadline(),
            self.lower.poll_timeout(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        self.lower.handle_timeout(now)?;
        if self.register_deadline.is_some_and(|d| d <= now) {
            return Err(Error::Timeout(self.connect_timeout));
        }
        for (context, _) in self.unconnected.expire(now) {
            debug!(context, "purging expired sender context");
        }
        self.admin
            .expire(now, self.request_timeout.unwrap_or_default());
        Ok(())
    }

    fn close(&mut self) {
        self.disconnect();
        self.closed = true;
        self.admin.fail_all(&Error::Closed);
        self.lower.close();
    }

    fn is_closed(&self) -> bool {
        self.closed && self.lower.is_closed()
    }
}
