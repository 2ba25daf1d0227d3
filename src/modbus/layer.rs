//! Modbus TCP layer.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::mbap::{self, MbapHeader, EXCEPTION_BIT, MBAP_SIZE};
use crate::core::constants::{DEFAULT_REQUEST_TIMEOUT, SEQUENCE_MODULUS};
use crate::core::{
    forward, Completion, CorrelationRegistry, Endpoint, Error, Frame, FrameError, Layer,
    LayerCore, Responder, Result, SequenceCounter,
};
use crate::transport::TransportLayer;

/// One Modbus request: an opaque PDU and where its reply goes.
#[derive(Debug)]
pub struct ModbusRequest {
    /// Function code and data.
    pub pdu: Bytes,
    /// Reply PDU, or the exception the server raised.
    pub responder: Responder<Bytes>,
}

/// MBAP framing and transaction-id correlation directly on the transport.
#[derive(Debug)]
pub struct ModbusLayer {
    core: LayerCore,
    lower: TransportLayer,
    unit_id: u8,
    transactions: SequenceCounter,
    pending: CorrelationRegistry<u16, Responder<Bytes>>,
    request_timeout: Option<Duration>,
    closed: bool,
}

impl ModbusLayer {
    /// Create a layer addressing `unit_id`.
    pub fn new(lower: TransportLayer, unit_id: u8) -> Self {
        Self {
            core: LayerCore::with_reassembler(mbap::frame_length),
            lower,
            unit_id,
            transactions: SequenceCounter::new(SEQUENCE_MODULUS),
            pending: CorrelationRegistry::new(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            closed: false,
        }
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Unit id requests are addressed to.
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Send one PDU.
    pub fn request(&mut self, pdu: &[u8], responder: Responder<Bytes>) {
        if self.closed {
            responder.complete(Err(Error::Closed));
            return;
        }
        let transaction_id = self.transactions.next() as u16;
        if let Some(displaced) =
            self.pending
                .request_context(transaction_id, responder, self.request_timeout)
        {
            displaced.complete(Err(Error::ContextSuperseded));
        }
        trace!(transaction_id, len = pdu.len(), "modbus request");
        self.send(
            Frame::new(mbap::encode(transaction_id, self.unit_id, pdu)),
            false,
        );
    }
}

impl Layer for ModbusLayer {
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
        while let Some((frame, priority)) = self.core.queue.dequeue_with_lane() {
            self.send(frame, priority);
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<()> {
        let header = MbapHeader::decode(&frame.data)?;
        if header.protocol_id != 0 {
            warn!(protocol_id = header.protocol_id, "dropping non-modbus frame");
            return Ok(());
        }
        let pdu = frame.data.slice(MBAP_SIZE..);
        let Some(responder) = self.pending.resolve_context(&header.transaction_id) else {
            debug!(transaction_id = header.transaction_id, "dropping stale modbus reply");
            return Ok(());
        };

        let function = *pdu.first().ok_or(FrameError::TooShort {
            expected: MBAP_SIZE + 1,
            actual: frame.data.len(),
        })?;
        if function & EXCEPTION_BIT != 0 {
            let code = pdu.get(1).copied().unwrap_or_default();
            responder.complete(Err(Error::ModbusException {
                code,
                description: mbap::exception_description(code),
            }));
        } else {
            responder.complete(Ok(pdu));
        }
        Ok(())
    }

    fn handle_destroy(&mut self, error: &Error) {
        self.pending.fail_all(error);
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
        self.pending.next_deadline()
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        self.lower.handle_timeout(now)?;
        self.pending
            .expire_with_timeout(now, self.request_timeout.unwrap_or_default());
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending.fail_all(&Error::Closed);
        self.lower.close();
    }

    fn is_closed(&self) -> bool {
        self.closed && self.lower.is_closed()
    }
}

impl Endpoint for ModbusLayer {
    type Command = ModbusRequest;

    fn handle_command(&mut self, command: ModbusRequest) {
        self.request(&command.pdu, command.responder);
    }

    fn transport_mut(&mut self) -> &mut TransportLayer {
        &mut self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn reply(transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
        mbap::encode(transaction_id, 1, pdu).to_vec()
    }

    #[test]
    fn test_request_is_framed() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1);
        let (tx, _rx) = oneshot::channel();
        layer.request(&[0x03, 0x00, 0x00, 0x00, 0x01], tx);

        let bytes = layer.transport_mut().poll_transmit().unwrap();
        assert_eq!(hex::encode(&bytes), "000000000006010300000001");
        assert_eq!(layer.pending_requests(), 1);
    }

    #[test]
    fn test_replies_match_transaction_ids() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1);
        let (first, mut first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();
        layer.request(&[0x03, 0, 0, 0, 1], first);
        layer.request(&[0x03, 0, 1, 0, 1], second);

        let mut stream = reply(1, &[0x03, 0x02, 0x00, 0x2A]);
        stream.extend(reply(0, &[0x03, 0x02, 0x00, 0x07]));
        let (head, tail) = stream.split_at(5);
        layer.receive(head).unwrap();
        assert!(second_rx.try_recv().is_err());
        layer.receive(tail).unwrap();

        assert_eq!(first_rx.try_recv().unwrap().unwrap().as_ref(), &[0x03, 0x02, 0x00, 0x07]);
        assert_eq!(second_rx.try_recv().unwrap().unwrap().as_ref(), &[0x03, 0x02, 0x00, 0x2A]);
    }

    #[test]
    fn test_exception_response() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1);
        let (tx, mut rx) = oneshot::channel();
        layer.request(&[0x06, 0, 1, 0, 3], tx);
        layer.receive(&reply(0, &[0x86, 0x02])).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::ModbusException {
                code: 0x02,
                description: "illegal data address"
            })
        ));
    }

    #[test]
    fn test_empty_pdu_is_protocol_violation() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1);
        let (tx, _rx) = oneshot::channel();
        layer.request(&[0x03, 0, 0, 0, 1], tx);
        let result = layer.receive(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            result,
            Err(Error::Protocol(FrameError::TooShort { .. }))
        ));
    }

    #[test]
    fn test_destroy_rejects_pending() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1);
        let (tx, mut rx) = oneshot::channel();
        layer.request(&[0x01, 0, 0, 0, 8], tx);
        layer.destroy(Error::ConnectionClosed);

        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ConnectionClosed)));
        assert!(layer.transport_mut().poll_transmit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let mut layer = ModbusLayer::new(TransportLayer::new(), 1)
            .with_request_timeout(Some(Duration::from_millis(250)));
        let (tx, mut rx) = oneshot::channel();
        layer.request(&[0x03, 0, 0, 0, 1], tx);

        tokio::time::advance(Duration::from_millis(250)).await;
        layer.handle_timeout(Instant::now()).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Timeout(_))));

        layer.receive(&reply(0, &[0x03, 0x02, 0, 0])).unwrap();
        assert_eq!(layer.pending_requests(), 0);
    }
}
