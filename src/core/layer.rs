//! Shared layer state and upward forwarding.

use std::collections::VecDeque;

use super::error::Result;
use super::frame::Frame;
use super::queue::FrameQueue;
use super::reassembler::{FrameLength, StreamReassembler};
use super::traits::Layer;

/// State every layer carries: its inbound-from-above queue, the frames it
/// has forwarded upward but the upper layer has not yet pulled, and an
/// optional reassembler for byte-stream input.
#[derive(Debug, Default)]
pub struct LayerCore {
    /// Frames handed down by the upper layer.
    pub queue: FrameQueue,
    /// Frames forwarded to the upper layer.
    pub upward: VecDeque<Frame>,
    /// Present when this layer's input is an unframed byte stream.
    pub reassembler: Option<StreamReassembler>,
}

impl LayerCore {
    /// Core for a layer whose input is already framed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Core for a layer that reassembles frames out of a byte stream.
    pub fn with_reassembler(frame_length: FrameLength) -> Self {
        Self {
            reassembler: Some(StreamReassembler::new(frame_length)),
            ..Self::default()
        }
    }

    /// Hand a frame to the upper layer.
    pub fn forward_up(&mut self, frame: Frame) {
        self.upward.push_back(frame);
    }

    /// Drop queued, forwarded and partially reassembled data.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.upward.clear();
        if let Some(reassembler) = self.reassembler.as_mut() {
            reassembler.clear();
        }
    }
}

/// Deliver a frame from the lower layer to `layer`.
///
/// Without a reassembler the frame goes straight to `handle_data`. With one,
/// the bytes are appended and every complete frame is extracted and handled
/// in arrival order, since one read may carry several frames.
pub fn forward<L: Layer + ?Sized>(layer: &mut L, frame: Frame) -> Result<()> {
    match layer.core_mut().reassembler.as_mut() {
        Some(reassembler) => reassembler.append(&frame.data),
        None => return layer.handle_data(frame),
    }

    let routing = frame.routing;
    loop {
        let next = layer
            .core_mut()
            .reassembler
            .as_mut()
            .and_then(|r| r.try_extract_frame());
        match next {
            Some(data) => layer.handle_data(Frame::new(data).with_routing(routing))?,
            None => return Ok(()),
        }
    }
}
