//! Two-lane outbound frame queue.

use std::collections::VecDeque;

use super::frame::Frame;

/// FIFO of frames awaiting transmission, with a priority lane that always
/// drains first.
#[derive(Debug, Default)]
pub struct FrameQueue {
    priority: VecDeque<Frame>,
    normal: VecDeque<Frame>,
}

impl FrameQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to one lane.
    pub fn enqueue(&mut self, frame: Frame, priority: bool) {
        if priority {
            self.priority.push_back(frame);
        } else {
            self.normal.push_back(frame);
        }
    }

    /// Put a frame back at the head of its lane (used when a batch is full).
    pub fn requeue_front(&mut self, frame: Frame, priority: bool) {
        if priority {
            self.priority.push_front(frame);
        } else {
            self.normal.push_front(frame);
        }
    }

    /// Remove the next frame, priority lane first.
    pub fn dequeue(&mut self) -> Option<Frame> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    /// Remove the next frame and report which lane it came from.
    pub fn dequeue_with_lane(&mut self) -> Option<(Frame, bool)> {
        if let Some(frame) = self.priority.pop_front() {
            return Some((frame, true));
        }
        self.normal.pop_front().map(|frame| (frame, false))
    }

    /// Look at the next frame without removing it.
    pub fn peek(&self) -> Option<&Frame> {
        self.priority.front().or_else(|| self.normal.front())
    }

    /// Empty one whole lane, priority lane preferred.
    pub fn dequeue_all(&mut self) -> Vec<Frame> {
        if !self.priority.is_empty() {
            self.priority.drain(..).collect()
        } else {
            self.normal.drain(..).collect()
        }
    }

    /// Queue depth, optionally counting only the priority lane.
    pub fn size(&self, priority_only: bool) -> usize {
        if priority_only {
            self.priority.len()
        } else {
            self.priority.len() + self.normal.len()
        }
    }

    /// Check if both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.normal.is_empty()
    }

    /// Drop every queued frame.
    pub fn clear(&mut self) {
        self.priority.clear();
        self.normal.clear();
    }
}
