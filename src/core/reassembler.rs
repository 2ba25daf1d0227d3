//! Stream reassembly.
//!
//! A byte-stream read can hold part of a frame, exactly one frame, or several
//! frames back to back. [`StreamReassembler`] accumulates chunks in a
//! `BytesMut` and slices complete frames off the head using a length function
//! supplied by the layer that owns it.

use bytes::{Bytes, BytesMut};

/// Length of the frame at the head of `buffer`, or `None` while the header
/// is still incomplete.
pub type FrameLength = fn(&[u8]) -> Option<usize>;

/// Accumulates an inbound byte stream and extracts complete frames.
#[derive(Debug)]
pub struct StreamReassembler {
    buffer: BytesMut,
    frame_length: FrameLength,
}

impl StreamReassembler {
    /// Create a reassembler around a frame length function.
    pub fn new(frame_length: FrameLength) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            frame_length,
        }
    }

    /// Append a chunk read from the stream.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Slice the next complete frame off the buffer.
    ///
    /// Returns `None` without touching the buffer when more bytes are needed.
    /// Call repeatedly until it returns `None`.
    pub fn try_extract_frame(&mut self) -> Option<Bytes> {
        let needed = (self.frame_length)(&self.buffer)?;
        if needed == 0 || self.buffer.len() < needed {
            return None;
        }
        Some(self.buffer.split_to(needed).freeze())
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Toy framing: one length byte counting itself.
    fn length_prefixed(buffer: &[u8]) -> Option<usize> {
        buffer.first().map(|len| *len as usize)
    }

    fn sample_frames() -> Vec<Vec<u8>> {
        vec![
            vec![3, 0xAA, 0xBB],
            vec![1],
            vec![6, 1, 2, 3, 4, 5],
            vec![2, 0xFF],
            vec![9, 9, 8, 7, 6, 5, 4, 3, 2],
        ]
    }

    #[test]
    fn test_need_more_data_leaves_buffer() {
        let mut reassembler = StreamReassembler::new(length_prefixed);
        assert!(reassembler.try_extract_frame().is_none());

        reassembler.append(&[4, 1]);
        assert!(reassembler.try_extract_frame().is_none());
        assert_eq!(reassembler.len(), 2);

        reassembler.append(&[2, 3]);
        assert_eq!(reassembler.try_extract_frame().unwrap().as_ref(), &[4, 1, 2, 3]);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_batched_frames_in_one_read() {
        let mut reassembler = StreamReassembler::new(length_prefixed);
        let stream: Vec<u8> = sample_frames().concat();
        reassembler.append(&stream);

        let mut extracted = Vec::new();
        while let Some(frame) = reassembler.try_extract_frame() {
            extracted.push(frame.to_vec());
        }
        assert_eq!(extracted, sample_frames());
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let frames = sample_frames();
        let stream: Vec<u8> = frames.concat();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let mut reassembler = StreamReassembler::new(length_prefixed);
            let mut extracted = Vec::new();
            let mut offset = 0;
            while offset < stream.len() {
                let chunk = rng.gen_range(1..=stream.len() - offset);
                reassembler.append(&stream[offset..offset + chunk]);
                offset += chunk;
                while let Some(frame) = reassembler.try_extract_frame() {
                    extracted.push(frame.to_vec());
                }
            }
            assert_eq!(extracted, frames);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frames = sample_frames();
        let mut reassembler = StreamReassembler::new(length_prefixed);
        let mut extracted = Vec::new();
        for byte in frames.concat() {
            reassembler.append(&[byte]);
            while let Some(frame) = reassembler.try_extract_frame() {
                extracted.push(frame.to_vec());
            }
        }
        assert_eq!(extracted, frames);
    }

    #[test]
    fn test_zero_length_is_never_extracted() {
        let mut reassembler = StreamReassembler::new(length_prefixed);
        reassembler.append(&[0, 1, 2]);
        assert!(reassembler.try_extract_frame().is_none());
        assert_eq!(reassembler.len(), 3);

        reassembler.clear();
        assert!(reassembler.is_empty());
    }
}
