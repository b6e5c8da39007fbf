//! Splits the decoder's image pipe into whole JPEG frames.
//!
//! The pipe is an unbounded byte stream delivered in arbitrary chunks. Each
//! frame is the span from a start-of-image marker to the next end-of-image
//! marker after it, inclusive.

use crate::shared::constants::{FRAME_END_MARKER, FRAME_START_MARKER};

/// One encoded image cut from the stream.
pub type EncodedFrame = Vec<u8>;

/// Owns the bytes received but not yet emitted as frames.
///
/// After every [`extract`](Self::extract) the buffer holds only what follows
/// the last emitted frame. A stream with no complete marker pair is kept in
/// full until one arrives.
#[derive(Debug, Default)]
pub struct FrameDemuxer {
    buffer: Vec<u8>,
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame completed by it, in order.
    pub fn extract(&mut self, chunk: &[u8]) -> Vec<EncodedFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some((start, end)) = next_frame_span(&self.buffer, consumed) {
            frames.push(self.buffer[start..end].to_vec());
            consumed = end;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        frames
    }

    /// Bytes waiting for a frame boundary.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Finds `[start, end)` of the first complete frame at or after `from`.
fn next_frame_span(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let start = from + find_marker(&buffer[from..], &FRAME_START_MARKER)?;
    let body = start + FRAME_START_MARKER.len();
    let end = body + find_marker(&buffer[body..], &FRAME_END_MARKER)?;
    Some((start, end + FRAME_END_MARKER.len()))
}

fn find_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    buffer
        .windows(marker.len())
        .position(|window| window == marker)
}
