//! Frame reassembly from a raw byte stream
//!
//! The transport delivers arbitrary fragments: a single read may carry half
//! a frame, several back-to-back frames, or a delimiter split across two
//! reads. The framer buffers input and cuts complete payloads at the fixed
//! delimiter, in order.

use bytes::{Buf, Bytes, BytesMut};
use parley_core::{ParleyError, ParleyResult};

/// Default frame delimiter
pub const DELIMITER: &[u8] = b"<EOF>";

/// Incremental frame reassembler
///
/// Owns the accumulating buffer; between calls it holds at most one partial,
/// not-yet-terminated frame. `BytesMut` gives amortized-linear growth, so
/// large frames arriving chunk by chunk avoid repeated full copies.
#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    delimiter: Vec<u8>,
}

impl Framer {
    /// Create a framer using the default `<EOF>` delimiter
    pub fn new() -> Self {
        Self::with_delimiter(DELIMITER)
    }

    /// Create a framer with a custom delimiter
    ///
    /// # Panics
    /// Panics if the delimiter is empty; an empty delimiter makes frame
    /// boundaries meaningless.
    pub fn with_delimiter(delimiter: &[u8]) -> Self {
        assert!(!delimiter.is_empty(), "frame delimiter must not be empty");
        Self {
            buffer: BytesMut::new(),
            delimiter: delimiter.to_vec(),
        }
    }

    /// Consume one transport chunk and emit every frame it completes
    ///
    /// Frames are emitted in arrival order. Zero-length payloads (delimiter
    /// immediately following a delimiter) are valid frames with no content
    /// and are skipped, not emitted.
    ///
    /// # Errors
    /// A zero-length `chunk` signals that the peer has closed the stream and
    /// yields [`ParleyError::ServerDisconnect`]; the buffered partial frame,
    /// if any, is left untouched.
    pub fn feed(&mut self, chunk: &[u8]) -> ParleyResult<Vec<Bytes>> {
        if chunk.is_empty() {
            return Err(ParleyError::ServerDisconnect(
                "server closed the stream".to_string(),
            ));
        }

        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(idx) = find_delimiter(&self.buffer, &self.delimiter) {
            let payload = self.buffer.split_to(idx).freeze();
            self.buffer.advance(self.delimiter.len());
            if !payload.is_empty() {
                frames.push(payload);
            }
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet cut into a frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered partial frame
    ///
    /// Called when a connection is torn down so a reconnect starts clean.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_delimiter(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    haystack
        .windows(delimiter.len())
        .position(|window| window == delimiter)
}
