//! # Session Buffer
//!
//! Accumulates the raw audio chunks of the utterance a client is currently speaking.
//!
//! ## Key Features:
//! - **Append-only until drained**: chunks keep their arrival order and are stored untouched,
//!   so draining reproduces the original byte stream exactly
//! - **Byte cap**: a session can never hold more than `max_bytes`, which bounds memory under
//!   a misbehaving or flooding client
//! - **Exclusive access**: `append` and `drain_and_clear` both take `&mut self`; the buffer
//!   lives inside one connection actor, so the two can never interleave

use crate::audio::codec;
use crate::error::{GatewayError, GatewayResult};

/// Per-session accumulator of raw PCM chunks.
#[derive(Debug)]
pub struct SessionBuffer {
    chunks: Vec<Vec<u8>>,
    len_bytes: usize,
    max_bytes: usize,
}

impl SessionBuffer {
    /// Create an empty buffer that refuses to grow past `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: Vec::new(),
            len_bytes: 0,
            max_bytes,
        }
    }

    /// Store `chunk` at the end of the buffer.
    ///
    /// ## Errors:
    /// Returns [`GatewayError::BufferOverflow`] if the chunk would take the buffer past its
    /// cap. The buffer is left exactly as it was.
    pub fn append(&mut self, chunk: &[u8]) -> GatewayResult<()> {
        let attempted = self.len_bytes + chunk.len();
        if attempted > self.max_bytes {
            return Err(GatewayError::BufferOverflow {
                limit: self.max_bytes,
                attempted,
            });
        }

        if !chunk.is_empty() {
            self.chunks.push(chunk.to_vec());
            self.len_bytes = attempted;
        }
        Ok(())
    }

    /// Take every buffered chunk, in order, and leave the buffer empty.
    pub fn drain_and_clear(&mut self) -> Vec<Vec<u8>> {
        self.len_bytes = 0;
        std::mem::take(&mut self.chunks)
    }

    /// Drop everything buffered (used when the session closes).
    pub fn discard(&mut self) {
        self.chunks = Vec::new();
        self.len_bytes = 0;
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    #[cfg(test)]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len_bytes == 0
    }

    /// Seconds of audio currently buffered (a trailing odd byte is not counted).
    pub fn duration_seconds(&self) -> f64 {
        codec::duration_seconds(self.len_bytes / codec::BYTES_PER_SAMPLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order_and_bytes() {
        let mut buffer = SessionBuffer::new(1024);
        buffer.append(&[1, 2, 3]).unwrap();
        buffer.append(&[4]).unwrap();
        buffer.append(&[5, 6]).unwrap();

        assert_eq!(buffer.len_bytes(), 6);
        assert_eq!(buffer.chunk_count(), 3);

        let drained = buffer.drain_and_clear();
        assert_eq!(drained.concat(), vec![1, 2, 3, 4, 5, 6]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn test_overflow_leaves_buffer_untouched() {
        let mut buffer = SessionBuffer::new(10);
        buffer.append(&[0; 8]).unwrap();

        match buffer.append(&[0; 3]) {
            Err(GatewayError::BufferOverflow { limit, attempted }) => {
                assert_eq!(limit, 10);
                assert_eq!(attempted, 11);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(buffer.len_bytes(), 8);

        // Exactly at the cap is still fine.
        buffer.append(&[0; 2]).unwrap();
        assert_eq!(buffer.len_bytes(), 10);
    }

    #[test]
    fn test_cap_applies_per_utterance() {
        let mut buffer = SessionBuffer::new(4);
        buffer.append(&[0; 4]).unwrap();
        buffer.drain_and_clear();
        buffer.append(&[0; 4]).unwrap();
        assert_eq!(buffer.len_bytes(), 4);
    }

    #[test]
    fn test_duration() {
        let mut buffer = SessionBuffer::new(64000);
        buffer.append(&vec![0; 32000]).unwrap();
        assert_eq!(buffer.duration_seconds(), 1.0);
    }

    #[test]
    fn test_discard() {
        let mut buffer = SessionBuffer::new(64);
        buffer.append(&[1, 2]).unwrap();
        buffer.discard();
        assert!(buffer.is_empty());
        assert!(buffer.drain_and_clear().is_empty());
    }
}
