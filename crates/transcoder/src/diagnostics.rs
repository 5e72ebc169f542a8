//! Bounded capture of transcoder stderr.

use std::collections::VecDeque;

/// How many trailing stderr bytes are kept per process.
pub const STDERR_TAIL_CAPACITY: usize = 4000;

/// Fixed-capacity buffer holding only the most recent bytes pushed into it.
#[derive(Debug)]
pub struct StderrTail {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(STDERR_TAIL_CAPACITY)
    }
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if bytes.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Buffered text, lossily decoded and trimmed. A multi-byte character cut
    /// at the front shows up as a replacement character.
    pub fn to_string_lossy(&self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut joined = Vec::with_capacity(self.buf.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        String::from_utf8_lossy(&joined).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_capacity() {
        let mut tail = StderrTail::new(16);
        tail.push(b"abc");
        tail.push(b"def");
        assert_eq!(tail.to_string_lossy(), "abcdef");
        assert_eq!(tail.len(), 6);
    }

    #[test]
    fn drops_oldest_bytes_when_full() {
        let mut tail = StderrTail::new(8);
        tail.push(b"0123456");
        tail.push(b"789");
        assert_eq!(tail.to_string_lossy(), "23456789");
        assert_eq!(tail.len(), 8);
    }

    #[test]
    fn oversized_push_keeps_its_suffix() {
        let mut tail = StderrTail::new(4);
        tail.push(b"xx");
        tail.push(b"abcdefgh");
        assert_eq!(tail.to_string_lossy(), "efgh");
    }

    #[test]
    fn default_capacity_is_bounded() {
        let mut tail = StderrTail::default();
        for _ in 0..100 {
            tail.push(&[b'e'; 1000]);
        }
        assert_eq!(tail.len(), STDERR_TAIL_CAPACITY);
    }
}
