//! Bounded FIFO of recently-normalized session output, kept for late-attaching
//! subscribers and for `CaptureNextChunk`-style snapshotting.

use std::collections::VecDeque;
use std::time::SystemTime;

/// One appended chunk of normalized (already charset-decoded) output.
#[derive(Debug, Clone)]
pub struct ScrollbackChunk {
    pub data: Vec<u8>,
    pub at: SystemTime,
}

/// Bounded byte-ring of recent output. A limit of `0` disables buffering
/// entirely: `append` becomes a no-op and `snapshot` always returns empty.
pub struct Scrollback {
    limit: usize,
    total: usize,
    chunks: VecDeque<ScrollbackChunk>,
}

impl Scrollback {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            limit: limit_bytes,
            total: 0,
            chunks: VecDeque::new(),
        }
    }

    /// Appends a chunk, evicting the oldest entries until the total size is
    /// back within the configured limit.
    pub fn append(&mut self, data: &[u8]) {
        if self.limit == 0 || data.is_empty() {
            return;
        }
        self.total += data.len();
        self.chunks.push_back(ScrollbackChunk {
            data: data.to_vec(),
            at: SystemTime::now(),
        });
        while self.total > self.limit {
            match self.chunks.pop_front() {
                Some(evicted) => self.total -= evicted.data.len(),
                None => break,
            }
        }
    }

    /// Current total size in bytes across all retained chunks.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Deep copy of the retained chunks, oldest first, safe to hand to
    /// external callers without holding the session lock.
    pub fn snapshot(&self) -> Vec<ScrollbackChunk> {
        self.chunks.iter().cloned().collect()
    }

    /// Updates the byte limit, evicting immediately if the new limit is
    /// smaller than the current total.
    pub fn set_limit(&mut self, limit_bytes: usize) {
        self.limit = limit_bytes;
        if self.limit == 0 {
            self.chunks.clear();
            self.total = 0;
            return;
        }
        while self.total > self.limit {
            match self.chunks.pop_front() {
                Some(evicted) => self.total -= evicted.data.len(),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_chunks_past_the_limit() {
        let mut sb = Scrollback::new(1024);
        sb.append(&[0u8; 400]);
        sb.append(&[0u8; 400]);
        sb.append(&[0u8; 400]);
        assert_eq!(sb.len(), 800);
        assert_eq!(sb.snapshot().len(), 2);
    }

    #[test]
    fn zero_limit_disables_storage() {
        let mut sb = Scrollback::new(0);
        sb.append(b"hello");
        assert_eq!(sb.len(), 0);
        assert!(sb.snapshot().is_empty());
    }

    #[test]
    fn empty_append_is_a_no_op() {
        let mut sb = Scrollback::new(1024);
        sb.append(&[]);
        assert_eq!(sb.len(), 0);
    }
}
