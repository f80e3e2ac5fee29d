//! Buffer for high-frequency chunk text

use tracing::trace;

/// Accumulates text between flushes
#[derive(Debug, Default)]
pub struct ChunkCoalescer {
    pending: String,
    pushes: usize,
}

impl ChunkCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.pending.push_str(text);
        self.pushes += 1;
    }

    /// Everything buffered since the last flush, or `None` if nothing is
    pub fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        trace!(deltas = self.pushes, bytes = self.pending.len(), "coalesced chunk");
        self.pushes = 0;
        Some(std::mem::take(&mut self.pending))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
