//! Growable tensor scratch buffer
//!
//! Each stage keeps one of these to hold its input tensor between calls.
//! The buffer only ever grows; a request that fits the current capacity
//! reuses the existing allocation.

/// Stage-local `f32` buffer with grow-only capacity
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    data: Vec<f32>,
    grow_count: u64,
}

impl ScratchBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a zeroed-or-stale slice of exactly `len` elements
    ///
    /// Callers are expected to overwrite every element.
    pub fn prepare(&mut self, len: usize) -> &mut [f32] {
        if self.data.len() < len {
            self.data.resize(len, 0.0);
            self.grow_count += 1;
        }
        &mut self.data[..len]
    }

    /// First `len` elements of the buffer
    pub fn as_slice(&self, len: usize) -> &[f32] {
        &self.data[..len.min(self.data.len())]
    }

    /// Number of elements currently allocated
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// How many times the buffer had to grow
    pub fn grow_count(&self) -> u64 {
        self.grow_count
    }
}
