//! Fixed-capacity mono sample buffer filled by a sound chip over one frame.

use crate::types::AudioSample;

/// Samples one chip can produce in a single frame before further output is
/// dropped.
pub const SAMPLE_BUFFER_CAPACITY: usize = 4096;

/// Mono `i16` samples plus a live length.
///
/// Storage is allocated once; `clear` only rewinds the length so a buffer can
/// be recycled every frame without touching the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    data: Box<[AudioSample]>,
    len: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append one sample. Returns `false` (and drops it) when full.
    pub fn push(&mut self, sample: AudioSample) -> bool {
        if self.len == self.data.len() {
            return false;
        }
        self.data[self.len] = sample;
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples written since the last `clear`
    pub fn as_slice(&self) -> &[AudioSample] {
        &self.data[..self.len]
    }

    /// Entire backing storage, including slots past `len`.
    ///
    /// Consumers index this with a separately published count, so reads past
    /// `len` are well defined (they see whatever the slot last held).
    pub fn storage(&self) -> &[AudioSample] {
        &self.data
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}
