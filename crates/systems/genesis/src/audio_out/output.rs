//! Where DMA-transferred words end up.

use std::sync::{Arc, Mutex};

/// The I2S transmit FIFO as seen by the DMA engine.
pub trait I2sOutput: Send {
    fn write(&mut self, words: &[u32]);

    fn flush(&mut self) {}
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullOutput;

impl I2sOutput for NullOutput {
    fn write(&mut self, _words: &[u32]) {}
}

/// Records every word so the played stream can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutput {
    words: Arc<Mutex<Vec<u32>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn snapshot(&self) -> Vec<u32> {
        match self.words.lock() {
            Ok(words) => words.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut words) = self.words.lock() {
            words.clear();
        }
    }
}

impl I2sOutput for CaptureOutput {
    fn write(&mut self, words: &[u32]) {
        if let Ok(mut sink) = self.words.lock() {
            sink.extend_from_slice(words);
        }
    }
}
