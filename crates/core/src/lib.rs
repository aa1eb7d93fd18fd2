//! Core emulator primitives and traits.

pub mod apu;
pub mod logging;
pub mod renderer;

pub mod types {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }

    pub type AudioSample = i16;
}

use serde_json::Value;

/// A system that advances one video frame at a time.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// What a single `step_frame` reports back (timing, skip decision, ...)
    type FrameReport;

    /// Rebuild all per-run state, as on a cartridge reload
    fn reset(&mut self);

    /// Emulate exactly one frame.
    fn step_frame(&mut self) -> Result<Self::FrameReport, Self::Error>;

    /// JSON snapshot of counters and internal state for debugging
    fn debug_state(&self) -> Value;
}
