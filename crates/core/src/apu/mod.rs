//! Audio building blocks shared by the frame scheduler and the mixer.
//!
//! ## Components
//!
//! - **SampleProducer**: cycle-driven sound chip contract
//! - **SampleBuffer**: fixed-capacity per-frame mono buffer
//! - **Sn76489Psg**: the Sega PSG as a concrete producer
//! - **TimingMode**: NTSC/PAL line counts, refresh and clock constants

pub mod audio_chip;
pub mod sample_buffer;
pub mod sn76489;
pub mod timing;

pub use audio_chip::SampleProducer;
pub use sample_buffer::{SampleBuffer, SAMPLE_BUFFER_CAPACITY};
pub use sn76489::Sn76489Psg;
pub use timing::{TimingMode, AUDIO_FREQ_DIVISOR, CYCLES_PER_LINE};
