//! Region timing for the Genesis video/audio clocks.

use serde::{Deserialize, Serialize};

/// Master clock cycles per scanline (both regions)
pub const CYCLES_PER_LINE: u32 = 3420;

/// Master clock cycles per generated audio sample
pub const AUDIO_FREQ_DIVISOR: u32 = 1009;

/// Console region timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimingMode {
    /// NTSC (North America, Japan) - 60 Hz, 262 lines
    #[default]
    Ntsc,
    /// PAL (Europe, Australia) - 50 Hz, 313 lines
    Pal,
}

impl TimingMode {
    /// Master clock frequency in Hz
    pub fn master_clock_hz(&self) -> u32 {
        match self {
            TimingMode::Ntsc => 53_693_175,
            TimingMode::Pal => 53_203_424,
        }
    }

    /// Nominal refresh rate used for frame budgeting
    pub fn refresh_hz(&self) -> u32 {
        match self {
            TimingMode::Ntsc => 60,
            TimingMode::Pal => 50,
        }
    }

    /// Total scanlines per frame, including blanking
    pub fn lines_per_frame(&self) -> u32 {
        match self {
            TimingMode::Ntsc => 262,
            TimingMode::Pal => 313,
        }
    }

    /// Visible lines (V28 on NTSC, V30 on PAL)
    pub fn visible_lines(&self) -> u32 {
        match self {
            TimingMode::Ntsc => 224,
            TimingMode::Pal => 240,
        }
    }

    /// Wall-clock time available for one frame
    pub fn frame_budget_us(&self) -> u32 {
        1_000_000 / self.refresh_hz()
    }

    /// Master cycles in one full frame
    pub fn cycles_per_frame(&self) -> u32 {
        self.lines_per_frame() * CYCLES_PER_LINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_geometry() {
        assert_eq!(TimingMode::Ntsc.lines_per_frame(), 262);
        assert_eq!(TimingMode::Pal.lines_per_frame(), 313);
        assert_eq!(TimingMode::Ntsc.visible_lines(), 224);
        assert_eq!(TimingMode::Pal.visible_lines(), 240);
    }

    #[test]
    fn test_frame_budget() {
        assert_eq!(TimingMode::Ntsc.frame_budget_us(), 16_666);
        assert_eq!(TimingMode::Pal.frame_budget_us(), 20_000);
    }

    #[test]
    fn test_sound_target_fits_ntsc_frame() {
        // 888 samples per frame at the audio divisor lands inside one NTSC frame.
        assert!(888 * AUDIO_FREQ_DIVISOR <= TimingMode::Ntsc.cycles_per_frame());
    }
}
