//! Pipeline configuration, loaded from JSON.

use crate::audio_out::dma::DMA_CHANNEL_COUNT;
use crate::audio_out::ring::RingConfig;
use crate::audio_out::{BufferStrategy, DmaPacing};
use crate::frameskip::SkipPolicyConfig;
use crate::mixer::MixerConfig;
use emu_core::apu::{TimingMode, SAMPLE_BUFFER_CAPACITY};
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("samples per frame must be non-zero")]
    EmptyFrame,
    #[error("{0} samples per frame exceeds chip buffer capacity {1}")]
    FrameTooLarge(usize, usize),
    #[error("ring size {0} is not a power of two")]
    RingNotPowerOfTwo(usize),
    #[error("ring of {size} words cannot hold two {frame}-word frames plus {margin} margin")]
    RingTooSmall {
        size: usize,
        frame: usize,
        margin: usize,
    },
    #[error("DMA channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("chained playback needs two distinct DMA channels")]
    SharedChannel,
    #[error("volume {0} is outside 0..=128")]
    Volume(u8),
    #[error("fade pole {0} must be between 1 and 256")]
    FadePole(u32),
    #[error("sample rate must be non-zero")]
    SampleRate,
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Initial state of the audio controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    pub enabled: bool,
    pub fm_enabled: bool,
    pub psg_enabled: bool,
    /// 0..=128, 128 is unity
    pub volume: u8,
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            fm_enabled: true,
            psg_enabled: true,
            volume: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Console region at power-on
    pub region: TimingMode,
    /// Start in 40-cell horizontal mode
    pub h40: bool,
    pub sample_rate: u32,
    pub skip_policy: SkipPolicyConfig,
    pub max_consecutive_skips: u32,
    pub buffer_strategy: BufferStrategy,
    pub dma_pacing: DmaPacing,
    /// First entry is used by single-channel strategies
    pub dma_channels: [usize; 2],
    pub mixer: MixerConfig,
    pub ring: RingConfig,
    pub audio: AudioDefaults,
    /// Frames between profile reports; 0 disables them
    pub profile_interval_frames: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: TimingMode::Ntsc,
            h40: true,
            sample_rate: 53_280,
            skip_policy: SkipPolicyConfig::default(),
            max_consecutive_skips: 4,
            buffer_strategy: BufferStrategy::default(),
            dma_pacing: DmaPacing::default(),
            dma_channels: [2, 3],
            mixer: MixerConfig::default(),
            ring: RingConfig::default(),
            audio: AudioDefaults::default(),
            profile_interval_frames: 300,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let frame = self.mixer.samples_per_frame;
        if frame == 0 {
            return Err(ConfigError::EmptyFrame);
        }
        if frame > SAMPLE_BUFFER_CAPACITY {
            return Err(ConfigError::FrameTooLarge(frame, SAMPLE_BUFFER_CAPACITY));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate);
        }
        if self.mixer.fade_pole == 0 || self.mixer.fade_pole > 256 {
            return Err(ConfigError::FadePole(self.mixer.fade_pole));
        }
        if self.audio.volume > 128 {
            return Err(ConfigError::Volume(self.audio.volume));
        }
        for &ch in &self.dma_channels {
            if ch >= DMA_CHANNEL_COUNT {
                return Err(ConfigError::NoSuchChannel(ch));
            }
        }
        if self.buffer_strategy == BufferStrategy::Chained
            && self.dma_channels[0] == self.dma_channels[1]
        {
            return Err(ConfigError::SharedChannel);
        }
        if self.buffer_strategy == BufferStrategy::Ring {
            let ring = self.ring;
            if !ring.size.is_power_of_two() {
                return Err(ConfigError::RingNotPowerOfTwo(ring.size));
            }
            if ring.size < 2 * frame + ring.margin {
                return Err(ConfigError::RingTooSmall {
                    size: ring.size,
                    frame,
                    margin: ring.margin,
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(_)) => Self::default(),
            Err(e) => {
                log(LogCategory::Scheduler, LogLevel::Warn, || {
                    format!("{}: {}. Using defaults.", path.display(), e)
                });
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
