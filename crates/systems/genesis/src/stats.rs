//! Frame profiling and the aggregate statistics snapshot.

use crate::audio_core::{AudioCore, AudioCoreStats};
use crate::audio_out::BufferStats;
use crate::frameskip::{FrameSkipState, SkipStats};
use crate::mixer::MixerStats;
use crate::scheduler::FrameScheduler;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::Serialize;

/// A frame slower than this counts as slow
pub const SLOW_FRAME_US: u32 = 17_000;
/// A frame faster than this counts as fast
pub const FAST_FRAME_US: u32 = 16_000;

/// Where one frame's time went, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimes {
    pub m68k_us: u32,
    pub z80_us: u32,
    pub sound_us: u32,
    pub render_us: u32,
    pub audio_wait_us: u32,
    pub frame_us: u32,
}

/// Phase totals over a reporting interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameProfile {
    pub frames: u32,
    pub rendered: u32,
    pub m68k_us: u64,
    pub z80_us: u64,
    pub sound_us: u64,
    pub render_us: u64,
    pub audio_wait_us: u64,
    pub frame_us: u64,
    pub min_frame_us: u32,
    pub max_frame_us: u32,
    pub slow_frames: u32,
    pub fast_frames: u32,
}

impl Default for FrameProfile {
    fn default() -> Self {
        Self {
            frames: 0,
            rendered: 0,
            m68k_us: 0,
            z80_us: 0,
            sound_us: 0,
            render_us: 0,
            audio_wait_us: 0,
            frame_us: 0,
            min_frame_us: u32::MAX,
            max_frame_us: 0,
            slow_frames: 0,
            fast_frames: 0,
        }
    }
}

impl FrameProfile {
    pub fn record(&mut self, times: &PhaseTimes, rendered: bool) {
        self.frames += 1;
        if rendered {
            self.rendered += 1;
        }
        self.m68k_us += times.m68k_us as u64;
        self.z80_us += times.z80_us as u64;
        self.sound_us += times.sound_us as u64;
        self.render_us += times.render_us as u64;
        self.audio_wait_us += times.audio_wait_us as u64;
        self.frame_us += times.frame_us as u64;
        self.min_frame_us = self.min_frame_us.min(times.frame_us);
        self.max_frame_us = self.max_frame_us.max(times.frame_us);
        if times.frame_us > SLOW_FRAME_US {
            self.slow_frames += 1;
        } else if times.frame_us < FAST_FRAME_US {
            self.fast_frames += 1;
        }
    }

    fn avg(&self, total: u64) -> u64 {
        total / self.frames.max(1) as u64
    }

    pub fn summary(&self) -> String {
        format!(
            "{} frames ({} rendered) avg us: m68k={} z80={} sound={} render={} wait={} frame={} [min={} max={}] slow={} fast={}",
            self.frames,
            self.rendered,
            self.avg(self.m68k_us),
            self.avg(self.z80_us),
            self.avg(self.sound_us),
            self.avg(self.render_us),
            self.avg(self.audio_wait_us),
            self.avg(self.frame_us),
            if self.frames == 0 { 0 } else { self.min_frame_us },
            self.max_frame_us,
            self.slow_frames,
            self.fast_frames
        )
    }
}

/// Accumulates `FrameProfile`s and reports one every `interval` frames.
pub struct Profiler {
    interval: u32,
    current: FrameProfile,
    last: Option<FrameProfile>,
}

impl Profiler {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            current: FrameProfile::default(),
            last: None,
        }
    }

    /// Returns the finished profile when this frame closes an interval.
    pub fn on_frame(&mut self, times: &PhaseTimes, rendered: bool) -> Option<FrameProfile> {
        if self.interval == 0 {
            return None;
        }
        self.current.record(times, rendered);
        if self.current.frames < self.interval {
            return None;
        }
        let done = std::mem::take(&mut self.current);
        log(LogCategory::Profile, LogLevel::Info, || done.summary());
        self.last = Some(done);
        Some(done)
    }

    /// Most recent complete interval
    pub fn last(&self) -> Option<FrameProfile> {
        self.last
    }

    pub fn reset(&mut self) {
        self.current = FrameProfile::default();
        self.last = None;
    }
}

/// Everything `debug_state` reports
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub frames: u64,
    pub skip_policy: &'static str,
    pub skip: SkipStats,
    pub skip_state: FrameSkipState,
    pub frames_published: u64,
    pub audio: AudioCoreStats,
    pub mixer: MixerStats,
    pub buffers: BufferStats,
    pub last_profile: Option<FrameProfile>,
}

impl PipelineStats {
    pub fn collect(scheduler: &FrameScheduler, audio: &AudioCore) -> Self {
        Self {
            frames: scheduler.frame(),
            skip_policy: scheduler.policy_name(),
            skip: scheduler.skip_stats(),
            skip_state: scheduler.skip_state(),
            frames_published: scheduler.frames_published(),
            audio: audio.stats(),
            mixer: audio.mixer_stats(),
            buffers: audio.buffer_stats(),
            last_profile: scheduler.last_profile(),
        }
    }
}
