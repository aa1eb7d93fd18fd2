//! Mixes one frame of FM and PSG output into the hardware slot.
//!
//! Every frame commits exactly `samples_per_frame` stereo words, whatever
//! arrived from the emulation core. Missing or disabled audio is replaced by
//! a one-pole decay of the last output, and each frame's first samples are
//! ramped from where the previous frame ended so a discontinuity never turns
//! into a click.

use crate::audio_out::{pack_stereo, BufferManager};
use crate::config::AudioDefaults;
use crate::handoff::FrameAudio;
use emu_core::apu::SampleBuffer;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub const MAX_VOLUME: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Stereo words committed per frame
    pub samples_per_frame: usize,
    /// Samples ramped from the previous frame's last value
    pub crossfade_len: usize,
    /// Decay per sample of the silence fade, out of 256
    pub fade_pole: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            samples_per_frame: 888,
            crossfade_len: 32,
            fade_pole: 16,
        }
    }
}

/// One step of the silence fade: `v * (256 - pole) / 256`, truncating
/// toward zero so the sequence always reaches exactly 0.
#[inline]
pub fn decay_step(v: i32, pole: u32) -> i32 {
    v * (256 - pole.min(256) as i32) / 256
}

/// Volume and enable switches, written by the UI side at any time and read
/// once per frame by the audio core.
#[derive(Debug)]
pub struct AudioControls {
    volume: AtomicU8,
    enabled: AtomicBool,
    fm_enabled: AtomicBool,
    psg_enabled: AtomicBool,
}

impl AudioControls {
    pub fn new(defaults: &AudioDefaults) -> Self {
        Self {
            volume: AtomicU8::new(defaults.volume.min(MAX_VOLUME)),
            enabled: AtomicBool::new(defaults.enabled),
            fm_enabled: AtomicBool::new(defaults.fm_enabled),
            psg_enabled: AtomicBool::new(defaults.psg_enabled),
        }
    }

    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(MAX_VOLUME), Ordering::Relaxed);
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_fm_enabled(&self, on: bool) {
        self.fm_enabled.store(on, Ordering::Relaxed);
    }

    pub fn fm_enabled(&self) -> bool {
        self.fm_enabled.load(Ordering::Relaxed)
    }

    pub fn set_psg_enabled(&self, on: bool) {
        self.psg_enabled.store(on, Ordering::Relaxed);
    }

    pub fn psg_enabled(&self) -> bool {
        self.psg_enabled.load(Ordering::Relaxed)
    }
}

impl Default for AudioControls {
    fn default() -> Self {
        Self::new(&AudioDefaults::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MixerStats {
    pub frames: u64,
    pub faded_frames: u64,
    /// No frame was available from the emulation core
    pub missing_frames: u64,
    /// Negative or oversized sample counts
    pub invalid_counts: u64,
    /// Frames with fewer samples than the target
    pub short_frames: u64,
    pub clipped_samples: u64,
}

pub struct Mixer {
    config: MixerConfig,
    last: i16,
    stats: MixerStats,
}

impl Mixer {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            last: 0,
            stats: MixerStats::default(),
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn stats(&self) -> MixerStats {
        self.stats
    }

    /// Last value written, the start of the next crossfade or fade
    pub fn last_sample(&self) -> i16 {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = 0;
        self.stats = MixerStats::default();
    }

    /// Mix into a slot, then commit exactly one frame.
    pub fn submit(
        &mut self,
        frame: Option<&FrameAudio>,
        controls: &AudioControls,
        manager: &mut dyn BufferManager,
    ) {
        let slot = manager.acquire_write_slot();
        let target = slot.len();
        self.mix(frame, controls, slot);
        manager.commit_slot(target);
    }

    /// Fill all of `out`. Returns how many words came from chip samples.
    pub fn mix(
        &mut self,
        frame: Option<&FrameAudio>,
        controls: &AudioControls,
        out: &mut [u32],
    ) -> usize {
        self.stats.frames += 1;
        let target = out.len();

        let Some(frame) = frame else {
            self.stats.missing_frames += 1;
            self.fade(out);
            return 0;
        };
        let (Some(fm), Some(psg)) = (frame.fm.as_ref(), frame.psg.as_ref()) else {
            self.fade(out);
            return 0;
        };

        let fm_count = if controls.fm_enabled() {
            self.sanitize(frame.fm_count, fm)
        } else {
            0
        };
        let psg_count = if controls.psg_enabled() {
            self.sanitize(frame.psg_count, psg)
        } else {
            0
        };
        let available = fm_count.max(psg_count).min(target);
        if !controls.enabled() || available == 0 {
            self.fade(out);
            return 0;
        }
        if available < target {
            self.stats.short_frames += 1;
        }

        let volume = controls.volume() as i32;
        let fm = &fm.storage()[..fm_count];
        let psg = &psg.storage()[..psg_count];
        let ramp = self.config.crossfade_len.min(available);
        // A frame that ends inside the ramp must still finish on its own
        // last sample, since that value pads the rest of the slot.
        let steps = (if ramp == available { ramp } else { ramp + 1 }) as i32;
        let prev = self.last as i32;

        for (i, word) in out[..available].iter_mut().enumerate() {
            let raw = fm.get(i).copied().unwrap_or(0) as i32
                + psg.get(i).copied().unwrap_or(0) as i32;
            let scaled = (raw * volume) >> 7;
            let mut s = scaled.clamp(i16::MIN as i32, i16::MAX as i32);
            if s != scaled {
                self.stats.clipped_samples += 1;
            }
            if i < ramp {
                s = prev + (s - prev) * (i as i32 + 1) / steps;
            }
            let s = s as i16;
            *word = pack_stereo(s, s);
        }

        let hold = out[available - 1];
        out[available..].fill(hold);
        self.last = hold as u16 as i16;
        available
    }

    fn sanitize(&mut self, count: i32, buffer: &SampleBuffer) -> usize {
        if count < 0 || count as usize > buffer.capacity() {
            self.stats.invalid_counts += 1;
            log(LogCategory::Mixer, LogLevel::Warn, || {
                format!("discarding invalid sample count {}", count)
            });
            return 0;
        }
        count as usize
    }

    fn fade(&mut self, out: &mut [u32]) {
        self.stats.faded_frames += 1;
        let mut level = self.last as i32;
        for word in out.iter_mut() {
            level = decay_step(level, self.config.fade_pole);
            let s = level as i16;
            *word = pack_stereo(s, s);
        }
        self.last = level as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_out::{unpack_left, unpack_right};

    const TARGET: usize = 888;

    fn frame_of(fm: &[i16], psg: &[i16]) -> FrameAudio {
        let mut fm_buf = SampleBuffer::new();
        let mut psg_buf = SampleBuffer::new();
        for &s in fm {
            fm_buf.push(s);
        }
        for &s in psg {
            psg_buf.push(s);
        }
        FrameAudio {
            frame: 0,
            fm_count: fm.len() as i32,
            psg_count: psg.len() as i32,
            fm: Some(fm_buf),
            psg: Some(psg_buf),
        }
    }

    fn lefts(words: &[u32]) -> Vec<i16> {
        words.iter().map(|&w| unpack_left(w)).collect()
    }

    #[test]
    fn test_decay_step_truncates_toward_zero() {
        assert_eq!(decay_step(256, 16), 240);
        assert_eq!(decay_step(1, 16), 0);
        assert_eq!(decay_step(-1, 16), 0);
        assert_eq!(decay_step(-256, 16), -240);
    }

    #[test]
    fn test_sums_scales_and_duplicates() {
        let mut mixer = Mixer::new(MixerConfig {
            crossfade_len: 0,
            ..MixerConfig::default()
        });
        let controls = AudioControls::default();
        controls.set_volume(64);
        let frame = frame_of(&[1000; TARGET], &[200; TARGET]);
        let mut out = vec![0u32; TARGET];
        assert_eq!(mixer.mix(Some(&frame), &controls, &mut out), TARGET);
        assert!(out.iter().all(|&w| unpack_left(w) == 600 && unpack_right(w) == 600));
    }

    #[test]
    fn test_clamps_instead_of_wrapping() {
        let mut mixer = Mixer::new(MixerConfig {
            crossfade_len: 0,
            ..MixerConfig::default()
        });
        let controls = AudioControls::default();
        let frame = frame_of(&[30000; 10], &[30000; 10]);
        let mut out = vec![0u32; 10];
        mixer.mix(Some(&frame), &controls, &mut out);
        assert!(lefts(&out).iter().all(|&s| s == i16::MAX));
        assert_eq!(mixer.stats().clipped_samples, 10);
    }

    #[test]
    fn test_short_frame_pads_with_last_value() {
        let mut mixer = Mixer::new(MixerConfig {
            crossfade_len: 0,
            ..MixerConfig::default()
        });
        let controls = AudioControls::default();
        let frame = frame_of(&[10, 20, 30], &[]);
        let mut out = vec![0u32; 8];
        assert_eq!(mixer.mix(Some(&frame), &controls, &mut out), 3);
        assert_eq!(lefts(&out), vec![10, 20, 30, 30, 30, 30, 30, 30]);
        assert_eq!(mixer.last_sample(), 30);
        assert_eq!(mixer.stats().short_frames, 1);
    }

    #[test]
    fn test_invalid_counts_are_silenced() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let mut frame = frame_of(&[500; 16], &[500; 16]);
        frame.fm_count = -3;
        frame.psg_count = 1_000_000;
        let mut out = vec![0u32; 16];
        assert_eq!(mixer.mix(Some(&frame), &controls, &mut out), 0);
        assert_eq!(mixer.stats().invalid_counts, 2);
        assert_eq!(mixer.stats().faded_frames, 1);
        assert!(out.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_disabled_chip_contributes_nothing() {
        let mut mixer = Mixer::new(MixerConfig {
            crossfade_len: 0,
            ..MixerConfig::default()
        });
        let controls = AudioControls::default();
        controls.set_fm_enabled(false);
        let frame = frame_of(&[1000; 4], &[7; 4]);
        let mut out = vec![0u32; 4];
        mixer.mix(Some(&frame), &controls, &mut out);
        assert_eq!(lefts(&out), vec![7; 4]);
    }

    #[test]
    fn test_disabled_audio_fades_to_exact_zero() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let loud = frame_of(&[20000; TARGET], &[]);
        let mut out = vec![0u32; TARGET];
        mixer.mix(Some(&loud), &controls, &mut out);
        assert_eq!(mixer.last_sample(), 20000);

        controls.set_enabled(false);
        let mut stream = Vec::new();
        for _ in 0..4 {
            mixer.mix(Some(&loud), &controls, &mut out);
            stream.extend(lefts(&out));
        }
        assert!(stream.windows(2).all(|p| p[1] <= p[0]));
        assert!(stream.iter().all(|&s| s >= 0));
        assert_eq!(*stream.last().unwrap(), 0);
        // Reached zero within the first frame and stayed there.
        assert!(stream[TARGET..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_negative_fade_converges_from_below() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let frame = frame_of(&[-20000; TARGET], &[]);
        let mut out = vec![0u32; TARGET];
        mixer.mix(Some(&frame), &controls, &mut out);
        mixer.mix(None, &controls, &mut out);
        let fade = lefts(&out);
        assert!(fade.windows(2).all(|p| p[1] >= p[0]));
        assert_eq!(*fade.last().unwrap(), 0);
        assert_eq!(mixer.stats().missing_frames, 1);
    }

    #[test]
    fn test_crossfade_ramps_across_frame_boundary() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let mut out = vec![0u32; TARGET];
        mixer.mix(Some(&frame_of(&[20000; TARGET], &[])), &controls, &mut out);
        assert_eq!(mixer.last_sample(), 20000);

        mixer.mix(Some(&frame_of(&[-20000; TARGET], &[])), &controls, &mut out);
        let head = lefts(&out[..33]);
        assert!(head.windows(2).all(|p| p[1] < p[0]));
        assert!(head[0] < 20000 && head[0] > 18000);
        assert_eq!(head[32], -20000);
        let max_step = head.windows(2).map(|p| (p[0] as i32 - p[1] as i32).abs()).max();
        assert!(max_step.unwrap() < 2000);
    }

    #[test]
    fn test_short_frame_inside_crossfade_ends_on_its_sample() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let mut out = vec![0u32; TARGET];
        mixer.mix(Some(&frame_of(&[20000; TARGET], &[])), &controls, &mut out);

        assert_eq!(mixer.mix(Some(&frame_of(&[-20000; 8], &[])), &controls, &mut out), 8);
        let mixed = lefts(&out);
        assert!(mixed[..8].windows(2).all(|p| p[1] < p[0]));
        assert!(mixed[0] > -20000);
        assert!(mixed[7..].iter().all(|&s| s == -20000));
        assert_eq!(mixer.last_sample(), -20000);
    }

    #[test]
    fn test_missing_buffer_fades() {
        let mut mixer = Mixer::new(MixerConfig::default());
        let controls = AudioControls::default();
        let mut frame = frame_of(&[100; 8], &[100; 8]);
        frame.psg = None;
        let mut out = vec![0u32; 8];
        assert_eq!(mixer.mix(Some(&frame), &controls, &mut out), 0);
        assert_eq!(mixer.stats().faded_frames, 1);
    }

    #[test]
    fn test_volume_is_clamped() {
        let controls = AudioControls::default();
        controls.set_volume(250);
        assert_eq!(controls.volume(), MAX_VOLUME);
    }
}
