//! The audio-submission side: takes each published frame, mixes it into the
//! hardware buffer and hands the chip buffers back.

use crate::audio_out::{BufferManager, BufferStats, DmaPacing};
use crate::handoff::{AudioHandoffView, FrameAudio};
use crate::mixer::{AudioControls, Mixer, MixerStats};
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::Serialize;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Inspects each frame before it is mixed
pub type FrameProbe = Box<dyn FnMut(&FrameAudio) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AudioCoreStats {
    pub frames_mixed: u64,
    pub last_frame: Option<u64>,
    /// Frames that did not follow the previous one
    pub sequence_gaps: u64,
}

pub struct AudioCore {
    view: AudioHandoffView,
    mixer: Mixer,
    manager: Box<dyn BufferManager>,
    controls: Arc<AudioControls>,
    pacing: DmaPacing,
    probe: Option<FrameProbe>,
    stats: AudioCoreStats,
}

impl AudioCore {
    pub(crate) fn new(
        view: AudioHandoffView,
        mixer: Mixer,
        manager: Box<dyn BufferManager>,
        controls: Arc<AudioControls>,
        pacing: DmaPacing,
    ) -> Self {
        Self {
            view,
            mixer,
            manager,
            controls,
            pacing,
            probe: None,
            stats: AudioCoreStats::default(),
        }
    }

    pub fn set_frame_probe(&mut self, probe: FrameProbe) {
        self.probe = Some(probe);
    }

    /// Mix the published frame, if there is one. Returns whether a frame
    /// was processed.
    pub fn service_frame(&mut self) -> bool {
        match self.view.try_frame() {
            Some(frame) => {
                self.process(frame);
                true
            }
            None => false,
        }
    }

    /// Block until a frame is published, then mix it.
    pub fn wait_and_process(&mut self) {
        let frame = self.view.wait_frame();
        self.process(frame);
    }

    /// Audio-core thread body: mix frames until `stop` is raised and no
    /// frame is pending.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        loop {
            if self.service_frame() {
                continue;
            }
            if stop.load(Ordering::Acquire) {
                // A frame published just before `stop` is still ours.
                if !self.service_frame() {
                    break;
                }
                continue;
            }
            if self.pacing == DmaPacing::RealTime {
                self.manager.pump();
            }
            hint::spin_loop();
        }
    }

    fn process(&mut self, frame: FrameAudio) {
        if self.pacing == DmaPacing::Lockstep {
            let words = self.mixer.config().samples_per_frame;
            self.manager.advance_hardware(words);
        }

        if let Some(last) = self.stats.last_frame {
            if frame.frame != last + 1 {
                self.stats.sequence_gaps += 1;
                log(LogCategory::Handoff, LogLevel::Warn, || {
                    format!("audio frame {} after {}", frame.frame, last)
                });
            }
        }
        if let Some(probe) = self.probe.as_mut() {
            probe(&frame);
        }

        self.mixer
            .submit(Some(&frame), &self.controls, self.manager.as_mut());
        self.manager.on_hardware_buffer_consumed();

        self.stats.frames_mixed += 1;
        self.stats.last_frame = Some(frame.frame);
        self.view.complete(frame);
    }

    /// Commit a faded frame without input, as when the emulation core has
    /// nothing to publish.
    pub fn submit_gap(&mut self) {
        if self.pacing == DmaPacing::Lockstep {
            let words = self.mixer.config().samples_per_frame;
            self.manager.advance_hardware(words);
        }
        self.mixer.submit(None, &self.controls, self.manager.as_mut());
    }

    /// Let simulated hardware play out `words` more words.
    pub fn play_out(&mut self, words: usize) {
        self.manager.advance_hardware(words);
    }

    /// Forget per-run state. Hardware playback continues.
    pub fn reset(&mut self) {
        self.mixer.reset();
        self.stats = AudioCoreStats::default();
    }

    pub fn controls(&self) -> &Arc<AudioControls> {
        &self.controls
    }

    pub fn stats(&self) -> AudioCoreStats {
        self.stats
    }

    pub fn mixer_stats(&self) -> MixerStats {
        self.mixer.stats()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.manager.stats()
    }

    pub fn manager(&self) -> &dyn BufferManager {
        self.manager.as_ref()
    }
}
