//! Per-frame audio handoff between the emulation core and the audio core.
//!
//! The emulation side fills one pair of chip buffers while the audio side
//! mixes the other pair. At the end of each frame:
//!
//! 1. snapshot both chips' sample counts
//! 2. wait for the previous frame's acknowledgement (none on the first
//!    frame) and take back the buffers it carries
//! 3. install those as the new write buffers
//! 4. publish the filled pair with its counts (`frame_ready`)
//!
//! Waiting before publishing is what bounds the pipeline to one frame in
//! flight: frame N can only go out once frame N-1 has been mixed.

use crate::adapters::{ChipBuffers, SoundBus};
use crate::clock::{elapsed_us, MicrosClock};
use crate::rendezvous::{Consumer, Publisher, SpscRendezvous};
use emu_core::apu::SampleBuffer;
use emu_core::logging::{log, LogCategory, LogLevel};

/// One frame of chip output as published to the audio core.
///
/// Counts are carried separately from the buffers because the consumer must
/// not trust them: they are sanitised against buffer capacity before use. A
/// missing buffer is treated like an empty frame.
#[derive(Debug, Default)]
pub struct FrameAudio {
    pub frame: u64,
    pub fm: Option<SampleBuffer>,
    pub psg: Option<SampleBuffer>,
    pub fm_count: i32,
    pub psg_count: i32,
}

impl FrameAudio {
    /// Recover the buffers for reuse. A missing buffer is replaced.
    pub fn into_buffers(self) -> ChipBuffers {
        ChipBuffers {
            fm: self.fm.unwrap_or_default(),
            psg: self.psg.unwrap_or_default(),
        }
    }
}

/// Emulation-core view of the handoff
pub struct EmulationHandoff {
    publisher: Publisher<FrameAudio>,
    spare: Option<ChipBuffers>,
    in_flight: bool,
    published: u64,
}

impl EmulationHandoff {
    pub(crate) fn new(publisher: Publisher<FrameAudio>) -> Self {
        Self {
            publisher,
            spare: Some(ChipBuffers::new()),
            in_flight: false,
            published: 0,
        }
    }

    /// Publish this frame's samples. Returns the microseconds spent waiting
    /// for the audio core to finish the previous frame.
    pub fn publish(&mut self, frame: u64, sound: &mut SoundBus, clock: &dyn MicrosClock) -> u32 {
        let (fm_count, psg_count) = sound.sample_counts();

        let wait_start = clock.now_us();
        let fresh = if self.in_flight {
            self.publisher.wait_acknowledged().into_buffers()
        } else {
            self.spare.take().unwrap_or_default()
        };
        let audio_wait_us = elapsed_us(clock, wait_start);

        let filled = sound.swap_buffers(fresh);
        self.publisher.publish(FrameAudio {
            frame,
            fm: Some(filled.fm),
            psg: Some(filled.psg),
            fm_count,
            psg_count,
        });
        self.in_flight = true;
        self.published += 1;

        log(LogCategory::Handoff, LogLevel::Trace, || {
            format!(
                "frame {} published fm={} psg={} wait={}us",
                frame, fm_count, psg_count, audio_wait_us
            )
        });
        audio_wait_us
    }

    /// Wait out the frame in flight (if any) so nothing is shared with the
    /// audio core afterwards.
    pub fn drain(&mut self) {
        if self.in_flight {
            self.spare = Some(self.publisher.wait_acknowledged().into_buffers());
            self.in_flight = false;
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Audio-core view of the handoff
pub struct AudioHandoffView {
    consumer: Consumer<FrameAudio>,
}

impl AudioHandoffView {
    pub(crate) fn new(consumer: Consumer<FrameAudio>) -> Self {
        Self { consumer }
    }

    pub fn try_frame(&mut self) -> Option<FrameAudio> {
        self.consumer.try_consume()
    }

    pub fn wait_frame(&mut self) -> FrameAudio {
        self.consumer.wait_frame()
    }

    /// Done mixing: send the buffers back and raise `audio_done`.
    pub fn complete(&mut self, frame: FrameAudio) {
        self.consumer.acknowledge(frame);
    }
}

/// Fresh, unconnected pair of handoff views
pub fn handoff_pair() -> (EmulationHandoff, AudioHandoffView) {
    let (publisher, consumer) = SpscRendezvous::new();
    (
        EmulationHandoff::new(publisher),
        AudioHandoffView::new(consumer),
    )
}
