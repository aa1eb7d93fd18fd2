//! Three slots played round-robin from one DMA channel.
//!
//! Hardware plays slot `p`, slot `p + 1` is queued, and software always
//! writes slot `p + 2`. Software never waits: when it runs ahead it
//! overwrites its own unplayed frame and the overwrite is counted as an
//! overrun. The first commit is copied into all three slots so playback can
//! start immediately.

use super::dma::{region_address, DmaError, SimulatedDma};
use super::output::I2sOutput;
use super::slots::{SlotState, SlotTable};
use super::{
    completed_slot, pad_with_hold, pack_stereo, BufferManager, BufferStats, BufferStrategy,
};
use emu_core::logging::{log, LogCategory, LogLevel};

const SLOTS: usize = 3;

pub struct TripleBuffer {
    slots: SlotTable,
    dma: SimulatedDma,
    output: Box<dyn I2sOutput + Send>,
    channel: usize,
    filling: Option<usize>,
    playing: Option<usize>,
    /// Slot holds a start-up copy, not a frame of its own
    primed: [bool; SLOTS],
    held: u32,
    stats: BufferStats,
}

impl TripleBuffer {
    pub fn new(
        mut dma: SimulatedDma,
        output: Box<dyn I2sOutput + Send>,
        channel: usize,
        len: usize,
        fade_pole: u32,
    ) -> Result<Self, DmaError> {
        dma.claim(channel)?;
        Ok(Self {
            slots: SlotTable::new(SLOTS, len, fade_pole),
            dma,
            output,
            channel,
            filling: None,
            playing: None,
            primed: [false; SLOTS],
            held: pack_stereo(0, 0),
            stats: BufferStats::default(),
        })
    }

    fn play(&mut self, slot: usize) {
        if self.slots.begin_drain(slot) {
            self.stats.underruns += 1;
            log(LogCategory::Dma, LogLevel::Warn, || {
                format!("triple buffer underrun, slot {} plays fade", slot)
            });
        }
        self.primed[slot] = false;
        let len = self.slots.slot_len() as u32;
        self.dma
            .arm_and_start(self.channel, region_address(slot, 0), len, slot as u32);
        self.playing = Some(slot);
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots.state(slot)
    }
}

impl BufferManager for TripleBuffer {
    fn acquire_write_slot(&mut self) -> &mut [u32] {
        self.on_hardware_buffer_consumed();
        let target = self.playing.map_or(0, |p| (p + 2) % SLOTS);
        if self.slots.begin_fill(target) && !self.primed[target] {
            self.stats.overruns += 1;
            log(LogCategory::Dma, LogLevel::Debug, || {
                format!("triple buffer overwrote unplayed slot {}", target)
            });
        }
        self.primed[target] = false;
        self.filling = Some(target);
        self.slots.fill_target(target)
    }

    fn commit_slot(&mut self, count: usize) {
        let Some(slot) = self.filling.take() else {
            log(LogCategory::Dma, LogLevel::Error, || {
                "commit without an acquired slot".to_string()
            });
            return;
        };
        self.held = pad_with_hold(self.slots.fill_target(slot), count, self.held);
        self.slots.finish_fill(slot);
        self.stats.commits += 1;
        self.stats.samples_committed += self.slots.slot_len() as u64;

        if self.playing.is_none() {
            for other in 1..SLOTS {
                self.slots.duplicate(slot, (slot + other) % SLOTS);
                self.primed[(slot + other) % SLOTS] = true;
            }
            self.play(slot);
        }
    }

    fn on_hardware_buffer_consumed(&mut self) {
        let bit = 1u32 << self.channel;
        if self.dma.pending() & bit == 0 {
            return;
        }
        self.dma.clear_pending(bit);
        self.stats.irqs += 1;
        let tag = self.dma.mailbox().take();
        let started = self.playing.take();
        let Some(finished) = completed_slot(tag, started, &self.slots, &mut self.stats) else {
            return;
        };
        self.slots.finish_drain(finished);
        self.play((finished + 1) % SLOTS);
    }

    fn advance_hardware(&mut self, words: usize) {
        let mut left = words;
        while left > 0 {
            let step = self
                .dma
                .step(self.slots.memory(), left, self.output.as_mut());
            left -= step.transferred.min(left);
            if step.idle {
                self.stats.idle_words += step.transferred as u64;
            } else {
                self.stats.hardware_words += step.transferred as u64;
            }
            if step.completed.is_some() {
                self.on_hardware_buffer_consumed();
            }
        }
    }

    fn pump(&mut self) {
        let words = self.dma.due_words();
        self.advance_hardware(words);
    }

    fn stats(&self) -> BufferStats {
        self.stats
    }

    fn strategy(&self) -> BufferStrategy {
        BufferStrategy::Triple
    }

    fn held_word(&self) -> u32 {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_out::{unpack_left, CaptureOutput, DmaPacing};

    const LEN: usize = 128;

    fn manager(capture: &CaptureOutput) -> TripleBuffer {
        let dma = SimulatedDma::new(DmaPacing::Manual, 53_280);
        TripleBuffer::new(dma, Box::new(capture.clone()), 2, LEN, 16).unwrap()
    }

    fn commit_value(m: &mut TripleBuffer, v: i16) {
        m.acquire_write_slot().fill(pack_stereo(v, v));
        m.commit_slot(LEN);
    }

    #[test]
    fn test_first_commit_primes_every_slot() {
        let capture = CaptureOutput::new();
        let mut m = manager(&capture);
        commit_value(&mut m, 1);
        assert_eq!(m.slot_state(0), SlotState::Draining);
        assert_eq!(m.slot_state(1), SlotState::Ready);
        assert_eq!(m.slot_state(2), SlotState::Ready);
        assert!(m.dma.is_busy(2));
    }

    #[test]
    fn test_lockstep_playback_has_two_frame_latency() {
        let capture = CaptureOutput::new();
        let mut m = manager(&capture);
        commit_value(&mut m, 1);
        for v in 2..11 {
            m.advance_hardware(LEN);
            commit_value(&mut m, v);
        }
        let played: Vec<i16> = capture
            .snapshot()
            .chunks(LEN)
            .map(|c| unpack_left(c[0]))
            .collect();
        assert_eq!(played, vec![1, 1, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(m.stats().underruns, 0);
        assert_eq!(m.stats().overruns, 0);
        assert_eq!(m.stats().wait_spins, 0);
    }

    #[test]
    fn test_running_ahead_overwrites_and_counts() {
        let capture = CaptureOutput::new();
        let mut m = manager(&capture);
        commit_value(&mut m, 1);
        // Replaces a start-up copy: not an overrun.
        commit_value(&mut m, 2);
        assert_eq!(m.stats().overruns, 0);
        commit_value(&mut m, 3);
        assert_eq!(m.stats().overruns, 1);
        assert_eq!(m.stats().commits, 3);
    }

    #[test]
    fn test_starved_hardware_plays_fade() {
        let capture = CaptureOutput::new();
        let mut m = manager(&capture);
        commit_value(&mut m, 1500);
        m.advance_hardware(LEN * 4);
        assert_eq!(m.stats().underruns, 2);
        let words = capture.snapshot();
        assert!(unpack_left(words[LEN * 3 + 5]).abs() < 1500);
    }
}
