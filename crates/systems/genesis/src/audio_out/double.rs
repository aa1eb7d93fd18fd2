//! Two slots, one DMA channel re-armed from the completion handler.
//!
//! Playback starts once both slots hold a frame. From then on the handler
//! starts whichever slot is queued; software fills the other slot and, if
//! hardware is behind, busy-waits until that slot has been played.

use super::dma::{region_address, DmaError, SimulatedDma};
use super::output::I2sOutput;
use super::slots::{SlotState, SlotTable};
use super::{
    completed_slot, pad_with_hold, pack_stereo, BufferManager, BufferStats, BufferStrategy,
};
use emu_core::logging::{log, LogCategory, LogLevel};
use std::hint;

pub struct DoubleBuffer {
    slots: SlotTable,
    dma: SimulatedDma,
    output: Box<dyn I2sOutput + Send>,
    channel: usize,
    next_fill: usize,
    filling: Option<usize>,
    playing: Option<usize>,
    queued: Option<usize>,
    held: u32,
    stats: BufferStats,
}

impl DoubleBuffer {
    pub fn new(
        mut dma: SimulatedDma,
        output: Box<dyn I2sOutput + Send>,
        channel: usize,
        len: usize,
        fade_pole: u32,
    ) -> Result<Self, DmaError> {
        dma.claim(channel)?;
        Ok(Self {
            slots: SlotTable::new(2, len, fade_pole),
            dma,
            output,
            channel,
            next_fill: 0,
            filling: None,
            playing: None,
            queued: None,
            held: pack_stereo(0, 0),
            stats: BufferStats::default(),
        })
    }

    fn start_slot(&mut self, slot: usize) {
        if self.slots.begin_drain(slot) {
            self.stats.underruns += 1;
            log(LogCategory::Dma, LogLevel::Warn, || {
                format!("double buffer underrun, slot {} replays fade", slot)
            });
        }
        let len = self.slots.slot_len() as u32;
        self.dma
            .arm_and_start(self.channel, region_address(slot, 0), len, slot as u32);
        self.playing = Some(slot);
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots.state(slot)
    }
}

impl BufferManager for DoubleBuffer {
    fn acquire_write_slot(&mut self) -> &mut [u32] {
        self.on_hardware_buffer_consumed();
        let target = self.next_fill;
        while self.playing.is_some()
            && matches!(
                self.slots.state(target),
                SlotState::Ready | SlotState::Draining
            )
        {
            self.stats.wait_spins += 1;
            self.pump();
            hint::spin_loop();
        }
        self.slots.begin_fill(target);
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
        self.next_fill ^= 1;

        if self.playing.is_none() {
            if self.slots.count_in(SlotState::Ready) == 2 {
                // Pre-roll complete: play the older slot first.
                self.start_slot(slot ^ 1);
                self.queued = Some(slot);
            }
        } else if self.queued.is_none() {
            self.queued = Some(slot);
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
        let next = self.queued.take().unwrap_or(finished);
        self.start_slot(next);
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
        BufferStrategy::Double
    }

    fn held_word(&self) -> u32 {
        self.held
    }
}
