//! Two slots on two DMA channels chained to each other (A -> B -> A).
//!
//! The hardware switches buffers on its own, so there is no gap between
//! them; the completion handler only re-arms the channel that just finished
//! so the chain can come back to it. Software fills the slots alternately.

use super::dma::{region_address, DmaError, SimulatedDma};
use super::output::I2sOutput;
use super::slots::{SlotState, SlotTable};
use super::{
    completed_slot, pad_with_hold, pack_stereo, BufferManager, BufferStats, BufferStrategy,
};
use emu_core::logging::{log, LogCategory, LogLevel};
use std::hint;

pub struct ChainedPingPong {
    slots: SlotTable,
    dma: SimulatedDma,
    output: Box<dyn I2sOutput + Send>,
    /// `channels[i]` always reads slot `i`
    channels: [usize; 2],
    next_fill: usize,
    filling: Option<usize>,
    playing: Option<usize>,
    held: u32,
    stats: BufferStats,
}

impl ChainedPingPong {
    pub fn new(
        mut dma: SimulatedDma,
        output: Box<dyn I2sOutput + Send>,
        channels: [usize; 2],
        len: usize,
        fade_pole: u32,
    ) -> Result<Self, DmaError> {
        dma.claim(channels[0])?;
        dma.claim(channels[1])?;
        dma.configure(channels[0], Some(channels[1]), None);
        dma.configure(channels[1], Some(channels[0]), None);
        for (slot, &ch) in channels.iter().enumerate() {
            dma.arm(ch, region_address(slot, 0), len as u32, slot as u32);
        }
        Ok(Self {
            slots: SlotTable::new(2, len, fade_pole),
            dma,
            output,
            channels,
            next_fill: 0,
            filling: None,
            playing: None,
            held: pack_stereo(0, 0),
            stats: BufferStats::default(),
        })
    }

    fn rearm(&mut self, slot: usize) {
        let len = self.slots.slot_len() as u32;
        self.dma
            .arm(self.channels[slot], region_address(slot, 0), len, slot as u32);
    }

    fn mark_playing(&mut self, slot: usize) {
        if self.slots.begin_drain(slot) {
            self.stats.underruns += 1;
            log(LogCategory::Dma, LogLevel::Warn, || {
                format!("chained underrun, slot {} plays fade", slot)
            });
        }
        self.playing = Some(slot);
    }
}

impl BufferManager for ChainedPingPong {
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

        if self.playing.is_none() && self.slots.count_in(SlotState::Ready) == 2 {
            self.mark_playing(0);
            self.dma.start(self.channels[0]);
        }
    }

    fn on_hardware_buffer_consumed(&mut self) {
        let pending = self.dma.pending();
        let mut tag = self.dma.mailbox().take();
        for channel_slot in 0..2 {
            let bit = 1u32 << self.channels[channel_slot];
            if pending & bit == 0 {
                continue;
            }
            self.dma.clear_pending(bit);
            self.stats.irqs += 1;

            let Some(slot) =
                completed_slot(tag.take(), Some(channel_slot), &self.slots, &mut self.stats)
            else {
                continue;
            };
            self.slots.finish_drain(slot);
            self.rearm(slot);
            // The chain already started the other channel.
            self.mark_playing(slot ^ 1);
        }
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
        BufferStrategy::Chained
    }

    fn held_word(&self) -> u32 {
        self.held
    }
}
