//! One large ring read by a single DMA channel in address-wrap mode.
//!
//! The channel is started once and never stops or interrupts. Software keeps
//! a write cursor, samples the hardware read-address register to learn how
//! far playback has got, and only blocks when the free space ahead of the
//! reader is smaller than a frame plus a safety margin. Everything past the
//! write cursor holds a fade of the last committed sample, and every word
//! the reader passes is silenced behind it, so a late frame decays to
//! silence instead of replaying an old lap however long the stall.

use super::dma::{region_address, DmaError, SimulatedDma, REGION_STRIDE, SRAM_BASE};
use super::output::I2sOutput;
use super::slots::fade_fill;
use super::{pad_with_hold, pack_stereo, unpack_left, BufferManager, BufferStats, BufferStrategy};
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::hint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Ring length in stereo words; rounded up to a power of two that holds
    /// two frames plus the margin
    pub size: usize,
    /// Words of free space that must remain after a write
    pub margin: usize,
    /// Words past the write cursor that get a fade of the held sample; the
    /// rest of the free space is silence
    pub guard: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            size: 4096,
            margin: 256,
            guard: 512,
        }
    }
}

pub struct RingBuffer {
    /// A single region: the ring itself
    memory: Vec<Box<[u32]>>,
    staging: Box<[u32]>,
    dma: SimulatedDma,
    output: Box<dyn I2sOutput + Send>,
    channel: usize,
    size: usize,
    margin: usize,
    guard: usize,
    fade_pole: u32,
    write_pos: u64,
    read_pos: u64,
    last_read_index: usize,
    started: bool,
    starved: bool,
    held: u32,
    stats: BufferStats,
}

impl RingBuffer {
    pub fn new(
        mut dma: SimulatedDma,
        output: Box<dyn I2sOutput + Send>,
        channel: usize,
        len: usize,
        config: RingConfig,
        fade_pole: u32,
    ) -> Result<Self, DmaError> {
        dma.claim(channel)?;
        let size = config
            .size
            .max(2 * len + config.margin)
            .next_power_of_two();
        Ok(Self {
            memory: vec![vec![0u32; size].into_boxed_slice()],
            staging: vec![0u32; len].into_boxed_slice(),
            dma,
            output,
            channel,
            size,
            margin: config.margin,
            guard: config.guard,
            fade_pole,
            write_pos: 0,
            read_pos: 0,
            last_read_index: 0,
            started: false,
            starved: false,
            held: pack_stereo(0, 0),
            stats: BufferStats::default(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Words committed but not yet played
    pub fn fill_level(&self) -> u64 {
        self.write_pos.saturating_sub(self.read_pos)
    }

    fn read_index(&self) -> usize {
        let offset = self.dma.read_addr(self.channel).wrapping_sub(SRAM_BASE);
        ((offset % REGION_STRIDE) / 4) as usize % self.size
    }

    /// Fold the hardware read pointer into the absolute read cursor.
    fn sync_read_cursor(&mut self) {
        if !self.started {
            return;
        }
        let index = self.read_index();
        let delta = (index + self.size - self.last_read_index) % self.size;
        self.last_read_index = index;
        self.silence_wrapped(self.read_pos, delta);
        self.read_pos += delta as u64;

        if self.read_pos > self.write_pos && !self.starved {
            self.starved = true;
            self.stats.underruns += 1;
            log(LogCategory::Dma, LogLevel::Warn, || {
                format!(
                    "ring underrun, reader {} words past writer",
                    self.read_pos - self.write_pos
                )
            });
        }
    }

    fn write_wrapped(&mut self, pos: u64, words: &[u32]) {
        let ring = &mut self.memory[0];
        let start = (pos % self.size as u64) as usize;
        let first = words.len().min(self.size - start);
        ring[start..start + first].copy_from_slice(&words[..first]);
        ring[..words.len() - first].copy_from_slice(&words[first..]);
    }

    /// Clear `count` played words starting at `pos`. They sit one lap
    /// ahead of the reader, past anything the writer can have committed.
    fn silence_wrapped(&mut self, pos: u64, count: usize) {
        let ring = &mut self.memory[0];
        let start = (pos % self.size as u64) as usize;
        let first = count.min(self.size - start);
        ring[start..start + first].fill(pack_stereo(0, 0));
        ring[..count - first].fill(pack_stereo(0, 0));
    }

    /// Placeholder over all free space past the write cursor.
    fn fill_guard(&mut self) {
        let free = (self.read_pos + self.size as u64).saturating_sub(self.write_pos) as usize;
        let mut guard = vec![pack_stereo(0, 0); free];
        let fade = self.guard.min(free);
        fade_fill(&mut guard[..fade], unpack_left(self.held), self.fade_pole);
        self.write_wrapped(self.write_pos, &guard);
    }

    fn start(&mut self) {
        self.dma.configure(self.channel, None, Some(self.size as u32));
        self.dma
            .arm_and_start(self.channel, region_address(0, 0), 0, 0);
        self.started = true;
        self.last_read_index = 0;
    }
}

impl BufferManager for RingBuffer {
    fn acquire_write_slot(&mut self) -> &mut [u32] {
        &mut self.staging
    }

    fn commit_slot(&mut self, count: usize) {
        let len = self.staging.len();
        self.held = pad_with_hold(&mut self.staging, count, self.held);

        if !self.started {
            // One frame of silence ahead of the first frame.
            let silence = vec![pack_stereo(0, 0); len];
            self.write_wrapped(0, &silence);
            self.write_pos = len as u64;
        } else {
            self.sync_read_cursor();
            if self.read_pos > self.write_pos {
                self.write_pos = self.read_pos;
            }
            while self.write_pos + (len + self.margin) as u64 - self.read_pos
                > self.size as u64
            {
                self.stats.wait_spins += 1;
                self.pump();
                hint::spin_loop();
            }
        }

        let staged = std::mem::take(&mut self.staging);
        self.write_wrapped(self.write_pos, &staged);
        self.staging = staged;
        self.write_pos += len as u64;
        self.starved = false;
        self.fill_guard();

        self.stats.commits += 1;
        self.stats.samples_committed += len as u64;

        if !self.started {
            self.start();
        }
    }

    fn on_hardware_buffer_consumed(&mut self) {
        self.sync_read_cursor();
    }

    fn advance_hardware(&mut self, words: usize) {
        let mut left = words;
        let chunk = (self.size / 2).max(1);
        while left > 0 {
            let step = self
                .dma
                .step(&self.memory, left.min(chunk), self.output.as_mut());
            left -= step.transferred.min(left);
            if step.idle {
                self.stats.idle_words += step.transferred as u64;
            } else {
                self.stats.hardware_words += step.transferred as u64;
            }
            self.sync_read_cursor();
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
        BufferStrategy::Ring
    }

    fn held_word(&self) -> u32 {
        self.held
    }
}
