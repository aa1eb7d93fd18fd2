//! Simulated DMA controller feeding the I2S FIFO.
//!
//! Models the parts of a microcontroller DMA block the playback strategies
//! rely on: per-channel read address and transfer count, channel chaining,
//! address-wrap (ring) mode, a write-1-to-clear pending-interrupt register and
//! a live read-address register. Memory is addressed as regions of packed
//! stereo words placed `REGION_STRIDE` bytes apart from `SRAM_BASE`.

use super::output::I2sOutput;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;

pub const DMA_CHANNEL_COUNT: usize = 12;
pub const SRAM_BASE: u32 = 0x2000_0000;
pub const REGION_STRIDE: u32 = 0x0010_0000;

/// Words the hardware advances per busy-wait iteration when it is not paced
/// by wall time
pub const WAIT_CHUNK_WORDS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DmaError {
    #[error("DMA channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("DMA channel {0} is already claimed")]
    ChannelClaimed(usize),
}

/// How simulated hardware time passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmaPacing {
    /// The audio core plays exactly one frame of hardware time per frame;
    /// busy-waits advance in small chunks.
    #[default]
    Lockstep,
    /// Hardware consumes words at the sample rate of the wall clock.
    RealTime,
    /// Only explicit `advance_hardware` calls and busy-waits move hardware.
    Manual,
}

/// Byte address of word `word` in region `region`
pub fn region_address(region: usize, word: usize) -> u32 {
    SRAM_BASE + region as u32 * REGION_STRIDE + word as u32 * 4
}

const MAILBOX_EMPTY: u32 = u32::MAX;

/// Single-entry "last completed slot" mailbox. Written by the hardware side,
/// drained by the completion handler.
#[derive(Debug)]
pub struct CompletionMailbox {
    last: AtomicU32,
    posted: AtomicU64,
}

impl CompletionMailbox {
    fn new() -> Self {
        Self {
            last: AtomicU32::new(MAILBOX_EMPTY),
            posted: AtomicU64::new(0),
        }
    }

    fn post(&self, tag: u32) {
        self.last.store(tag, Ordering::Release);
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the last posted slot, leaving the mailbox empty.
    pub fn take(&self) -> Option<u32> {
        match self.last.swap(MAILBOX_EMPTY, Ordering::AcqRel) {
            MAILBOX_EMPTY => None,
            tag => Some(tag),
        }
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    claimed: bool,
    busy: bool,
    read_addr: u32,
    remaining: u32,
    tag: u32,
    chain_to: Option<usize>,
    ring_words: Option<u32>,
}

/// Outcome of one transfer step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// Hardware time consumed, in stereo words
    pub transferred: usize,
    /// No channel was running; the FIFO starved for `transferred` words
    pub idle: bool,
    /// Channel whose transfer count reached zero
    pub completed: Option<usize>,
}

pub struct SimulatedDma {
    channels: [Channel; DMA_CHANNEL_COUNT],
    pending: u32,
    mailbox: CompletionMailbox,
    pacing: DmaPacing,
    sample_rate: u32,
    origin: Instant,
    accounted: u64,
}

impl SimulatedDma {
    pub fn new(pacing: DmaPacing, sample_rate: u32) -> Self {
        Self {
            channels: [Channel::default(); DMA_CHANNEL_COUNT],
            pending: 0,
            mailbox: CompletionMailbox::new(),
            pacing,
            sample_rate,
            origin: Instant::now(),
            accounted: 0,
        }
    }

    pub fn claim(&mut self, ch: usize) -> Result<(), DmaError> {
        let channel = self
            .channels
            .get_mut(ch)
            .ok_or(DmaError::NoSuchChannel(ch))?;
        if channel.claimed {
            return Err(DmaError::ChannelClaimed(ch));
        }
        channel.claimed = true;
        Ok(())
    }

    /// Set chaining and ring mode. Ring channels never complete and raise no
    /// interrupts.
    pub fn configure(&mut self, ch: usize, chain_to: Option<usize>, ring_words: Option<u32>) {
        let channel = &mut self.channels[ch];
        channel.chain_to = chain_to;
        channel.ring_words = ring_words;
    }

    /// Load read address, count and slot tag without starting.
    pub fn arm(&mut self, ch: usize, read_addr: u32, count: u32, tag: u32) {
        let channel = &mut self.channels[ch];
        channel.read_addr = read_addr;
        channel.remaining = count;
        channel.tag = tag;
        channel.busy = false;
    }

    pub fn start(&mut self, ch: usize) {
        let channel = &mut self.channels[ch];
        channel.busy = channel.ring_words.is_some() || channel.remaining > 0;
    }

    pub fn arm_and_start(&mut self, ch: usize, read_addr: u32, count: u32, tag: u32) {
        self.arm(ch, read_addr, count, tag);
        self.start(ch);
    }

    /// Live read-address register
    pub fn read_addr(&self, ch: usize) -> u32 {
        self.channels[ch].read_addr
    }

    pub fn is_busy(&self, ch: usize) -> bool {
        self.channels[ch].busy
    }

    /// Pending-interrupt register (one bit per channel)
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Write-1-to-clear
    pub fn clear_pending(&mut self, mask: u32) {
        self.pending &= !mask;
    }

    pub fn mailbox(&self) -> &CompletionMailbox {
        &self.mailbox
    }

    pub fn pacing(&self) -> DmaPacing {
        self.pacing
    }

    /// Words of hardware time a busy-wait iteration should simulate.
    pub fn due_words(&mut self) -> usize {
        match self.pacing {
            DmaPacing::Lockstep | DmaPacing::Manual => WAIT_CHUNK_WORDS,
            DmaPacing::RealTime => {
                let due =
                    self.origin.elapsed().as_micros() as u64 * self.sample_rate as u64 / 1_000_000;
                let words = due.saturating_sub(self.accounted);
                self.accounted = due;
                words as usize
            }
        }
    }

    /// Transfer up to `max_words`, stopping early at a transfer completion or
    /// a ring wrap point.
    pub fn step(
        &mut self,
        memory: &[Box<[u32]>],
        max_words: usize,
        out: &mut dyn I2sOutput,
    ) -> StepResult {
        let idle = StepResult {
            transferred: max_words,
            idle: true,
            completed: None,
        };
        if max_words == 0 {
            return StepResult {
                transferred: 0,
                ..idle
            };
        }
        let Some(ch) = self.channels.iter().position(|c| c.busy) else {
            return idle;
        };

        let channel = self.channels[ch];
        let offset = channel.read_addr.wrapping_sub(SRAM_BASE);
        let region = (offset / REGION_STRIDE) as usize;
        let word = ((offset % REGION_STRIDE) / 4) as usize;
        let Some(mem) = memory.get(region) else {
            self.channels[ch].busy = false;
            return idle;
        };

        if let Some(ring) = channel.ring_words {
            let ring = ring as usize;
            let n = max_words.min(ring - word);
            out.write(&mem[word..word + n]);
            self.channels[ch].read_addr = region_address(region, (word + n) & (ring - 1));
            return StepResult {
                transferred: n,
                idle: false,
                completed: None,
            };
        }

        let n = max_words
            .min(channel.remaining as usize)
            .min(mem.len().saturating_sub(word));
        if n == 0 {
            self.channels[ch].busy = false;
            return idle;
        }
        out.write(&mem[word..word + n]);
        let c = &mut self.channels[ch];
        c.read_addr += (n * 4) as u32;
        c.remaining -= n as u32;
        if c.remaining > 0 {
            return StepResult {
                transferred: n,
                idle: false,
                completed: None,
            };
        }

        c.busy = false;
        let (tag, chain_to) = (c.tag, c.chain_to);
        self.pending |= 1 << ch;
        self.mailbox.post(tag);
        if let Some(next) = chain_to {
            self.start(next);
        }
        StepResult {
            transferred: n,
            idle: false,
            completed: Some(ch),
        }
    }
}
