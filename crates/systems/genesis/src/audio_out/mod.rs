//! Hardware audio output: sample slots, the DMA engine feeding the I2S
//! FIFO, and the strategies that keep it fed.
//!
//! # Architecture
//!
//! ```text
//! Mixer -> BufferManager::acquire_write_slot / commit_slot
//!            |  (slots tagged Free / Filling / Ready / Draining)
//!            v
//!          SimulatedDma --words--> I2sOutput
//!            |
//!            +-- completion: pending bit + mailbox -> on_hardware_buffer_consumed
//! ```
//!
//! All strategies implement `BufferManager` and differ only in how slots are
//! laid out and when the DMA is re-armed:
//!
//! | strategy | slots | channels | software blocks when | latency |
//! |---|---|---|---|---|
//! | `Double` | 2 | 1, re-armed by the completion handler | target slot still queued/playing | 1 frame |
//! | `Chained` | 2 | 2, hardware-chained A->B->A | target slot still queued/playing | 1 frame |
//! | `Ring` | 1 ring | 1, wrap mode, never stops | free space < frame + margin | ~1 frame + margin |
//! | `Triple` | 3 | 1, round-robin re-arm | never (overwrites, counts overruns) | 2 frames |
//!
//! `Double` leaves a gap of one handler latency between buffers on real
//! hardware; `Chained` closes it at the cost of a second channel. `Ring` has
//! no per-buffer interrupt at all and tolerates jitter best. `Triple` never
//! stalls the audio core, which suits a producer that cannot wait.
//!
//! Interrupts are simulated: the DMA raises a pending bit and posts the
//! completed slot to a single-entry mailbox, and the strategy's handler runs
//! synchronously right after the transfer step that completed. Handlers clear
//! their pending bit before doing anything else.

pub mod chained;
pub mod dma;
pub mod double;
pub mod output;
pub mod ring;
pub mod slots;
pub mod triple;

pub use chained::ChainedPingPong;
pub use dma::{DmaError, DmaPacing, SimulatedDma};
pub use double::DoubleBuffer;
pub use output::{CaptureOutput, I2sOutput, NullOutput};
pub use ring::RingBuffer;
pub use slots::{SlotState, SlotTable};
pub use triple::TripleBuffer;

use crate::config::PipelineConfig;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

/// Selectable playback strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStrategy {
    Double,
    Chained,
    #[default]
    Ring,
    Triple,
}

impl BufferStrategy {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "double" => Some(BufferStrategy::Double),
            "chained" | "pingpong" | "ping-pong" => Some(BufferStrategy::Chained),
            "ring" => Some(BufferStrategy::Ring),
            "triple" => Some(BufferStrategy::Triple),
            _ => None,
        }
    }
}

/// Counters kept by every strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub commits: u64,
    pub samples_committed: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub irqs: u64,
    pub wait_spins: u64,
    pub hardware_words: u64,
    pub idle_words: u64,
    /// Completions whose mailbox tag disagreed with the slot software
    /// started
    pub tag_mismatches: u64,
}

/// Software side of a playback strategy.
pub trait BufferManager: Send {
    /// Slot for the next frame, exactly one frame of packed stereo words.
    /// May busy-wait for hardware to release it.
    fn acquire_write_slot(&mut self) -> &mut [u32];

    /// Hand the acquired slot to hardware. Words past `count` are padded with
    /// the last written word.
    fn commit_slot(&mut self, count: usize);

    /// Service pending DMA completion interrupts.
    fn on_hardware_buffer_consumed(&mut self);

    /// Let the simulated hardware play `words` stereo frames.
    fn advance_hardware(&mut self, words: usize);

    /// One busy-wait step: advance hardware by whatever the pacing allows.
    fn pump(&mut self);

    fn stats(&self) -> BufferStats;

    fn strategy(&self) -> BufferStrategy;

    /// Last word committed (what a hold pads with)
    fn held_word(&self) -> u32;
}

/// Pack a left/right pair as the I2S FIFO expects it: right in the high half.
#[inline]
pub fn pack_stereo(left: i16, right: i16) -> u32 {
    ((right as u16 as u32) << 16) | left as u16 as u32
}

#[inline]
pub fn unpack_left(word: u32) -> i16 {
    word as u16 as i16
}

#[inline]
pub fn unpack_right(word: u32) -> i16 {
    (word >> 16) as u16 as i16
}

/// Fill `words[count..]` with the last of `words[..count]` (or `fallback`).
pub(crate) fn pad_with_hold(words: &mut [u32], count: usize, fallback: u32) -> u32 {
    let count = count.min(words.len());
    let hold = if count > 0 { words[count - 1] } else { fallback };
    words[count..].fill(hold);
    hold
}

/// Slot a completion interrupt finished, read from the mailbox tag and
/// checked against `started`, the slot software last handed to the channel.
/// A disagreement is counted. The tag wins only when it names a draining
/// slot; otherwise the software record stands.
pub(crate) fn completed_slot(
    tag: Option<u32>,
    started: Option<usize>,
    slots: &SlotTable,
    stats: &mut BufferStats,
) -> Option<usize> {
    let tagged = tag
        .map(|t| t as usize)
        .filter(|&t| t < slots.len());
    if tagged.is_some() && tagged == started {
        return tagged;
    }
    stats.tag_mismatches += 1;
    log(LogCategory::Dma, LogLevel::Warn, || {
        format!(
            "completion tag {:?} disagrees with started slot {:?}",
            tag, started
        )
    });
    match tagged {
        Some(slot) if slots.state(slot) == SlotState::Draining => Some(slot),
        _ => started,
    }
}

/// Build the configured strategy on a freshly claimed DMA engine.
pub fn build_buffer_manager(
    config: &PipelineConfig,
    output: Box<dyn I2sOutput + Send>,
) -> Result<Box<dyn BufferManager>, DmaError> {
    let dma = SimulatedDma::new(config.dma_pacing, config.sample_rate);
    let len = config.mixer.samples_per_frame;
    let pole = config.mixer.fade_pole;
    let [a, b] = config.dma_channels;
    Ok(match config.buffer_strategy {
        BufferStrategy::Double => Box::new(DoubleBuffer::new(dma, output, a, len, pole)?),
        BufferStrategy::Chained => {
            Box::new(ChainedPingPong::new(dma, output, [a, b], len, pole)?)
        }
        BufferStrategy::Ring => Box::new(RingBuffer::new(
            dma,
            output,
            a,
            len,
            config.ring,
            pole,
        )?),
        BufferStrategy::Triple => Box::new(TripleBuffer::new(dma, output, a, len, pole)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip_extremes() {
        let w = pack_stereo(i16::MIN, i16::MAX);
        assert_eq!(unpack_left(w), i16::MIN);
        assert_eq!(unpack_right(w), i16::MAX);
        assert_eq!(pack_stereo(-1, 0), 0x0000_FFFF);
    }

    #[test]
    fn test_pad_with_hold() {
        let mut words = [1, 2, 3, 0, 0];
        assert_eq!(pad_with_hold(&mut words, 3, 9), 3);
        assert_eq!(words, [1, 2, 3, 3, 3]);
        let mut words = [5, 5];
        pad_with_hold(&mut words, 0, 7);
        assert_eq!(words, [7, 7]);
    }

    fn draining_table() -> SlotTable {
        let mut slots = SlotTable::new(3, 4, 16);
        slots.begin_fill(1);
        slots.finish_fill(1);
        slots.begin_drain(1);
        slots.begin_fill(2);
        slots.finish_fill(2);
        slots
    }

    #[test]
    fn test_completed_slot_agreeing_tag() {
        let slots = draining_table();
        let mut stats = BufferStats::default();
        assert_eq!(completed_slot(Some(1), Some(1), &slots, &mut stats), Some(1));
        assert_eq!(stats.tag_mismatches, 0);
    }

    #[test]
    fn test_completed_slot_mismatched_tag() {
        let slots = draining_table();
        let mut stats = BufferStats::default();
        // Tag names the draining slot: it wins over a stale record.
        assert_eq!(completed_slot(Some(1), Some(0), &slots, &mut stats), Some(1));
        // Tag names a slot that is not playing: keep the record.
        assert_eq!(completed_slot(Some(2), Some(1), &slots, &mut stats), Some(1));
        // Empty mailbox or a tag past the table.
        assert_eq!(completed_slot(None, Some(1), &slots, &mut stats), Some(1));
        assert_eq!(completed_slot(Some(9), None, &slots, &mut stats), None);
        assert_eq!(stats.tag_mismatches, 4);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(BufferStrategy::from_str("Ping-Pong"), Some(BufferStrategy::Chained));
        assert_eq!(BufferStrategy::from_str("triple"), Some(BufferStrategy::Triple));
        assert_eq!(BufferStrategy::from_str("quad"), None);
    }
}
