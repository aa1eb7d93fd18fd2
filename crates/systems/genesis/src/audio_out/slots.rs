//! Hardware sample slots with tagged ownership.
//!
//! A slot is owned by software while `Filling`, by nobody while `Ready` or
//! `Free`, and by the DMA while `Draining`. Every transition goes through
//! this table and illegal ones panic: a write to a slot the hardware may be
//! reading is a bug, not a recoverable condition.

use super::{pack_stereo, unpack_left};
use crate::mixer::decay_step;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    /// Played (or never written); holds a fade placeholder
    Free,
    /// Software is writing it
    Filling,
    /// Written, waiting for hardware
    Ready,
    /// Hardware is reading it
    Draining,
}

pub struct SlotTable {
    buffers: Vec<Box<[u32]>>,
    states: Vec<SlotState>,
    fade_pole: u32,
}

impl SlotTable {
    pub fn new(count: usize, len: usize, fade_pole: u32) -> Self {
        Self {
            buffers: (0..count).map(|_| vec![0u32; len].into_boxed_slice()).collect(),
            states: vec![SlotState::Free; count],
            fade_pole,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn slot_len(&self) -> usize {
        self.buffers.first().map_or(0, |b| b.len())
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.states[index]
    }

    /// Memory regions as the DMA engine addresses them
    pub fn memory(&self) -> &[Box<[u32]>] {
        &self.buffers
    }

    /// Take a `Free` or `Ready` slot for writing. Returns whether the slot
    /// still held unplayed data.
    pub fn begin_fill(&mut self, index: usize) -> bool {
        let state = self.states[index];
        assert!(
            matches!(state, SlotState::Free | SlotState::Ready),
            "slot {} cannot be filled while {:?}",
            index,
            state
        );
        self.states[index] = SlotState::Filling;
        state == SlotState::Ready
    }

    /// Writable view of a slot being filled.
    pub fn fill_target(&mut self, index: usize) -> &mut [u32] {
        assert_eq!(
            self.states[index],
            SlotState::Filling,
            "write to slot {} outside Filling",
            index
        );
        &mut self.buffers[index]
    }

    pub fn finish_fill(&mut self, index: usize) {
        assert_eq!(self.states[index], SlotState::Filling);
        self.states[index] = SlotState::Ready;
    }

    /// Hardware starts reading `index`. Returns true when the slot was not
    /// `Ready`, meaning it plays a placeholder: an underrun.
    pub fn begin_drain(&mut self, index: usize) -> bool {
        let state = self.states[index];
        assert!(
            matches!(state, SlotState::Ready | SlotState::Free),
            "slot {} cannot drain while {:?}",
            index,
            state
        );
        self.states[index] = SlotState::Draining;
        state == SlotState::Free
    }

    /// Hardware finished `index`. Its contents are replaced by a fade of
    /// its last sample so a late refill never replays stale audio.
    pub fn finish_drain(&mut self, index: usize) {
        assert_eq!(self.states[index], SlotState::Draining);
        self.states[index] = SlotState::Free;
        let buf = &mut self.buffers[index];
        let last = buf.last().map_or(0, |&w| unpack_left(w));
        fade_fill(buf, last, self.fade_pole);
    }

    /// Copy a `Ready` slot into another idle slot, marking it `Ready`.
    pub fn duplicate(&mut self, from: usize, to: usize) {
        assert_eq!(self.states[from], SlotState::Ready);
        assert!(matches!(
            self.states[to],
            SlotState::Free | SlotState::Ready
        ));
        let src = self.buffers[from].clone();
        self.buffers[to].copy_from_slice(&src);
        self.states[to] = SlotState::Ready;
    }

    pub fn count_in(&self, state: SlotState) -> usize {
        self.states.iter().filter(|&&s| s == state).count()
    }
}

/// One-pole decay of `from` toward zero, written as stereo words.
pub fn fade_fill(words: &mut [u32], from: i16, pole: u32) {
    let mut level = from as i32;
    for w in words.iter_mut() {
        level = decay_step(level, pole);
        let s = level as i16;
        *w = pack_stereo(s, s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut t = SlotTable::new(2, 4, 16);
        assert!(!t.begin_fill(0));
        t.fill_target(0).fill(pack_stereo(100, 100));
        t.finish_fill(0);
        assert_eq!(t.state(0), SlotState::Ready);
        assert!(!t.begin_drain(0));
        t.finish_drain(0);
        assert_eq!(t.state(0), SlotState::Free);
        // Placeholder decays from the last sample.
        let first = unpack_left(t.memory()[0][0]);
        assert!(first < 100 && first > 0);
    }

    #[test]
    fn test_draining_free_slot_is_underrun() {
        let mut t = SlotTable::new(1, 4, 16);
        assert!(t.begin_drain(0));
    }

    #[test]
    fn test_refilling_ready_slot_reports_unplayed() {
        let mut t = SlotTable::new(1, 4, 16);
        t.begin_fill(0);
        t.finish_fill(0);
        assert!(t.begin_fill(0));
    }

    #[test]
    #[should_panic(expected = "outside Filling")]
    fn test_write_outside_filling_panics() {
        let mut t = SlotTable::new(1, 4, 16);
        t.fill_target(0);
    }

    #[test]
    #[should_panic]
    fn test_fill_while_draining_panics() {
        let mut t = SlotTable::new(1, 4, 16);
        t.begin_fill(0);
        t.finish_fill(0);
        t.begin_drain(0);
        t.begin_fill(0);
    }

    #[test]
    fn test_duplicate() {
        let mut t = SlotTable::new(3, 2, 16);
        t.begin_fill(0);
        t.fill_target(0).copy_from_slice(&[7, 8]);
        t.finish_fill(0);
        t.duplicate(0, 2);
        assert_eq!(&*t.memory()[2], &[7, 8]);
        assert_eq!(t.count_in(SlotState::Ready), 2);
    }

    #[test]
    fn test_fade_fill_reaches_zero() {
        let mut words = vec![0u32; 400];
        fade_fill(&mut words, i16::MIN, 16);
        assert_eq!(*words.last().unwrap(), 0);
        let lefts: Vec<i32> = words.iter().map(|&w| (unpack_left(w) as i32).abs()).collect();
        assert!(lefts.windows(2).all(|p| p[1] <= p[0]));
    }
}
