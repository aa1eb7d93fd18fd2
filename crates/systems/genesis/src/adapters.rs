//! CPU and sound-chip plumbing for the emulation core.
//!
//! The 68000 and Z80 interpreters are external; the scheduler drives them
//! through `CpuAdapter`. Both CPUs can write sound registers, so they receive
//! the `SoundBus`, which owns the two producers and the current write buffers.

use emu_core::apu::{SampleBuffer, SampleProducer};

/// Two chip buffers travelling together: one per producer.
#[derive(Debug, Default)]
pub struct ChipBuffers {
    pub fm: SampleBuffer,
    pub psg: SampleBuffer,
}

impl ChipBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

/// FM (YM2612) and PSG (SN76489) producers plus their current write buffers.
pub struct SoundBus {
    fm: Box<dyn SampleProducer + Send>,
    psg: Box<dyn SampleProducer + Send>,
    buffers: ChipBuffers,
}

impl SoundBus {
    pub fn new(fm: Box<dyn SampleProducer + Send>, psg: Box<dyn SampleProducer + Send>) -> Self {
        Self {
            fm,
            psg,
            buffers: ChipBuffers::new(),
        }
    }

    /// YM2612 register write at `cycle` master cycles into the frame
    pub fn write_fm(&mut self, port: u16, value: u8, cycle: u32) {
        self.fm
            .write_register(port, value, cycle, &mut self.buffers.fm);
    }

    /// SN76489 port write at `cycle` master cycles into the frame
    pub fn write_psg(&mut self, value: u8, cycle: u32) {
        self.psg
            .write_register(0, value, cycle, &mut self.buffers.psg);
    }

    pub(crate) fn begin_frame(&mut self) {
        self.fm.begin_frame();
        self.psg.begin_frame();
        self.buffers.fm.clear();
        self.buffers.psg.clear();
    }

    /// Run both chips to `target_cycle`, producing the rest of the frame.
    pub(crate) fn flush(&mut self, target_cycle: u32) {
        self.fm.run_to_cycle(target_cycle, &mut self.buffers.fm);
        self.psg.run_to_cycle(target_cycle, &mut self.buffers.psg);
    }

    /// `(fm, psg)` sample counts as reported by the chips
    pub fn sample_counts(&self) -> (i32, i32) {
        (self.fm.sample_count(), self.psg.sample_count())
    }

    /// Install `fresh` as the write buffers and return the filled ones.
    pub(crate) fn swap_buffers(&mut self, fresh: ChipBuffers) -> ChipBuffers {
        std::mem::replace(&mut self.buffers, fresh)
    }

    pub fn buffers(&self) -> &ChipBuffers {
        &self.buffers
    }

    pub(crate) fn reset(&mut self) {
        self.fm.reset();
        self.psg.reset();
        self.buffers.fm.clear();
        self.buffers.psg.clear();
    }
}

/// A CPU interpreter driven in master-cycle time slices.
pub trait CpuAdapter: Send {
    /// Master cycles executed since the frame began
    fn cycles(&self) -> u32;

    /// Execute until `cycles() >= target_cycle`.
    fn execute(&mut self, target_cycle: u32, sound: &mut SoundBus);

    /// Set the interrupt level (68000: 0..=7; Z80: 0 releases, non-zero asserts).
    fn set_irq(&mut self, level: u8);

    /// Subtract a finished frame's cycles from the counter.
    fn end_frame(&mut self, frame_cycles: u32);

    fn reset(&mut self);

    /// Run to `target_cycle`; a no-op when the CPU is already there.
    fn run(&mut self, target_cycle: u32, sound: &mut SoundBus) {
        if self.cycles() >= target_cycle {
            return;
        }
        self.execute(target_cycle, sound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::apu::{Sn76489Psg, AUDIO_FREQ_DIVISOR};

    struct StepCpu {
        cycles: u32,
        executions: u32,
    }

    impl CpuAdapter for StepCpu {
        fn cycles(&self) -> u32 {
            self.cycles
        }

        fn execute(&mut self, target_cycle: u32, _sound: &mut SoundBus) {
            self.executions += 1;
            while self.cycles < target_cycle {
                self.cycles += 7;
            }
        }

        fn set_irq(&mut self, _level: u8) {}

        fn end_frame(&mut self, frame_cycles: u32) {
            self.cycles = self.cycles.saturating_sub(frame_cycles);
        }

        fn reset(&mut self) {
            self.cycles = 0;
        }
    }

    fn bus() -> SoundBus {
        SoundBus::new(Box::new(Sn76489Psg::new()), Box::new(Sn76489Psg::new()))
    }

    #[test]
    fn test_run_past_target_is_noop() {
        let mut cpu = StepCpu {
            cycles: 0,
            executions: 0,
        };
        let mut sound = bus();
        cpu.run(100, &mut sound);
        let overshoot = cpu.cycles();
        assert!(overshoot >= 100);
        cpu.run(100, &mut sound);
        cpu.run(overshoot, &mut sound);
        assert_eq!(cpu.executions, 1);
    }

    #[test]
    fn test_flush_and_swap() {
        let mut sound = bus();
        sound.begin_frame();
        sound.write_psg(0x90, 5 * AUDIO_FREQ_DIVISOR);
        sound.flush(888 * AUDIO_FREQ_DIVISOR);
        assert_eq!(sound.sample_counts(), (888, 888));

        let filled = sound.swap_buffers(ChipBuffers::new());
        assert_eq!(filled.fm.len(), 888);
        assert_eq!(filled.psg.len(), 888);
        assert!(sound.buffers().psg.is_empty());
    }
}
