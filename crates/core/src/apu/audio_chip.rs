//! Cycle-driven sample producer contract.
//!
//! Sound chips on the Genesis are clocked from the master clock. The frame
//! scheduler rewinds each chip's clock at the start of a frame, CPU register
//! writes catch the chip up to the write's timestamp, and the end-of-frame
//! flush runs the chip to a fixed cycle so every frame yields the same number
//! of samples.

use super::SampleBuffer;

/// A sound chip that appends mono samples as its clock advances.
pub trait SampleProducer {
    /// Generate every sample due up to `target_cycle` (master cycles since
    /// the frame began). Already at or past the target is a no-op.
    fn run_to_cycle(&mut self, target_cycle: u32, out: &mut SampleBuffer);

    /// Apply a register write without advancing time.
    fn write(&mut self, addr: u16, value: u8);

    /// Catch up to `cycle`, then apply the write.
    fn write_register(&mut self, addr: u16, value: u8, cycle: u32, out: &mut SampleBuffer) {
        self.run_to_cycle(cycle, out);
        self.write(addr, value);
    }

    /// Rewind the chip clock and sample index for a new frame.
    fn begin_frame(&mut self);

    /// Samples produced since `begin_frame`.
    ///
    /// Signed because it is published across cores as a raw count that the
    /// consumer sanitises.
    fn sample_count(&self) -> i32;

    /// Reset to power-on state
    fn reset(&mut self);

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits a ramp, one sample every 100 cycles.
    struct Ramp {
        clock: u32,
        produced: i32,
        last_write: Option<(u16, u8)>,
    }

    impl SampleProducer for Ramp {
        fn run_to_cycle(&mut self, target_cycle: u32, out: &mut SampleBuffer) {
            while self.clock + 100 <= target_cycle {
                self.clock += 100;
                out.push(self.produced as i16);
                self.produced += 1;
            }
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.last_write = Some((addr, value));
        }

        fn begin_frame(&mut self) {
            self.clock = 0;
            self.produced = 0;
        }

        fn sample_count(&self) -> i32 {
            self.produced
        }

        fn reset(&mut self) {
            self.begin_frame();
            self.last_write = None;
        }

        fn name(&self) -> &str {
            "ramp"
        }
    }

    #[test]
    fn test_write_register_catches_up_first() {
        let mut chip = Ramp {
            clock: 0,
            produced: 0,
            last_write: None,
        };
        let mut buf = SampleBuffer::with_capacity(16);
        chip.write_register(0x40, 0x12, 350, &mut buf);
        assert_eq!(chip.sample_count(), 3);
        assert_eq!(chip.last_write, Some((0x40, 0x12)));

        // Behind the chip clock: nothing new.
        chip.run_to_cycle(200, &mut buf);
        assert_eq!(buf.len(), 3);
    }
}
