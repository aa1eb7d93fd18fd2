//! Texas Instruments SN76489 Programmable Sound Generator
//!
//! The Genesis carries the Sega variant (SN76496 core inside the VDP) as its
//! PSG alongside the FM chip.
//!
//! # Architecture
//! - 3 square wave tone channels
//! - 1 noise channel with a 16-bit LFSR (Sega variant)
//! - 4-bit attenuation per channel, 2 dB per step
//! - 10-bit tone periods
//!
//! # Clocking
//! The PSG runs at master/15 and its counters step every 16 PSG clocks, so
//! one counter tick is 240 master cycles. One output sample is produced every
//! `AUDIO_FREQ_DIVISOR` master cycles.

use super::timing::AUDIO_FREQ_DIVISOR;
use super::{SampleBuffer, SampleProducer};

/// Master cycles per tone/noise counter step
const MASTER_CYCLES_PER_TICK: u32 = 15 * 16;

/// Per-channel amplitude for each attenuation step. Four channels at full
/// volume sum to just under `i16::MAX`.
const VOLUME_TABLE: [i16; 16] = [
    8191, 6506, 5168, 4105, 3261, 2590, 2057, 1634, 1298, 1031, 819, 650, 517, 410, 326, 0,
];

/// SN76489 PSG state
pub struct Sn76489Psg {
    tone_period: [u16; 3],
    tone_counter: [u16; 3],
    tone_high: [bool; 3],

    noise_control: u8,
    noise_lfsr: u16,
    noise_counter: u16,
    noise_high: bool,

    /// 0 = loudest, 15 = silent
    attenuation: [u8; 4],
    latched_channel: u8,

    /// Master cycles since `begin_frame`
    clock: u32,
    /// Master cycles not yet converted into counter ticks
    tick_remainder: u32,
    produced: i32,
}

impl Sn76489Psg {
    pub fn new() -> Self {
        Self {
            tone_period: [0; 3],
            tone_counter: [0; 3],
            tone_high: [false; 3],
            noise_control: 0,
            noise_lfsr: 0x8000,
            noise_counter: 0,
            noise_high: false,
            attenuation: [0x0F; 4],
            latched_channel: 0,
            clock: 0,
            tick_remainder: 0,
            produced: 0,
        }
    }

    /// Latch/data byte protocol of the PSG port
    pub fn write_byte(&mut self, data: u8) {
        if data & 0x80 != 0 {
            let channel = (data >> 5) & 0x03;
            self.latched_channel = channel;

            if data & 0x10 != 0 {
                self.attenuation[channel as usize] = data & 0x0F;
            } else if channel == 3 {
                self.noise_control = data & 0x07;
                self.noise_lfsr = 0x8000;
            } else {
                let ch = channel as usize;
                self.tone_period[ch] = (self.tone_period[ch] & 0x3F0) | (data & 0x0F) as u16;
            }
        } else if self.latched_channel < 3 {
            let ch = self.latched_channel as usize;
            self.tone_period[ch] = (self.tone_period[ch] & 0x00F) | (((data & 0x3F) as u16) << 4);
        }
    }

    fn tick(&mut self) {
        for i in 0..3 {
            if self.tone_counter[i] > 0 {
                self.tone_counter[i] -= 1;
            } else {
                self.tone_counter[i] = self.tone_period[i];
                if self.tone_period[i] > 0 {
                    self.tone_high[i] = !self.tone_high[i];
                }
            }
        }

        if self.noise_counter > 0 {
            self.noise_counter -= 1;
            return;
        }
        self.noise_counter = match self.noise_control & 0x03 {
            0 => 0x10,
            1 => 0x20,
            2 => 0x40,
            _ => self.tone_period[2],
        };
        let feedback = if self.noise_control & 0x04 != 0 {
            (self.noise_lfsr ^ (self.noise_lfsr >> 3)) & 1 != 0
        } else {
            self.noise_lfsr & 1 != 0
        };
        self.noise_lfsr >>= 1;
        if feedback {
            self.noise_lfsr |= 0x8000;
        }
        self.noise_high = self.noise_lfsr & 1 != 0;
    }

    fn current_sample(&self) -> i16 {
        let mut sum: i32 = 0;
        for i in 0..3 {
            let amp = VOLUME_TABLE[self.attenuation[i] as usize] as i32;
            sum += if self.tone_high[i] { amp } else { -amp };
        }
        let amp = VOLUME_TABLE[self.attenuation[3] as usize] as i32;
        sum += if self.noise_high { amp } else { -amp };
        sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }

    fn reset_state(&mut self) {
        *self = Self::new();
    }
}

impl Default for Sn76489Psg {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleProducer for Sn76489Psg {
    fn run_to_cycle(&mut self, target_cycle: u32, out: &mut SampleBuffer) {
        while self.clock + AUDIO_FREQ_DIVISOR <= target_cycle {
            self.clock += AUDIO_FREQ_DIVISOR;
            self.tick_remainder += AUDIO_FREQ_DIVISOR;
            while self.tick_remainder >= MASTER_CYCLES_PER_TICK {
                self.tick_remainder -= MASTER_CYCLES_PER_TICK;
                self.tick();
            }
            out.push(self.current_sample());
            self.produced += 1;
        }
    }

    fn write(&mut self, _addr: u16, value: u8) {
        self.write_byte(value);
    }

    fn begin_frame(&mut self) {
        self.clock = 0;
        self.produced = 0;
    }

    fn sample_count(&self) -> i32 {
        self.produced
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &str {
        "SN76489"
    }
}
