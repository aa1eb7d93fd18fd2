//! Genesis VDP register file as seen by the frame scheduler.
//!
//! The VDP itself (VRAM, sprite and plane rendering) sits behind the
//! `LineRenderer` contract. What the scheduler needs each frame is a handful of
//! mode and interrupt bits, and those can be rewritten by the CPU side at any
//! time, so they live in atomics and are sampled once at the top of a frame.
//!
//! # Registers used
//! - reg 0 bit 4: line (H) interrupt enable
//! - reg 1 bit 5: vertical interrupt enable
//! - reg 1 bit 3: V30 mode (240 visible lines, PAL only)
//! - reg 10: line interrupt counter reload value
//! - reg 12 bit 0: H40 mode (320 pixels wide)

use emu_core::apu::TimingMode;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

pub const REGISTER_COUNT: usize = 24;

/// Status register: vertical interrupt pending
pub const STATUS_VINT_PENDING: u16 = 0x0080;
/// Status register: PAL console
pub const STATUS_PAL: u16 = 0x0001;

/// Register file shared between the emulation loop and whatever writes it.
#[derive(Debug)]
pub struct VdpRegisters {
    regs: [AtomicU8; REGISTER_COUNT],
    status: AtomicU16,
    pal_console: AtomicBool,
}

impl VdpRegisters {
    pub fn new() -> Self {
        Self {
            regs: Default::default(),
            status: AtomicU16::new(0),
            pal_console: AtomicBool::new(false),
        }
    }

    /// Power-on register values for a console of the given region
    pub fn with_region(mode: TimingMode) -> Self {
        let vdp = Self::new();
        vdp.set_region(mode);
        vdp
    }

    pub fn set_register(&self, index: usize, value: u8) {
        if let Some(reg) = self.regs.get(index) {
            reg.store(value, Ordering::Relaxed);
        }
    }

    pub fn register(&self, index: usize) -> u8 {
        self.regs
            .get(index)
            .map_or(0, |reg| reg.load(Ordering::Relaxed))
    }

    /// Control port word. Only register writes (`100R RRRR VVVV VVVV`) are
    /// meaningful here; anything else is ignored.
    pub fn write_control(&self, word: u16) {
        if word & 0xE000 == 0x8000 {
            let index = ((word >> 8) & 0x1F) as usize;
            self.set_register(index, word as u8);
        }
    }

    /// Switching region also switches V28/V30, since PAL software runs V30.
    pub fn set_region(&self, mode: TimingMode) {
        let pal = mode == TimingMode::Pal;
        self.pal_console.store(pal, Ordering::Relaxed);
        let reg1 = self.register(1);
        self.set_register(1, if pal { reg1 | 0x08 } else { reg1 & !0x08 });
        if pal {
            self.status.fetch_or(STATUS_PAL, Ordering::Relaxed);
        } else {
            self.status.fetch_and(!STATUS_PAL, Ordering::Relaxed);
        }
    }

    pub fn is_pal(&self) -> bool {
        self.pal_console.load(Ordering::Relaxed)
    }

    pub fn is_v30(&self) -> bool {
        self.register(1) & 0x08 != 0
    }

    pub fn is_h40(&self) -> bool {
        self.register(12) & 0x01 != 0
    }

    pub fn line_interrupt_enabled(&self) -> bool {
        self.register(0) & 0x10 != 0
    }

    pub fn vblank_interrupt_enabled(&self) -> bool {
        self.register(1) & 0x20 != 0
    }

    pub fn line_counter_reload(&self) -> u8 {
        self.register(10)
    }

    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn vint_pending(&self) -> bool {
        self.status() & STATUS_VINT_PENDING != 0
    }

    pub(crate) fn raise_vint(&self) {
        self.status.fetch_or(STATUS_VINT_PENDING, Ordering::Relaxed);
    }

    /// Called by the CPU side when it takes the level-6 interrupt.
    pub fn acknowledge_vint(&self) {
        self.status
            .fetch_and(!STATUS_VINT_PENDING, Ordering::Relaxed);
    }

    /// Back to power-on values, keeping the console region.
    pub fn reset(&self) {
        for reg in &self.regs {
            reg.store(0, Ordering::Relaxed);
        }
        self.status.store(0, Ordering::Relaxed);
        let mode = if self.is_pal() {
            TimingMode::Pal
        } else {
            TimingMode::Ntsc
        };
        self.set_region(mode);
    }
}

impl Default for VdpRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame geometry derived from the registers at the top of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoMode {
    pub timing: TimingMode,
    pub lines_per_frame: u32,
    pub width: u32,
    pub height: u32,
    pub budget_us: u32,
}

impl VideoMode {
    pub fn sample(vdp: &VdpRegisters) -> Self {
        let timing = if vdp.is_pal() {
            TimingMode::Pal
        } else {
            TimingMode::Ntsc
        };
        let height = if vdp.is_pal() && vdp.is_v30() { 240 } else { 224 };
        Self {
            timing,
            lines_per_frame: timing.lines_per_frame(),
            width: if vdp.is_h40() { 320 } else { 256 },
            height,
            budget_us: timing.frame_budget_us(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntsc_defaults() {
        let vdp = VdpRegisters::with_region(TimingMode::Ntsc);
        let mode = VideoMode::sample(&vdp);
        assert_eq!(mode.lines_per_frame, 262);
        assert_eq!(mode.dimensions(), (256, 224));
        assert_eq!(mode.budget_us, 16_666);
    }

    #[test]
    fn test_pal_h40() {
        let vdp = VdpRegisters::with_region(TimingMode::Pal);
        vdp.write_control(0x8C81);
        let mode = VideoMode::sample(&vdp);
        assert_eq!(mode.lines_per_frame, 313);
        assert_eq!(mode.dimensions(), (320, 240));
        assert_eq!(mode.budget_us, 20_000);
        assert_ne!(vdp.status() & STATUS_PAL, 0);
    }

    #[test]
    fn test_v30_ignored_on_ntsc() {
        let vdp = VdpRegisters::with_region(TimingMode::Ntsc);
        vdp.set_register(1, 0x08);
        assert_eq!(VideoMode::sample(&vdp).height, 224);
    }

    #[test]
    fn test_control_word_register_write() {
        let vdp = VdpRegisters::new();
        vdp.write_control(0x8A20);
        assert_eq!(vdp.line_counter_reload(), 0x20);
        vdp.write_control(0x8014);
        assert!(vdp.line_interrupt_enabled());
        // Not a register write.
        vdp.write_control(0x4000);
        assert_eq!(vdp.register(0), 0x14);
    }

    #[test]
    fn test_vint_pending_roundtrip() {
        let vdp = VdpRegisters::new();
        vdp.raise_vint();
        assert!(vdp.vint_pending());
        vdp.acknowledge_vint();
        assert!(!vdp.vint_pending());
    }

    #[test]
    fn test_reset_keeps_region() {
        let vdp = VdpRegisters::with_region(TimingMode::Pal);
        vdp.set_register(12, 0x81);
        vdp.reset();
        assert!(vdp.is_pal());
        assert!(!vdp.is_h40());
        assert!(vdp.is_v30());
    }
}
