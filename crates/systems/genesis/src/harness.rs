//! Stand-in collaborators for running the pipeline without real CPU, FM or
//! VDP cores: integration tests, benches and the CLI demo all use these.
//!
//! Time is modelled rather than measured when the `ManualClock` is used:
//! each CPU slice and each render advances the clock by a configured cost,
//! so frame-skip behaviour is reproducible to the microsecond.

use crate::adapters::{CpuAdapter, SoundBus};
use crate::audio_out::{CaptureOutput, I2sOutput};
use crate::clock::{ManualClock, MicrosClock, SystemClock};
use crate::config::PipelineConfig;
use crate::context::{PipelineError, PipelineParts};
use crate::handoff::FrameAudio;
use crate::scheduler::{IRQ_LINE, IRQ_VBLANK};
use crate::system::GenesisPipeline;
use crate::vdp::VdpRegisters;
use emu_core::apu::{SampleBuffer, SampleProducer, Sn76489Psg, AUDIO_FREQ_DIVISOR, CYCLES_PER_LINE};
use emu_core::renderer::LineRenderer;
use emu_core::types::Frame;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Code run at the start of each CPU slice: `(cycle, sound bus)`
pub type CpuProgram = Box<dyn FnMut(u32, &mut SoundBus) + Send>;

#[derive(Debug, Default)]
pub struct IrqCounters {
    pub line: AtomicU64,
    pub vblank: AtomicU64,
    pub z80_asserted: AtomicU64,
    pub z80_released: AtomicU64,
}

/// A CPU that burns cycles in fixed steps and optionally runs a program.
pub struct HarnessCpu {
    name: &'static str,
    z80: bool,
    cycles: u32,
    step_cycles: u32,
    cost: Option<(Arc<ManualClock>, u32)>,
    vdp: Option<Arc<VdpRegisters>>,
    program: Option<CpuProgram>,
    irqs: Arc<IrqCounters>,
}

impl HarnessCpu {
    pub fn m68k(irqs: Arc<IrqCounters>) -> Self {
        Self {
            name: "m68k",
            z80: false,
            cycles: 0,
            step_cycles: 28,
            cost: None,
            vdp: None,
            program: None,
            irqs,
        }
    }

    pub fn z80(irqs: Arc<IrqCounters>) -> Self {
        Self {
            name: "z80",
            z80: true,
            step_cycles: 45,
            ..Self::m68k(irqs)
        }
    }

    /// Each slice costs `us` microseconds of `clock` time.
    pub fn with_cost(mut self, clock: Arc<ManualClock>, us: u32) -> Self {
        self.cost = Some((clock, us));
        self
    }

    /// Acknowledge vertical interrupts like a game's VINT handler would.
    pub fn acknowledging(mut self, vdp: Arc<VdpRegisters>) -> Self {
        self.vdp = Some(vdp);
        self
    }

    pub fn with_program(mut self, program: CpuProgram) -> Self {
        self.program = Some(program);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl CpuAdapter for HarnessCpu {
    fn cycles(&self) -> u32 {
        self.cycles
    }

    fn execute(&mut self, target_cycle: u32, sound: &mut SoundBus) {
        if let Some(program) = self.program.as_mut() {
            program(self.cycles, sound);
        }
        while self.cycles < target_cycle {
            self.cycles += self.step_cycles;
        }
        if let Some((clock, us)) = &self.cost {
            clock.advance(*us as u64);
        }
    }

    fn set_irq(&mut self, level: u8) {
        if self.z80 {
            let counter = if level != 0 {
                &self.irqs.z80_asserted
            } else {
                &self.irqs.z80_released
            };
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match level {
            IRQ_LINE => {
                self.irqs.line.fetch_add(1, Ordering::Relaxed);
            }
            IRQ_VBLANK => {
                self.irqs.vblank.fetch_add(1, Ordering::Relaxed);
                if let Some(vdp) = &self.vdp {
                    vdp.acknowledge_vint();
                }
            }
            _ => {}
        }
    }

    fn end_frame(&mut self, frame_cycles: u32) {
        self.cycles = self.cycles.saturating_sub(frame_cycles);
    }

    fn reset(&mut self) {
        self.cycles = 0;
    }
}

/// PSG program playing a scale on tone channel 0, one note every 15 frames.
pub fn melody_program() -> CpuProgram {
    // Tone periods for A4..A5 at the NTSC PSG clock
    const NOTES: [u16; 8] = [254, 226, 202, 190, 170, 151, 135, 127];
    let mut frame = 0u64;
    Box::new(move |cycle, sound| {
        if cycle >= CYCLES_PER_LINE {
            return;
        }
        if frame == 0 {
            sound.write_psg(0x90, cycle);
        }
        if frame % 15 == 0 {
            let period = NOTES[(frame / 15) as usize % NOTES.len()];
            sound.write_psg(0x80 | (period & 0x0F) as u8, cycle);
            sound.write_psg(((period >> 4) & 0x3F) as u8, cycle);
        }
        frame += 1;
    })
}

/// The value a `PatternProducer` writes as the last sample of `frame`
pub fn canary(frame: u64) -> i16 {
    (frame & 0x7FFF) as i16
}

/// True when every chip buffer in `audio` ends with its frame's canary.
pub fn canary_matches(audio: &FrameAudio) -> bool {
    let expected = canary(audio.frame);
    [(&audio.fm, audio.fm_count), (&audio.psg, audio.psg_count)]
        .iter()
        .all(|(buffer, count)| match buffer {
            Some(buffer) if *count > 0 => buffer
                .storage()
                .get(*count as usize - 1)
                .is_some_and(|&s| s == expected),
            _ => false,
        })
}

/// Repeats a fixed waveform and stamps the last sample of every frame with
/// a frame-counter canary.
pub struct PatternProducer {
    pattern: Vec<i16>,
    phase: usize,
    samples_per_frame: usize,
    produced: usize,
    frame: u64,
    next_frame: u64,
    gain: u8,
}

impl PatternProducer {
    pub fn new(pattern: Vec<i16>, samples_per_frame: usize) -> Self {
        Self {
            pattern: if pattern.is_empty() { vec![0] } else { pattern },
            phase: 0,
            samples_per_frame,
            produced: 0,
            frame: 0,
            next_frame: 0,
            gain: 0x0F,
        }
    }

    /// Triangle wave of period 53 samples (~1 kHz at 53 280 Hz).
    pub fn tone_1khz(amplitude: i16, samples_per_frame: usize) -> Self {
        const PERIOD: i32 = 53;
        let amp = amplitude as i32;
        let pattern = (0..PERIOD)
            .map(|i| {
                let up = i * 4 * amp / PERIOD;
                let v = if up <= amp {
                    up
                } else if up <= 3 * amp {
                    2 * amp - up
                } else {
                    up - 4 * amp
                };
                v as i16
            })
            .collect();
        Self::new(pattern, samples_per_frame)
    }
}

impl SampleProducer for PatternProducer {
    fn run_to_cycle(&mut self, target_cycle: u32, out: &mut SampleBuffer) {
        let due = (target_cycle / AUDIO_FREQ_DIVISOR) as usize;
        while self.produced < due {
            let sample = if self.produced + 1 == self.samples_per_frame {
                canary(self.frame)
            } else {
                let s = self.pattern[self.phase] as i32 * self.gain as i32 / 0x0F;
                s as i16
            };
            if !out.push(sample) {
                break;
            }
            self.phase = (self.phase + 1) % self.pattern.len();
            self.produced += 1;
        }
    }

    /// Any write sets a 4-bit gain from the low nibble.
    fn write(&mut self, _addr: u16, value: u8) {
        self.gain = value & 0x0F;
    }

    fn begin_frame(&mut self) {
        self.frame = self.next_frame;
        self.next_frame += 1;
        self.produced = 0;
    }

    fn sample_count(&self) -> i32 {
        self.produced as i32
    }

    fn reset(&mut self) {
        self.phase = 0;
        self.produced = 0;
        self.frame = 0;
        self.next_frame = 0;
        self.gain = 0x0F;
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

/// Render cost in microseconds, per render (not per frame)
#[derive(Debug, Clone, Default)]
pub struct RenderCost {
    pub base_us: u32,
    /// `(render index, cost)` overrides
    pub spikes: Vec<(u64, u32)>,
}

impl RenderCost {
    pub fn cost(&self, render: u64) -> u32 {
        self.spikes
            .iter()
            .find(|&&(index, _)| index == render)
            .map_or(self.base_us, |&(_, us)| us)
    }
}

#[derive(Debug, Default)]
pub struct RenderCounters {
    pub lines: AtomicU64,
    pub renders: AtomicU64,
    pub configures: AtomicU64,
    pub width: AtomicU32,
    pub height: AtomicU32,
}

impl RenderCounters {
    pub fn renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }
}

/// Draws a test card and charges its cost to a `ManualClock`.
pub struct HarnessRenderer {
    counters: Arc<RenderCounters>,
    cost: Option<(Arc<ManualClock>, RenderCost)>,
    frame: Frame,
}

impl HarnessRenderer {
    pub fn new(counters: Arc<RenderCounters>) -> Self {
        Self {
            counters,
            cost: None,
            frame: Frame::new(0, 0),
        }
    }

    pub fn with_cost(mut self, clock: Arc<ManualClock>, cost: RenderCost) -> Self {
        self.cost = Some((clock, cost));
        self
    }
}

impl LineRenderer for HarnessRenderer {
    fn render_line(&mut self, line: u32) {
        if line == 0 {
            let render = self.counters.renders.fetch_add(1, Ordering::Relaxed);
            if let Some((clock, cost)) = &self.cost {
                clock.advance(cost.cost(render) as u64);
            }
        }
        self.counters.lines.fetch_add(1, Ordering::Relaxed);

        let width = self.frame.width as usize;
        let start = line as usize * width;
        if let Some(row) = self.frame.pixels.get_mut(start..start + width) {
            for (x, px) in row.iter_mut().enumerate() {
                let band = (x * 8 / width.max(1)) as u32;
                *px = 0xFF00_0000 | (band * 0x1F) << 16 | (line & 0xFF) << 8;
            }
        }
    }

    fn configure(&mut self, width: u32, height: u32) {
        self.counters.configures.fetch_add(1, Ordering::Relaxed);
        self.counters.width.store(width, Ordering::Relaxed);
        self.counters.height.store(height, Ordering::Relaxed);
        self.frame = Frame::new(width, height);
    }

    fn frame(&self) -> Option<&Frame> {
        Some(&self.frame)
    }

    fn name(&self) -> &str {
        "test card"
    }
}

/// Knobs for `Harness::parts`
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Use the wall clock instead of modelled time
    pub real_time: bool,
    pub m68k_us_per_line: u32,
    pub z80_us_per_line: u32,
    pub render: RenderCost,
    /// Play a PSG melody on an SN76489 instead of the canary pattern
    pub melody: bool,
    pub fm_amplitude: i16,
    pub psg_amplitude: i16,
    /// The M68K acknowledges VINT as soon as it is raised
    pub acknowledge_vint: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            real_time: false,
            m68k_us_per_line: 20,
            z80_us_per_line: 10,
            render: RenderCost {
                base_us: 4000,
                spikes: Vec::new(),
            },
            melody: false,
            fm_amplitude: 6000,
            psg_amplitude: 3000,
            acknowledge_vint: true,
        }
    }
}

/// Handles onto everything the harness collaborators record
#[derive(Clone)]
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub renders: Arc<RenderCounters>,
    pub irqs: Arc<IrqCounters>,
    pub vdp: Arc<VdpRegisters>,
    pub capture: CaptureOutput,
}

impl Harness {
    /// Pipeline parts built from harness collaborators, writing audio to
    /// `output`.
    pub fn parts(
        config: &PipelineConfig,
        options: &HarnessOptions,
        output: Box<dyn I2sOutput + Send>,
    ) -> (PipelineParts, Harness) {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn MicrosClock> = if options.real_time {
            Arc::new(SystemClock::new())
        } else {
            manual.clone()
        };
        let vdp = VdpRegisters::with_region(config.region);
        vdp.set_register(12, if config.h40 { 0x81 } else { 0x00 });
        vdp.set_register(1, vdp.register(1) | 0x20);
        let vdp = Arc::new(vdp);
        let irqs = Arc::new(IrqCounters::default());
        let renders = Arc::new(RenderCounters::default());
        let spf = config.mixer.samples_per_frame;

        let mut m68k = HarnessCpu::m68k(irqs.clone());
        let mut z80 = HarnessCpu::z80(irqs.clone());
        let mut renderer = HarnessRenderer::new(renders.clone());
        if !options.real_time {
            m68k = m68k.with_cost(manual.clone(), options.m68k_us_per_line);
            z80 = z80.with_cost(manual.clone(), options.z80_us_per_line);
            renderer = renderer.with_cost(manual.clone(), options.render.clone());
        }
        if options.acknowledge_vint {
            m68k = m68k.acknowledging(vdp.clone());
        }

        let psg: Box<dyn SampleProducer + Send> = if options.melody {
            z80 = z80.with_program(melody_program());
            Box::new(Sn76489Psg::new())
        } else {
            Box::new(PatternProducer::tone_1khz(options.psg_amplitude, spf))
        };

        let parts = PipelineParts {
            m68k: Box::new(m68k),
            z80: Box::new(z80),
            fm: Box::new(PatternProducer::tone_1khz(options.fm_amplitude, spf)),
            psg,
            renderer: Box::new(renderer),
            output,
            clock,
            vdp: Some(vdp.clone()),
        };
        let harness = Harness {
            clock: manual,
            renders,
            irqs,
            vdp,
            capture: CaptureOutput::new(),
        };
        (parts, harness)
    }

    /// A lockstep pipeline whose audio lands in `Harness::capture`.
    pub fn pipeline(
        config: PipelineConfig,
        options: &HarnessOptions,
    ) -> Result<(GenesisPipeline, Harness), PipelineError> {
        let capture = CaptureOutput::new();
        let (parts, mut harness) = Self::parts(&config, options, Box::new(capture.clone()));
        harness.capture = capture;
        Ok((GenesisPipeline::new(config, parts)?, harness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_producer_stamps_canary() {
        let mut p = PatternProducer::tone_1khz(1000, 888);
        let mut out = SampleBuffer::new();
        for frame in 0..3u64 {
            p.begin_frame();
            out.clear();
            p.run_to_cycle(400 * AUDIO_FREQ_DIVISOR, &mut out);
            p.run_to_cycle(888 * AUDIO_FREQ_DIVISOR, &mut out);
            assert_eq!(p.sample_count(), 888);
            assert_eq!(out.as_slice()[887], canary(frame));
        }
    }

    #[test]
    fn test_triangle_stays_in_range() {
        let p = PatternProducer::tone_1khz(1000, 888);
        assert_eq!(p.pattern.len(), 53);
        assert!(p.pattern.iter().all(|&s| (-1000..=1000).contains(&s)));
        assert!(p.pattern.iter().any(|&s| s > 900));
        assert!(p.pattern.iter().any(|&s| s < -900));
    }

    #[test]
    fn test_canary_check() {
        let mut fm = SampleBuffer::new();
        let mut psg = SampleBuffer::new();
        fm.push(1);
        fm.push(canary(7));
        psg.push(canary(7));
        let mut audio = FrameAudio {
            frame: 7,
            fm: Some(fm),
            psg: Some(psg),
            fm_count: 2,
            psg_count: 1,
        };
        assert!(canary_matches(&audio));
        audio.frame = 8;
        assert!(!canary_matches(&audio));
        audio.frame = 7;
        audio.psg_count = 0;
        assert!(!canary_matches(&audio));
    }

    #[test]
    fn test_render_cost_spikes() {
        let cost = RenderCost {
            base_us: 10,
            spikes: vec![(3, 500)],
        };
        assert_eq!(cost.cost(2), 10);
        assert_eq!(cost.cost(3), 500);
    }

    #[test]
    fn test_renderer_charges_clock_once_per_render() {
        let clock = Arc::new(ManualClock::new());
        let counters = Arc::new(RenderCounters::default());
        let mut r = HarnessRenderer::new(counters.clone()).with_cost(
            clock.clone(),
            RenderCost {
                base_us: 100,
                spikes: Vec::new(),
            },
        );
        r.configure(320, 224);
        for line in 0..224 {
            r.render_line(line);
        }
        assert_eq!(clock.now_us(), 100);
        assert_eq!(counters.renders(), 1);
        assert_eq!(counters.lines(), 224);
        assert_eq!(r.frame().map(|f| f.pixels.len()), Some(320 * 224));
    }
}
