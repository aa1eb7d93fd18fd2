//! The per-frame loop of the emulation core.
//!
//! One call to `run_frame` emulates a whole video frame:
//!
//! 1. sample the VDP registers into a `VideoMode`; a mode change reconfigures
//!    the renderer and forces a render
//! 2. ask the `FrameSkipController` whether this frame renders
//! 3. run both CPUs one scanline at a time, raising line, vertical and Z80
//!    interrupts at the right lines
//! 4. run both sound chips to the fixed end-of-frame cycle
//! 5. render every visible line, if decided
//! 6. publish the frame's audio to the audio core
//! 7. rebase the CPU cycle counters for the next frame
//!
//! Emulation and audio always run; only step 5 is optional.

use crate::adapters::{CpuAdapter, SoundBus};
use crate::clock::{elapsed_us, MicrosClock};
use crate::config::PipelineConfig;
use crate::frameskip::{FrameSkipController, FrameSkipState, FrameTiming, SkipDecision, SkipStats};
use crate::handoff::EmulationHandoff;
use crate::stats::{FrameProfile, PhaseTimes, Profiler};
use crate::vdp::{VdpRegisters, VideoMode};
use emu_core::apu::{AUDIO_FREQ_DIVISOR, CYCLES_PER_LINE};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::renderer::LineRenderer;
use serde::Serialize;
use std::sync::Arc;

/// M68K interrupt level of the line (horizontal) interrupt
pub const IRQ_LINE: u8 = 4;
/// M68K interrupt level of the vertical interrupt
pub const IRQ_VBLANK: u8 = 6;

/// What one frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub mode: VideoMode,
    pub mode_changed: bool,
    pub decision: SkipDecision,
    pub times: PhaseTimes,
    pub backlog_us: u32,
    /// `(fm, psg)` sample counts as published
    pub samples: (i32, i32),
    pub line_interrupts: u32,
    pub vblank_raised: bool,
}

/// Collaborators driven by the scheduler
pub struct SchedulerParts {
    pub m68k: Box<dyn CpuAdapter>,
    pub z80: Box<dyn CpuAdapter>,
    pub sound: SoundBus,
    pub renderer: Box<dyn LineRenderer>,
}

pub struct FrameScheduler {
    vdp: Arc<VdpRegisters>,
    m68k: Box<dyn CpuAdapter>,
    z80: Box<dyn CpuAdapter>,
    sound: SoundBus,
    renderer: Box<dyn LineRenderer>,
    skip: FrameSkipController,
    handoff: EmulationHandoff,
    clock: Arc<dyn MicrosClock>,
    profiler: Profiler,
    sound_flush_cycle: u32,
    frame: u64,
    last_mode: Option<VideoMode>,
    hint_counter: i32,
}

impl FrameScheduler {
    pub fn new(
        config: &PipelineConfig,
        vdp: Arc<VdpRegisters>,
        parts: SchedulerParts,
        handoff: EmulationHandoff,
        clock: Arc<dyn MicrosClock>,
    ) -> Self {
        Self {
            vdp,
            m68k: parts.m68k,
            z80: parts.z80,
            sound: parts.sound,
            renderer: parts.renderer,
            skip: FrameSkipController::from_config(
                &config.skip_policy,
                config.max_consecutive_skips,
            ),
            handoff,
            clock,
            profiler: Profiler::new(config.profile_interval_frames),
            sound_flush_cycle: config.mixer.samples_per_frame as u32 * AUDIO_FREQ_DIVISOR,
            frame: 0,
            last_mode: None,
            hint_counter: 0,
        }
    }

    pub fn run_frame(&mut self) -> FrameReport {
        let frame_start = self.clock.now_us();
        let mut times = PhaseTimes::default();

        // Setup
        let mode = VideoMode::sample(&self.vdp);
        let mode_changed = self.last_mode != Some(mode);
        if mode_changed {
            let (width, height) = mode.dimensions();
            if self.last_mode.map(|m| m.dimensions()) != Some((width, height)) {
                self.renderer.configure(width, height);
            }
            log(LogCategory::Scheduler, LogLevel::Info, || {
                format!(
                    "frame {}: video mode {:?} {}x{} {} lines",
                    self.frame, mode.timing, width, height, mode.lines_per_frame
                )
            });
            self.last_mode = Some(mode);
        }

        let decision = self.skip.decide(self.frame, mode_changed);

        // Emulation
        self.sound.begin_frame();
        let (line_interrupts, vblank_raised) = self.run_lines(&mode, &mut times);

        // Sound flush
        let t = self.clock.now_us();
        self.sound.flush(self.sound_flush_cycle);
        times.sound_us = elapsed_us(self.clock.as_ref(), t);

        // Render
        if decision.render {
            let t = self.clock.now_us();
            for line in 0..mode.height {
                self.renderer.render_line(line);
            }
            times.render_us = elapsed_us(self.clock.as_ref(), t);
            self.skip.record_render(times.render_us);
        }

        // Publish
        let samples = self.sound.sample_counts();
        let work_us = elapsed_us(self.clock.as_ref(), frame_start);
        times.audio_wait_us =
            self.handoff
                .publish(self.frame, &mut self.sound, self.clock.as_ref());
        self.skip.finish_frame(&FrameTiming {
            work_us,
            audio_wait_us: times.audio_wait_us,
            budget_us: mode.budget_us,
        });

        // Rebase
        let frame_cycles = mode.lines_per_frame * CYCLES_PER_LINE;
        self.m68k.end_frame(frame_cycles);
        self.z80.end_frame(frame_cycles);

        times.frame_us = elapsed_us(self.clock.as_ref(), frame_start);
        self.profiler.on_frame(&times, decision.render);

        let report = FrameReport {
            frame: self.frame,
            mode,
            mode_changed,
            decision,
            times,
            backlog_us: self.skip.state().backlog_us,
            samples,
            line_interrupts,
            vblank_raised,
        };
        self.frame += 1;
        report
    }

    /// Scanline loop. Returns `(line interrupts raised, vblank raised)`.
    fn run_lines(&mut self, mode: &VideoMode, times: &mut PhaseTimes) -> (u32, bool) {
        let height = mode.height;
        let reload = self.vdp.line_counter_reload() as i32;
        let mut line_interrupts = 0;
        let mut vblank_raised = false;
        let mut cycle = 0u32;

        for line in 0..mode.lines_per_frame {
            let target = cycle + CYCLES_PER_LINE;

            let t = self.clock.now_us();
            self.m68k.run(target, &mut self.sound);
            let t2 = self.clock.now_us();
            self.z80.run(target, &mut self.sound);
            times.m68k_us += t2.saturating_sub(t) as u32;
            times.z80_us += elapsed_us(self.clock.as_ref(), t2);

            if line == 0 || line > height {
                self.hint_counter = reload;
            }
            self.hint_counter -= 1;
            if self.hint_counter < 0 {
                if self.vdp.line_interrupt_enabled() && line <= height && !self.vdp.vint_pending()
                {
                    self.m68k.set_irq(IRQ_LINE);
                    line_interrupts += 1;
                }
                self.hint_counter = reload;
            }

            let next = line + 1;
            if next == height {
                if self.vdp.vblank_interrupt_enabled() {
                    self.vdp.raise_vint();
                    self.m68k.set_irq(IRQ_VBLANK);
                    vblank_raised = true;
                }
                self.z80.set_irq(1);
            } else if next == height + 1 {
                self.z80.set_irq(0);
            }
            cycle = target;
        }
        (line_interrupts, vblank_raised)
    }

    /// Wait until the audio core has returned the frame in flight.
    pub fn drain(&mut self) {
        self.handoff.drain();
    }

    /// Back to power-on state. The frame in flight must have been drained.
    pub fn reset(&mut self) {
        self.handoff.drain();
        self.m68k.reset();
        self.z80.reset();
        self.sound.reset();
        self.skip.reset();
        self.profiler.reset();
        self.vdp.acknowledge_vint();
        self.frame = 0;
        self.last_mode = None;
        self.hint_counter = 0;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn vdp(&self) -> &Arc<VdpRegisters> {
        &self.vdp
    }

    pub fn sound_mut(&mut self) -> &mut SoundBus {
        &mut self.sound
    }

    pub fn skip_controller_mut(&mut self) -> &mut FrameSkipController {
        &mut self.skip
    }

    pub fn skip_state(&self) -> FrameSkipState {
        self.skip.state()
    }

    pub fn skip_stats(&self) -> SkipStats {
        self.skip.stats()
    }

    pub fn policy_name(&self) -> &'static str {
        self.skip.policy_name()
    }

    pub fn frames_published(&self) -> u64 {
        self.handoff.published()
    }

    pub fn last_profile(&self) -> Option<FrameProfile> {
        self.profiler.last()
    }

    pub fn renderer(&self) -> &dyn LineRenderer {
        self.renderer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frameskip::{FrameskipLevel, SkipPolicyConfig};
    use crate::handoff::handoff_pair;
    use emu_core::apu::Sn76489Psg;
    use emu_core::apu::TimingMode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        irqs: Vec<(u32, u8)>,
        z80: Vec<(u32, u8)>,
        rendered_lines: u32,
        configured: Vec<(u32, u32)>,
    }

    struct LoggingCpu {
        cycles: u32,
        z80: bool,
        log: Arc<Mutex<Log>>,
    }

    impl CpuAdapter for LoggingCpu {
        fn cycles(&self) -> u32 {
            self.cycles
        }
        fn execute(&mut self, target_cycle: u32, _sound: &mut SoundBus) {
            self.cycles = target_cycle;
        }
        fn set_irq(&mut self, level: u8) {
            let line = self.cycles / CYCLES_PER_LINE;
            let mut log = self.log.lock().unwrap();
            if self.z80 {
                log.z80.push((line, level));
            } else {
                log.irqs.push((line, level));
            }
        }
        fn end_frame(&mut self, frame_cycles: u32) {
            self.cycles = self.cycles.saturating_sub(frame_cycles);
        }
        fn reset(&mut self) {
            self.cycles = 0;
        }
    }

    struct LoggingRenderer(Arc<Mutex<Log>>);

    impl LineRenderer for LoggingRenderer {
        fn render_line(&mut self, _line: u32) {
            self.0.lock().unwrap().rendered_lines += 1;
        }
        fn configure(&mut self, width: u32, height: u32) {
            self.0.lock().unwrap().configured.push((width, height));
        }
        fn name(&self) -> &str {
            "logging"
        }
    }

    fn scheduler(
        level: FrameskipLevel,
    ) -> (FrameScheduler, crate::handoff::AudioHandoffView, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let config = PipelineConfig {
            skip_policy: SkipPolicyConfig::Pattern { level },
            ..PipelineConfig::default()
        };
        let parts = SchedulerParts {
            m68k: Box::new(LoggingCpu {
                cycles: 0,
                z80: false,
                log: log.clone(),
            }),
            z80: Box::new(LoggingCpu {
                cycles: 0,
                z80: true,
                log: log.clone(),
            }),
            sound: SoundBus::new(Box::new(Sn76489Psg::new()), Box::new(Sn76489Psg::new())),
            renderer: Box::new(LoggingRenderer(log.clone())),
        };
        let (emu, audio) = handoff_pair();
        let vdp = Arc::new(VdpRegisters::with_region(TimingMode::Ntsc));
        let clock: Arc<dyn MicrosClock> = Arc::new(ManualClock::new());
        (
            FrameScheduler::new(&config, vdp, parts, emu, clock),
            audio,
            log,
        )
    }

    fn run(s: &mut FrameScheduler, audio: &mut crate::handoff::AudioHandoffView) -> FrameReport {
        let report = s.run_frame();
        let frame = audio.try_frame().unwrap();
        audio.complete(frame);
        report
    }

    #[test]
    fn test_first_frame_configures_and_renders() {
        let (mut s, mut audio, log) = scheduler(FrameskipLevel::Extreme);
        let report = run(&mut s, &mut audio);
        assert!(report.mode_changed);
        assert!(report.decision.render);
        assert_eq!(report.samples, (888, 888));
        let log = log.lock().unwrap();
        assert_eq!(log.configured, vec![(256, 224)]);
        assert_eq!(log.rendered_lines, 224);
    }

    #[test]
    fn test_vblank_and_z80_lines() {
        let (mut s, mut audio, log) = scheduler(FrameskipLevel::None);
        s.vdp().set_register(1, 0x20);
        let report = run(&mut s, &mut audio);
        assert!(report.vblank_raised);
        assert!(s.vdp().vint_pending());
        let log = log.lock().unwrap();
        // Raised after line 223 completes, i.e. as line 224 begins.
        assert_eq!(log.irqs, vec![(224, IRQ_VBLANK)]);
        assert_eq!(log.z80, vec![(224, 1), (225, 0)]);
    }

    #[test]
    fn test_line_interrupt_every_reload_plus_one_lines() {
        let (mut s, mut audio, log) = scheduler(FrameskipLevel::None);
        s.vdp().set_register(0, 0x10);
        s.vdp().set_register(10, 15);
        let report = run(&mut s, &mut audio);
        // Scanlines 15, 31, ..., 223; the CPU takes each one as the
        // following line begins.
        let lines: Vec<u32> = log.lock().unwrap().irqs.iter().map(|&(l, _)| l).collect();
        assert_eq!(lines.first(), Some(&16));
        assert!(lines.windows(2).all(|p| p[1] - p[0] == 16));
        assert_eq!(report.line_interrupts as usize, lines.len());
        assert_eq!(report.line_interrupts, 14);
    }

    #[test]
    fn test_pending_vint_blocks_line_interrupts() {
        let (mut s, mut audio, _log) = scheduler(FrameskipLevel::None);
        s.vdp().set_register(0, 0x10);
        s.vdp().set_register(10, 0);
        s.vdp().set_register(1, 0x20);
        let first = run(&mut s, &mut audio);
        // Every visible line plus line 224, except 224 itself is blocked
        // because VINT was raised as it began.
        assert_eq!(first.line_interrupts, 224);
        // Nobody acknowledged: the whole next frame is blocked.
        let second = run(&mut s, &mut audio);
        assert_eq!(second.line_interrupts, 0);
        s.vdp().acknowledge_vint();
        let third = run(&mut s, &mut audio);
        assert_eq!(third.line_interrupts, 224);
    }

    #[test]
    fn test_region_switch_forces_render() {
        let (mut s, mut audio, log) = scheduler(FrameskipLevel::High);
        for _ in 0..4 {
            run(&mut s, &mut audio);
        }
        // Frame 4 is off-pattern at High.
        s.vdp().set_region(TimingMode::Pal);
        let report = run(&mut s, &mut audio);
        assert_eq!(report.frame, 4);
        assert!(report.mode_changed);
        assert!(report.decision.render);
        assert_eq!(report.mode.lines_per_frame, 313);
        assert_eq!(report.mode.budget_us, 20_000);
        assert_eq!(log.lock().unwrap().configured.last(), Some(&(256, 240)));
        // Frame 5 follows the pattern again.
        assert!(!run(&mut s, &mut audio).decision.render);
    }

    #[test]
    fn test_reset_starts_over() {
        let (mut s, mut audio, _log) = scheduler(FrameskipLevel::None);
        run(&mut s, &mut audio);
        run(&mut s, &mut audio);
        s.reset();
        assert_eq!(s.frame(), 0);
        assert_eq!(s.skip_stats().rendered, 0);
        assert!(run(&mut s, &mut audio).mode_changed);
    }
}
