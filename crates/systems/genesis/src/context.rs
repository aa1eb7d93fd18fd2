//! Builds both cores from a configuration and wires them together.
//!
//! `PipelineContext::new` is the only place the handoff, the buffer manager
//! and the shared controls are created, so every run (and every reset that
//! rebuilds a context) starts from the same state. The two halves are
//! separate types: the emulation core only sees the publishing side of the
//! handoff and the audio core only the consuming side.

use crate::adapters::{CpuAdapter, SoundBus};
use crate::audio_core::AudioCore;
use crate::audio_out::{build_buffer_manager, DmaError, I2sOutput};
use crate::clock::MicrosClock;
use crate::config::{ConfigError, PipelineConfig};
use crate::handoff::handoff_pair;
use crate::mixer::{AudioControls, Mixer};
use crate::scheduler::{FrameReport, FrameScheduler, SchedulerParts};
use crate::stats::PipelineStats;
use crate::vdp::VdpRegisters;
use emu_core::apu::SampleProducer;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::renderer::LineRenderer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("audio DMA setup failed: {0}")]
    Dma(#[from] DmaError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// External collaborators the pipeline drives
pub struct PipelineParts {
    pub m68k: Box<dyn CpuAdapter>,
    pub z80: Box<dyn CpuAdapter>,
    pub fm: Box<dyn SampleProducer + Send>,
    pub psg: Box<dyn SampleProducer + Send>,
    pub renderer: Box<dyn LineRenderer>,
    pub output: Box<dyn I2sOutput + Send>,
    pub clock: Arc<dyn MicrosClock>,
    /// Registers shared with whatever writes them; created from the
    /// configuration when absent
    pub vdp: Option<Arc<VdpRegisters>>,
}

/// Emulation-core half: scheduler plus the publishing side of the handoff.
pub struct EmulationCore {
    scheduler: FrameScheduler,
}

impl EmulationCore {
    pub fn run_frame(&mut self) -> FrameReport {
        self.scheduler.run_frame()
    }

    /// Wait for the audio core to hand back the frame in flight.
    pub fn drain(&mut self) {
        self.scheduler.drain();
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut FrameScheduler {
        &mut self.scheduler
    }
}

pub struct PipelineContext {
    pub config: PipelineConfig,
    pub emulation: EmulationCore,
    pub audio: AudioCore,
    pub vdp: Arc<VdpRegisters>,
    pub controls: Arc<AudioControls>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig, parts: PipelineParts) -> Result<Self, PipelineError> {
        config.validate()?;

        let vdp = parts.vdp.unwrap_or_else(|| {
            let vdp = VdpRegisters::with_region(config.region);
            vdp.set_register(12, if config.h40 { 0x81 } else { 0x00 });
            Arc::new(vdp)
        });
        let controls = Arc::new(AudioControls::new(&config.audio));
        let (emu_handoff, audio_view) = handoff_pair();
        let manager = build_buffer_manager(&config, parts.output)?;

        let scheduler = FrameScheduler::new(
            &config,
            vdp.clone(),
            SchedulerParts {
                m68k: parts.m68k,
                z80: parts.z80,
                sound: SoundBus::new(parts.fm, parts.psg),
                renderer: parts.renderer,
            },
            emu_handoff,
            parts.clock,
        );
        let audio = AudioCore::new(
            audio_view,
            Mixer::new(config.mixer),
            manager,
            controls.clone(),
            config.dma_pacing,
        );

        log(LogCategory::Scheduler, LogLevel::Info, || {
            format!(
                "pipeline ready: {:?} {:?} strategy, {} policy, {:?} pacing",
                config.region,
                config.buffer_strategy,
                scheduler.policy_name(),
                config.dma_pacing
            )
        });

        Ok(Self {
            config,
            emulation: EmulationCore { scheduler },
            audio,
            vdp,
            controls,
        })
    }

    /// Run `frames` frames with each core on its own thread.
    pub fn spawn(self, frames: u64) -> Result<ThreadedRun, PipelineError> {
        let Self {
            mut emulation,
            mut audio,
            ..
        } = self;
        let stop = Arc::new(AtomicBool::new(false));

        let audio_stop = stop.clone();
        let audio_handle = thread::Builder::new()
            .name("audio-core".into())
            .spawn(move || {
                audio.run_until(&audio_stop);
                audio
            })
            .map_err(|source| PipelineError::Spawn {
                name: "audio-core",
                source,
            })?;

        let emu_stop = stop.clone();
        let emu_handle = thread::Builder::new()
            .name("emu-core".into())
            .spawn(move || {
                let mut reports = Vec::with_capacity(frames as usize);
                for _ in 0..frames {
                    reports.push(emulation.run_frame());
                }
                emulation.drain();
                emu_stop.store(true, Ordering::Release);
                (emulation, reports)
            });
        let emu_handle = match emu_handle {
            Ok(handle) => handle,
            Err(source) => {
                // Let the audio thread exit before reporting.
                stop.store(true, Ordering::Release);
                let _ = audio_handle.join();
                return Err(PipelineError::Spawn {
                    name: "emu-core",
                    source,
                });
            }
        };

        Ok(ThreadedRun {
            emu: emu_handle,
            audio: audio_handle,
            stop,
        })
    }
}

/// Both core threads of a `spawn`ed run
pub struct ThreadedRun {
    emu: JoinHandle<(EmulationCore, Vec<FrameReport>)>,
    audio: JoinHandle<AudioCore>,
    stop: Arc<AtomicBool>,
}

/// What a threaded run leaves behind
pub struct ThreadedOutcome {
    pub emulation: EmulationCore,
    pub audio: AudioCore,
    pub reports: Vec<FrameReport>,
}

impl ThreadedOutcome {
    pub fn stats(&self) -> PipelineStats {
        PipelineStats::collect(self.emulation.scheduler(), &self.audio)
    }
}

impl ThreadedRun {
    pub fn join(self) -> Result<ThreadedOutcome, PipelineError> {
        let (emulation, reports) = match self.emu.join() {
            Ok(done) => done,
            Err(_) => {
                // The emulation core never reached its own stop; release the
                // audio core before reporting.
                self.stop.store(true, Ordering::Release);
                let _ = self.audio.join();
                return Err(PipelineError::ThreadPanicked("emu-core"));
            }
        };
        let audio = self
            .audio
            .join()
            .map_err(|_| PipelineError::ThreadPanicked("audio-core"))?;
        Ok(ThreadedOutcome {
            emulation,
            audio,
            reports,
        })
    }
}
