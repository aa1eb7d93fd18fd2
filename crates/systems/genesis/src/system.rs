//! Both cores interleaved deterministically on one thread.

use crate::audio_core::{AudioCore, FrameProbe};
use crate::context::{EmulationCore, PipelineContext, PipelineError, PipelineParts};
use crate::config::PipelineConfig;
use crate::mixer::AudioControls;
use crate::scheduler::FrameReport;
use crate::stats::PipelineStats;
use crate::vdp::VdpRegisters;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::System;
use serde_json::Value;
use std::sync::Arc;

/// The whole pipeline in lockstep: every `step_frame` runs the emulation
/// core for one frame, then lets the audio core mix what it published.
pub struct GenesisPipeline {
    config: PipelineConfig,
    emulation: EmulationCore,
    audio: AudioCore,
    vdp: Arc<VdpRegisters>,
    controls: Arc<AudioControls>,
}

impl GenesisPipeline {
    pub fn new(config: PipelineConfig, parts: PipelineParts) -> Result<Self, PipelineError> {
        Ok(Self::from_context(PipelineContext::new(config, parts)?))
    }

    pub fn from_context(context: PipelineContext) -> Self {
        Self {
            config: context.config,
            emulation: context.emulation,
            audio: context.audio,
            vdp: context.vdp,
            controls: context.controls,
        }
    }

    /// Run `frames` frames, handing every report to `on_frame`.
    pub fn run_frames(&mut self, frames: u64, mut on_frame: impl FnMut(&FrameReport)) {
        for _ in 0..frames {
            let report = self.lockstep_frame();
            on_frame(&report);
        }
    }

    fn lockstep_frame(&mut self) -> FrameReport {
        let report = self.emulation.run_frame();
        if !self.audio.service_frame() {
            log(LogCategory::Handoff, LogLevel::Error, || {
                format!("frame {} was not published", report.frame)
            });
        }
        report
    }

    pub fn set_frame_probe(&mut self, probe: FrameProbe) {
        self.audio.set_frame_probe(probe);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn vdp(&self) -> &Arc<VdpRegisters> {
        &self.vdp
    }

    pub fn controls(&self) -> &Arc<AudioControls> {
        &self.controls
    }

    pub fn emulation(&self) -> &EmulationCore {
        &self.emulation
    }

    pub fn emulation_mut(&mut self) -> &mut EmulationCore {
        &mut self.emulation
    }

    pub fn audio(&self) -> &AudioCore {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioCore {
        &mut self.audio
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::collect(self.emulation.scheduler(), &self.audio)
    }
}

impl System for GenesisPipeline {
    type Error = PipelineError;
    type FrameReport = FrameReport;

    fn reset(&mut self) {
        // Anything still published is mixed first so the handoff drains.
        self.audio.service_frame();
        self.emulation.scheduler_mut().reset();
        self.audio.reset();
        log(LogCategory::Scheduler, LogLevel::Info, || {
            "pipeline reset".to_string()
        });
    }

    fn step_frame(&mut self) -> Result<FrameReport, PipelineError> {
        Ok(self.lockstep_frame())
    }

    fn debug_state(&self) -> Value {
        serde_json::to_value(self.stats()).unwrap_or(Value::Null)
    }
}
