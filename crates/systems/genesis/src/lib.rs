//! Sega Genesis frame and audio pipeline for a dual-core target.
//!
//! The emulation core runs the M68K and Z80 scanline by scanline, flushes
//! the YM2612 and SN76489 to a fixed sample count per frame and renders the
//! frame unless the frame-skip policy says otherwise. It then publishes the
//! frame's chip buffers through a single-slot rendezvous to the audio core,
//! which mixes them into DMA-fed I2S buffers using one of four
//! `BufferStrategy`s.
//!
//! `GenesisPipeline` runs both halves in lockstep on one thread (what tests
//! and the bench use); `PipelineContext::spawn` puts each on its own thread.
//! The `harness` module provides stand-in CPUs, chips and a renderer.

pub mod adapters;
pub mod audio_core;
pub mod audio_out;
pub mod clock;
pub mod config;
pub mod context;
pub mod frameskip;
pub mod handoff;
pub mod harness;
pub mod mixer;
pub mod rendezvous;
pub mod scheduler;
pub mod stats;
pub mod system;
pub mod vdp;

pub use adapters::{CpuAdapter, SoundBus};
pub use audio_core::{AudioCore, AudioCoreStats, FrameProbe};
pub use audio_out::{BufferManager, BufferStats, BufferStrategy, DmaPacing, I2sOutput};
pub use clock::{ManualClock, MicrosClock, SystemClock};
pub use config::{AudioDefaults, ConfigError, PipelineConfig};
pub use context::{PipelineContext, PipelineError, PipelineParts, ThreadedOutcome, ThreadedRun};
pub use frameskip::{
    AdaptiveTuning, FrameSkipController, FrameskipLevel, ParityProtection, SkipPolicyConfig,
};
pub use handoff::FrameAudio;
pub use mixer::{AudioControls, Mixer, MixerConfig};
pub use scheduler::{FrameReport, FrameScheduler};
pub use stats::PipelineStats;
pub use system::GenesisPipeline;
pub use vdp::{VdpRegisters, VideoMode};
