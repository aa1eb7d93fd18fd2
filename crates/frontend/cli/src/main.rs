mod wav;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use emu_core::apu::TimingMode;
use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use emu_core::System;
use emu_genesis::audio_out::{BufferStrategy, DmaPacing, I2sOutput, NullOutput};
use emu_genesis::frameskip::{AdaptiveTuning, FrameskipLevel, SkipPolicyConfig};
use emu_genesis::harness::{Harness, HarnessOptions, RenderCost};
use emu_genesis::{GenesisPipeline, PipelineConfig, PipelineContext, PipelineStats};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use wav::WavOutput;

/// Run the Genesis frame/audio pipeline headless against stand-in chips.
#[derive(Parser)]
struct Args {
    /// Number of frames to run
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// JSON pipeline configuration; missing file means defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration here and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Fixed frame-skip level: none, low, medium, high, extreme
    #[arg(long, conflicts_with = "adaptive")]
    frameskip: Option<String>,

    /// Use the adaptive frame-skip policy
    #[arg(long, default_value_t = false)]
    adaptive: bool,

    /// Buffer strategy: double, chained, ring, triple
    #[arg(long)]
    strategy: Option<String>,

    /// ntsc or pal
    #[arg(long)]
    region: Option<String>,

    /// Master volume, 0-128
    #[arg(long)]
    volume: Option<u8>,

    /// Run emulation and audio on separate threads
    #[arg(long, default_value_t = false)]
    threaded: bool,

    /// Pace DMA and frame timing by the wall clock
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Modelled render cost in microseconds
    #[arg(long, default_value_t = 4000)]
    render_us: u32,

    /// Play a PSG scale instead of the test tone
    #[arg(long, default_value_t = false)]
    melody: bool,

    /// Record the DMA output stream to this WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Write final statistics as JSON to this file
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Pipeline log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Per-category override, e.g. `dma=trace` (repeatable)
    #[arg(long = "log", value_name = "CATEGORY=LEVEL")]
    log_overrides: Vec<String>,

    /// Also append pipeline logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print `debug_state` after a lockstep run
    #[arg(long, default_value_t = false)]
    dump_state: bool,

    /// Suppress the per-second progress line
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_or_default(path),
        None => PipelineConfig::default(),
    };

    if let Some(level) = &args.frameskip {
        let level = FrameskipLevel::from_str(level)
            .ok_or_else(|| anyhow!("unknown frameskip level: {}", level))?;
        config.skip_policy = SkipPolicyConfig::Pattern { level };
    }
    if args.adaptive && !matches!(config.skip_policy, SkipPolicyConfig::Adaptive(_)) {
        config.skip_policy = SkipPolicyConfig::Adaptive(AdaptiveTuning::default());
    }
    if let Some(strategy) = &args.strategy {
        config.buffer_strategy = BufferStrategy::from_str(strategy)
            .ok_or_else(|| anyhow!("unknown buffer strategy: {}", strategy))?;
    }
    if let Some(region) = &args.region {
        config.region = match region.to_ascii_lowercase().as_str() {
            "ntsc" => TimingMode::Ntsc,
            "pal" => TimingMode::Pal,
            other => anyhow::bail!("unknown region: {}", other),
        };
    }
    if let Some(volume) = args.volume {
        config.audio.volume = volume;
    }
    if args.realtime {
        config.dma_pacing = DmaPacing::RealTime;
    }
    config.validate()?;
    Ok(config)
}

fn print_stats(stats: &PipelineStats, path: Option<&PathBuf>) -> Result<()> {
    println!(
        "{} frames: {} rendered, {} skipped (policy {}), {} commits, {} underruns, {} overruns",
        stats.frames,
        stats.skip.rendered,
        stats.skip.skipped,
        stats.skip_policy,
        stats.buffers.commits,
        stats.buffers.underruns,
        stats.buffers.overruns
    );
    if let Some(path) = path {
        let mut f = File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(stats)?)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let level = LogLevel::from_str(&args.log_level)
        .ok_or_else(|| anyhow!("unknown log level: {}", args.log_level))?;
    let logging = LogConfig::global();
    logging.set_global_level(level);
    for entry in &args.log_overrides {
        let (category, level) = entry
            .split_once('=')
            .and_then(|(c, l)| Some((LogCategory::from_str(c)?, LogLevel::from_str(l)?)))
            .ok_or_else(|| anyhow!("bad --log override: {}", entry))?;
        logging.set_level(category, level);
    }
    if let Some(path) = &args.log_file {
        logging
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let config = build_config(&args)?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        log::info!("configuration written to {}", path.display());
        return Ok(());
    }

    let output: Box<dyn I2sOutput + Send> = match &args.wav {
        Some(path) => Box::new(
            WavOutput::create(path, config.sample_rate)
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(NullOutput),
    };
    let options = HarnessOptions {
        real_time: args.realtime,
        render: RenderCost {
            base_us: args.render_us,
            spikes: Vec::new(),
        },
        melody: args.melody,
        ..HarnessOptions::default()
    };
    let (parts, harness) = Harness::parts(&config, &options, output);
    log::info!(
        "running {} frames, {:?} strategy, {}",
        args.frames,
        config.buffer_strategy,
        if args.threaded { "threaded" } else { "lockstep" }
    );

    let started = Instant::now();
    let stats = if args.threaded {
        let context = PipelineContext::new(config, parts)?;
        let outcome = context.spawn(args.frames)?.join()?;
        outcome.stats()
    } else {
        let mut pipeline = GenesisPipeline::new(config, parts)?;
        let mut last_report = Instant::now();
        pipeline.run_frames(args.frames, |report| {
            if !args.quiet && last_report.elapsed().as_secs() >= 1 {
                last_report = Instant::now();
                println!(
                    "frame {}: backlog {}us, render {}",
                    report.frame, report.backlog_us, report.decision.render
                );
            }
        });
        if args.dump_state {
            println!("{}", serde_json::to_string_pretty(&pipeline.debug_state())?);
        }
        pipeline.stats()
    };

    println!(
        "done in {:.2}s, {} frames rendered by the test card",
        started.elapsed().as_secs_f64(),
        harness.renders.renders()
    );
    print_stats(&stats, args.stats_json.as_ref())
}
