use emu_genesis::audio_out::{BufferStrategy, NullOutput};
use emu_genesis::frameskip::{FrameskipLevel, SkipPolicyConfig};
use emu_genesis::harness::{canary_matches, Harness, HarnessOptions};
use emu_core::renderer::LineRenderer;
use emu_genesis::{FrameAudio, PipelineConfig, PipelineContext, PipelineError};
use std::sync::{Arc, Mutex};

fn config(strategy: BufferStrategy) -> PipelineConfig {
    PipelineConfig {
        skip_policy: SkipPolicyConfig::Pattern {
            level: FrameskipLevel::Medium,
        },
        buffer_strategy: strategy,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_frames_cross_cores_intact_and_in_order() {
    for strategy in [BufferStrategy::Ring, BufferStrategy::Triple] {
        let config = config(strategy);
        let (parts, harness) =
            Harness::parts(&config, &HarnessOptions::default(), Box::new(NullOutput));
        let mut context = PipelineContext::new(config, parts).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        context
            .audio
            .set_frame_probe(Box::new(move |audio: &FrameAudio| {
                sink.lock()
                    .unwrap()
                    .push((audio.frame, canary_matches(audio)));
            }));

        let outcome = context.spawn(300).unwrap().join().unwrap();

        assert_eq!(outcome.reports.len(), 300);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 300, "{:?}", strategy);
        for (i, &(frame, intact)) in seen.iter().enumerate() {
            assert_eq!(frame, i as u64);
            assert!(intact, "frame {} torn with {:?}", frame, strategy);
        }
        assert_eq!(outcome.audio.stats().sequence_gaps, 0);
        assert_eq!(outcome.audio.buffer_stats().commits, 300);
        assert_eq!(outcome.emulation.scheduler().frames_published(), 300);
        assert_eq!(harness.renders.renders(), 150);
    }
}

#[test]
fn test_zero_frames_shuts_down_cleanly() {
    let config = config(BufferStrategy::Double);
    let (parts, _harness) =
        Harness::parts(&config, &HarnessOptions::default(), Box::new(NullOutput));
    let context = PipelineContext::new(config, parts).unwrap();
    let outcome = context.spawn(0).unwrap().join().unwrap();
    assert!(outcome.reports.is_empty());
    assert_eq!(outcome.audio.stats().frames_mixed, 0);
}

/// Renders normally, then panics on line 0 of frame `fail_at`.
struct FailingRenderer {
    inner: Box<dyn LineRenderer>,
    frames: u64,
    fail_at: u64,
}

impl LineRenderer for FailingRenderer {
    fn render_line(&mut self, line: u32) {
        if line == 0 {
            if self.frames == self.fail_at {
                panic!("renderer failed on frame {}", self.frames);
            }
            self.frames += 1;
        }
        self.inner.render_line(line);
    }

    fn configure(&mut self, width: u32, height: u32) {
        self.inner.configure(width, height);
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[test]
fn test_emulation_panic_releases_audio_core() {
    let config = config(BufferStrategy::Ring);
    let (mut parts, _harness) =
        Harness::parts(&config, &HarnessOptions::default(), Box::new(NullOutput));
    parts.renderer = Box::new(FailingRenderer {
        inner: parts.renderer,
        frames: 0,
        fail_at: 3,
    });
    let context = PipelineContext::new(config, parts).unwrap();

    // Returns instead of hanging on the audio core.
    let err = context.spawn(100).unwrap().join().err();
    assert!(matches!(
        err,
        Some(PipelineError::ThreadPanicked("emu-core"))
    ));
}
