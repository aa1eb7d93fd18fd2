use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use emu_core::apu::SampleBuffer;
use emu_genesis::audio_out::BufferStrategy;
use emu_genesis::frameskip::{FrameskipLevel, SkipPolicyConfig};
use emu_genesis::harness::{Harness, HarnessOptions};
use emu_genesis::{AudioControls, FrameAudio, Mixer, MixerConfig, PipelineConfig};

const SAMPLES_PER_FRAME: usize = 888;

fn chip_buffer(seed: i16) -> SampleBuffer {
    let mut buffer = SampleBuffer::new();
    for i in 0..SAMPLES_PER_FRAME as i16 {
        buffer.push(seed.wrapping_mul(i).wrapping_add(i * 37));
    }
    buffer
}

fn bench_mixer(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer");
    let frame = FrameAudio {
        frame: 0,
        fm: Some(chip_buffer(113)),
        psg: Some(chip_buffer(-57)),
        fm_count: SAMPLES_PER_FRAME as i32,
        psg_count: SAMPLES_PER_FRAME as i32,
    };
    let controls = AudioControls::default();
    let mut out = vec![0u32; SAMPLES_PER_FRAME];

    group.bench_function("full_frame", |b| {
        let mut mixer = Mixer::new(MixerConfig::default());
        b.iter(|| {
            let mixed = mixer.mix(Some(black_box(&frame)), &controls, &mut out);
            black_box(mixed);
        });
    });

    group.bench_function("fade_frame", |b| {
        let mut mixer = Mixer::new(MixerConfig::default());
        b.iter(|| {
            let mixed = mixer.mix(None, &controls, &mut out);
            black_box(mixed);
        });
    });

    group.finish();
}

fn bench_lockstep_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("lockstep_frame");

    for strategy in [
        BufferStrategy::Double,
        BufferStrategy::Chained,
        BufferStrategy::Ring,
        BufferStrategy::Triple,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", strategy)),
            &strategy,
            |b, &strategy| {
                let config = PipelineConfig {
                    skip_policy: SkipPolicyConfig::Pattern {
                        level: FrameskipLevel::None,
                    },
                    buffer_strategy: strategy,
                    ..PipelineConfig::default()
                };
                let (mut pipeline, harness) =
                    Harness::pipeline(config, &HarnessOptions::default()).unwrap();
                b.iter(|| {
                    pipeline.run_frames(1, |report| {
                        black_box(report.frame);
                    });
                    // Keep the capture from growing without bound.
                    harness.capture.clear();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_mixer, bench_lockstep_frame);
criterion_main!(benches);
