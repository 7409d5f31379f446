//! Core DSP component benchmarks.
//!
//! Tests the per-sample hot paths in isolation (oscillator bank, ZDF
//! filter, envelope, LFO). These are the fastest benchmarks; run often
//! during development.
//!
//! Run: `cargo bench -- dsp_primitives`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use acidsynth::dsp::envelope::{AdsrEnvelope, EnvRole};
use acidsynth::dsp::filter::ZdfFilter;
use acidsynth::dsp::lfo::Lfo;
use acidsynth::dsp::oscillator::{OscLevels, OscillatorBank};
use acidsynth::params::LfoWaveform;

fn bench_oscillator_waveforms(c: &mut Criterion) {
    let mut group = c.benchmark_group("oscillator_waveforms");

    let cases: [(&str, OscLevels); 5] = [
        (
            "saw",
            OscLevels {
                saw: 1.0,
                ..OscLevels::default()
            },
        ),
        (
            "square",
            OscLevels {
                square: 1.0,
                ..OscLevels::default()
            },
        ),
        (
            "triangle",
            OscLevels {
                triangle: 1.0,
                ..OscLevels::default()
            },
        ),
        (
            "sub",
            OscLevels {
                sub: 1.0,
                ..OscLevels::default()
            },
        ),
        (
            "full_mix",
            OscLevels {
                saw: 1.0,
                square: 0.5,
                triangle: 0.5,
                sub: 0.3,
                noise: 0.2,
            },
        ),
    ];

    for (name, levels) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &levels, |b, levels| {
            let mut bank = OscillatorBank::new(44100.0, 1);
            b.iter(|| black_box(bank.tick(110.0, 0.5, 1, levels)));
        });
    }

    group.finish();
}

fn bench_zdf_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("zdf_filter");

    group.bench_function("static_cutoff", |b| {
        let mut filter = ZdfFilter::new(44100.0);
        b.iter(|| black_box(filter.process(black_box(0.5), 1000.0, 4.0)));
    });

    group.bench_function("modulated_cutoff", |b| {
        let mut filter = ZdfFilter::new(44100.0);
        let mut cutoff = 200.0f32;
        b.iter(|| {
            cutoff = if cutoff > 8000.0 { 200.0 } else { cutoff * 1.001 };
            black_box(filter.process(black_box(0.5), cutoff, 18.0))
        });
    });

    group.finish();
}

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    group.bench_function("sustain_tick", |b| {
        let mut env = AdsrEnvelope::new(44100.0, EnvRole::Amplitude);
        env.trigger(0.001, 0.01, 0.7, false);
        for _ in 0..2000 {
            env.tick();
        }
        b.iter(|| black_box(env.tick()));
    });

    group.bench_function("full_cycle", |b| {
        let mut env = AdsrEnvelope::new(44100.0, EnvRole::Amplitude);
        b.iter(|| {
            env.trigger(0.001, 0.005, 0.5, true);
            for _ in 0..500 {
                black_box(env.tick());
            }
            env.release(0.01);
            for _ in 0..500 {
                black_box(env.tick());
            }
        });
    });

    group.finish();
}

fn bench_lfo(c: &mut Criterion) {
    let mut group = c.benchmark_group("lfo");

    for waveform in [
        LfoWaveform::Sine,
        LfoWaveform::Triangle,
        LfoWaveform::SampleHold,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", waveform)),
            &waveform,
            |b, &waveform| {
                let mut lfo = Lfo::new(44100.0, 3);
                b.iter(|| black_box(lfo.tick(5.0, waveform)));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_oscillator_waveforms,
    bench_zdf_filter,
    bench_envelope,
    bench_lfo
);
criterion_main!(benches);
