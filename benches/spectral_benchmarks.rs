//! Spectral Benchmarks
//!
//! Render-path cost of the spectral chain and a full channel block.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use latent_resonator::dsp::{FilterMode, NoiseRng, SemanticProfile, ShaperMode, SpectralChain, SpectralParams};
use latent_resonator::graph::ChannelGraph;
use latent_resonator::EngineConfig;

fn noise_block(len: usize) -> Vec<f32> {
    let mut rng = NoiseRng::new(0x1234_5678);
    (0..len).map(|_| rng.bipolar()).collect()
}

fn busy_params() -> SpectralParams {
    SpectralParams {
        profile: SemanticProfile::from_prompt("metallic dark"),
        band_saturation: true,
        entropy: 0.5,
        memory: 0.8,
        granularity: 0.3,
        filter_mode: FilterMode::LowPass,
        cutoff_hz: 1200.0,
        resonance: 0.7,
        comb_mix: 0.4,
        resonator_enabled: true,
        crush_enabled: true,
        crush_depth: 0.3,
        shaper_mode: ShaperMode::Warm,
        shaper_mix: 0.5,
        ..SpectralParams::default()
    }
}

fn benchmark_spectral_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectral_block_512");
    for frame_size in [512usize, 1024, 2048] {
        let mut chain = SpectralChain::new(frame_size, 48_000.0).unwrap();
        let params = busy_params();
        let input = noise_block(512);
        let mut block = input.clone();
        group.bench_with_input(BenchmarkId::from_parameter(frame_size), &frame_size, |b, _| {
            b.iter(|| {
                block.copy_from_slice(&input);
                chain.process(black_box(&mut block), &params);
            })
        });
    }
    group.finish();
}

fn benchmark_idle_graph(c: &mut Criterion) {
    let config = EngineConfig {
        max_channels: 8,
        ..EngineConfig::default()
    };
    let (_graph, mut renderer) = ChannelGraph::new(config, None).unwrap();
    let mut out = vec![0.0; 512];

    c.bench_function("graph_8_idle_slots_512", |b| {
        b.iter(|| renderer.render_mono(black_box(&[]), black_box(&mut out)))
    });
}

criterion_group!(benches, benchmark_spectral_block, benchmark_idle_graph);
criterion_main!(benches);
