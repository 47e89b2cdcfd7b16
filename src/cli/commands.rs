//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::BackendChoice;
use crate::config::EngineConfig;
use crate::dsp::excitation::ExcitationMode;
use crate::dsp::spectral::{SpectralChain, SpectralFeatures, SpectralParams};
use crate::engine::io::{read_wav_file, write_wav_file};
use crate::error::{ResonatorError, Result};
use crate::graph::ChannelGraph;
use crate::neural::backend::TransformBackend;
use crate::neural::bridge::{BridgeBackend, HealthResponse};
use crate::neural::mock::MockBackend;

/// Options for [`render`]
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output: PathBuf,
    pub input: Option<PathBuf>,
    pub seconds: f32,
    pub channels: usize,
    pub prompt: Option<String>,
    pub backend: BackendChoice,
    pub excitation: String,
    pub sets: Vec<(String, f32)>,
    pub realtime: bool,
    pub frame_size: Option<usize>,
    pub seed: Option<u64>,
}

/// Load the config file (or defaults) and apply environment overrides
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading config: {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    };
    config.with_env_overrides()
}

/// Render one or more channels to a mono WAV file.
pub async fn render(mut config: EngineConfig, options: &RenderOptions) -> Result<()> {
    let mode = ExcitationMode::parse(&options.excitation).ok_or_else(|| {
        ResonatorError::InvalidParameter {
            param: "excitation".to_string(),
            value: options.excitation.clone(),
            expected: "euclidean | noise | oscillator | live | silence".to_string(),
        }
    })?;
    if options.seconds <= 0.0 || !options.seconds.is_finite() {
        return Err(ResonatorError::InvalidParameter {
            param: "seconds".to_string(),
            value: options.seconds.to_string(),
            expected: "a positive duration".to_string(),
        });
    }

    config.max_channels = config.max_channels.max(options.channels);
    if let Some(frame_size) = options.frame_size {
        config.channel.frame_size = frame_size;
    }
    if let Some(seed) = options.seed {
        config.channel.seed = Some(seed);
    }
    let remote: Option<Arc<dyn TransformBackend>> = match options.backend {
        BackendChoice::Remote => {
            let url = config
                .backend
                .remote_url
                .clone()
                .unwrap_or_else(|| BridgeBackend::from_env().base_url().to_string());
            config.backend.remote_url = Some(url.clone());
            Some(Arc::new(BridgeBackend::new(url, config.backend.timeout_ms)))
        }
        BackendChoice::Mock => Some(Arc::new(MockBackend::new("mock").with_gain(0.9))),
        BackendChoice::Local => {
            config.backend.local_enabled = true;
            None
        }
        BackendChoice::Passthrough => {
            config.backend.local_enabled = false;
            config.backend.allow_passthrough = true;
            None
        }
    };

    let mut channel_config = config.channel.clone();
    if let Some(prompt) = &options.prompt {
        channel_config.prompt = prompt.clone();
    }
    channel_config.params.excitation.mode = mode;
    for (name, value) in &options.sets {
        channel_config.params.set_named(name, *value)?;
    }

    let input = match &options.input {
        Some(path) => {
            let decoded = read_wav_file(path)?;
            if decoded.sample_rate != config.sample_rate {
                warn!(
                    "Input is {} Hz, engine runs at {} Hz; playing unresampled",
                    decoded.sample_rate, config.sample_rate
                );
            }
            decoded.samples
        }
        None => Vec::new(),
    };

    let sample_rate = config.sample_rate;
    let block_size = config.block_size;
    let (mut graph, mut renderer) = ChannelGraph::new(config, remote)?;
    for _ in 0..options.channels.max(1) {
        let slot = graph.acquire(&channel_config)?;
        info!(slot, "Channel active");
    }

    let total = (options.seconds * sample_rate as f32) as usize;
    let block_duration = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
    let mut ticker = tokio::time::interval(block_duration);
    let mut rendered = Vec::with_capacity(total);
    let mut block = vec![0.0; block_size];
    let mut input_block = vec![0.0; block_size];
    let mut input_pos = 0;

    println!(
        "Rendering {:.1}s with {} channel(s) ({:?} backend)...",
        options.seconds,
        options.channels.max(1),
        options.backend
    );
    while rendered.len() < total {
        let len = (total - rendered.len()).min(block_size);
        if !input.is_empty() {
            for sample in input_block[..len].iter_mut() {
                *sample = input[input_pos];
                input_pos = (input_pos + 1) % input.len();
            }
        }
        let input_slice = if input.is_empty() { &[][..] } else { &input_block[..len] };
        renderer.render_mono(input_slice, &mut block[..len]);
        rendered.extend_from_slice(&block[..len]);

        if options.realtime {
            ticker.tick().await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    for status in graph.statuses() {
        println!(
            "  slot {}: {} iterations, phase {}, backend {:?} ({:?}), {} failures",
            status.slot,
            status.iteration,
            status.phase,
            status.last_backend.as_deref().unwrap_or("-"),
            status.backend_status,
            status.consecutive_failures
        );
    }
    graph.shutdown().await;
    drop(renderer);

    write_wav_file(&options.output, &rendered, 1, sample_rate)?;
    println!("Wrote {}", options.output.display());
    Ok(())
}

/// Probe the bridge and print its health report.
pub async fn health(config: &EngineConfig, url: Option<String>) -> Result<HealthResponse> {
    let url = url
        .or_else(|| config.backend.remote_url.clone())
        .unwrap_or_else(|| BridgeBackend::from_env().base_url().to_string());
    info!("Probing bridge: {}", url);

    let bridge = BridgeBackend::new(url.clone(), config.backend.timeout_ms);
    let health = tokio::task::spawn_blocking(move || bridge.health())
        .await
        .map_err(|e| ResonatorError::BridgeConnection {
            message: e.to_string(),
        })??;

    println!("Bridge: {}", url);
    println!("Status: {}", health.status);
    println!("Model loaded: {} ({})", health.model_loaded, health.model_type);
    println!("Device: {}", health.device);
    println!("Inferences served: {}", health.inference_count);
    if let Some(error) = &health.error {
        println!("Error: {}", error);
    }
    Ok(health)
}

/// Feature summary printed by `analyze`
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub path: String,
    pub sample_rate: u32,
    pub duration_secs: f32,
    pub frames: u64,
    pub mean_centroid: f32,
    pub mean_flatness: f32,
    pub mean_flux: f32,
    pub peak_frequency_hz: f32,
    pub last: SpectralFeatures,
}

/// Run a file through a neutral spectral chain and summarise its features.
pub fn analyze(path: &Path, frame_size: usize) -> Result<AnalysisReport> {
    info!("Analyzing: {}", path.display());
    let decoded = read_wav_file(path)?;
    let mut chain = SpectralChain::new(frame_size, decoded.sample_rate as f32)?;
    let params = SpectralParams::default();

    let hop = frame_size / 2;
    let mut sums = (0.0f64, 0.0f64, 0.0f64);
    let mut blocks = 0u32;
    let mut peak = (0.0f32, 0usize);
    let mut buffer = vec![0.0; hop];

    // Pad by one frame so the tail is analysed too
    let padded = decoded
        .samples
        .iter()
        .copied()
        .chain(std::iter::repeat(0.0).take(frame_size));
    let mut filled = 0;
    for sample in padded {
        buffer[filled] = sample;
        filled += 1;
        if filled == hop {
            chain.process(&mut buffer, &params);
            filled = 0;
            let features = chain.features();
            if features.frames > 0 {
                sums.0 += features.centroid as f64;
                sums.1 += features.flatness as f64;
                sums.2 += features.flux as f64;
                blocks += 1;
                if features.peak_magnitude > peak.0 {
                    peak = (features.peak_magnitude, features.peak_bin);
                }
            }
        }
    }

    let n = blocks.max(1) as f64;
    Ok(AnalysisReport {
        path: path.display().to_string(),
        sample_rate: decoded.sample_rate,
        duration_secs: decoded.samples.len() as f32 / decoded.sample_rate.max(1) as f32,
        frames: chain.features().frames,
        mean_centroid: (sums.0 / n) as f32,
        mean_flatness: (sums.1 / n) as f32,
        mean_flux: (sums.2 / n) as f32,
        peak_frequency_hz: peak.1 as f32 * decoded.sample_rate as f32 / frame_size as f32,
        last: chain.features(),
    })
}

/// Print an analysis report as text or JSON.
pub fn print_analysis(report: &AnalysisReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("File: {}", report.path);
    println!("Duration: {:.2}s @ {} Hz", report.duration_secs, report.sample_rate);
    println!("Frames analysed: {}", report.frames);
    println!("Mean centroid: {:.3}", report.mean_centroid);
    println!("Mean flatness: {:.3}", report.mean_flatness);
    println!("Mean flux: {:.3}", report.mean_flux);
    println!("Loudest bin: {:.1} Hz", report.peak_frequency_hz);
    Ok(())
}
