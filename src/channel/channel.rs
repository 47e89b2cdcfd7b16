//! Feedback channel
//!
//! A channel is split in two at construction:
//!
//! - [`ChannelRenderer`] lives on the audio thread. Per block it reads
//!   feedback (falling back to recall, sustain, then silence on underrun),
//!   adds excitation, runs the spectral chain and the feedback delay, writes
//!   the output and duplicates it into the capture ring. It never allocates,
//!   locks (beyond `try_lock`) or fails.
//! - [`FeedbackChannel`] is the control handle. It owns the async-side ring
//!   ends while idle, starts and stops the inference cycle, and exposes
//!   status, recall and the step-lock flags.
//!
//! Everything the two sides share sits in [`ChannelShared`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::archive::{ArchiveEntry, IterationArchive};
use super::breaker::CircuitBreaker;
use super::cycle::{ChannelBackends, CycleParts, InferenceCycle};
use super::drift::AutoDrift;
use super::params::{ChannelParams, SharedParams};
use crate::config::{ChannelConfig, EngineConfig};
use crate::dsp::delay::FeedbackDelay;
use crate::dsp::excitation::{ExcitationGenerator, ExcitationSettings};
use crate::dsp::rng::NoiseRng;
use crate::dsp::spectral::{FeatureProbe, SpectralChain, SpectralFeatures, SpectralParams};
use crate::engine::ring_buffer::{Consumer, Producer, RingBuffer};
use crate::engine::shared::{AtomicF32, SharedBlock};
use crate::engine::state::{ChannelState, StateCell};
use crate::error::{ResonatorError, Result};

// ============================================================================
// Settings
// ============================================================================

/// Sizes and timings fixed when a channel is built
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub sample_rate: u32,
    /// Largest block the renderer processes at once; also the minimum capture per cycle
    pub max_block: usize,
    pub frame_size: usize,
    pub capture_capacity: usize,
    pub feedback_capacity: usize,
    pub cycle_samples: usize,
    pub archive_capacity: usize,
    pub cycle_yield: Duration,
    pub backend_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub backoff: Duration,
    pub seed: u64,
}

impl ChannelSettings {
    pub fn from_config(engine: &EngineConfig, channel: &ChannelConfig) -> Self {
        let sr = engine.sample_rate;
        Self {
            sample_rate: sr,
            max_block: engine.block_size,
            frame_size: channel.frame_size,
            capture_capacity: channel.capture_capacity(sr),
            feedback_capacity: channel.feedback_capacity(sr),
            cycle_samples: channel.cycle_samples(sr),
            archive_capacity: channel.archive_capacity,
            cycle_yield: Duration::from_millis(channel.cycle_yield_ms),
            backend_timeout: Duration::from_millis(engine.backend.timeout_ms),
            max_consecutive_failures: engine.backend.max_consecutive_failures,
            backoff: Duration::from_millis(engine.backend.backoff_ms),
            seed: channel.seed.unwrap_or_else(|| NoiseRng::from_entropy().next_u64()),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), &ChannelConfig::default())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Backend health as seen by the control boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// The preferred backend served the last cycle
    Connected,
    /// A fallback served the last cycle
    Degraded,
    /// Nothing produced output; the render path is replaying old material
    Unavailable,
}

impl BackendStatus {
    fn as_u8(self) -> u8 {
        match self {
            BackendStatus::Connected => 0,
            BackendStatus::Degraded => 1,
            BackendStatus::Unavailable => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BackendStatus::Degraded,
            2 => BackendStatus::Unavailable,
            _ => BackendStatus::Connected,
        }
    }
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub slot: usize,
    pub session_id: Option<Uuid>,
    pub state: ChannelState,
    pub iteration: u64,
    pub phase: u8,
    pub backend_status: BackendStatus,
    pub consecutive_failures: u32,
    pub inferring: bool,
    pub last_backend: Option<String>,
    pub archived: usize,
    pub features: SpectralFeatures,
}

// ============================================================================
// Shared State
// ============================================================================

/// Renderer-owned ring ends
struct RenderRings {
    feedback: Consumer<f32>,
    capture: Producer<f32>,
}

/// Render-side objects handed over from the control side
///
/// The renderer parks whatever it replaces in `retired_*` so the old
/// allocations are dropped off the audio thread.
#[derive(Default)]
struct Handover {
    chain: Option<SpectralChain>,
    retired_chain: Option<SpectralChain>,
    rings: Option<RenderRings>,
    retired_rings: Option<RenderRings>,
}

/// Fresh ring pair: the renderer's ends and the async-side parts
fn build_rings(settings: &ChannelSettings) -> (RenderRings, CycleParts) {
    let (capture_tx, capture_rx) = RingBuffer::new(settings.capture_capacity);
    let (feedback_tx, feedback_rx) = RingBuffer::new(settings.feedback_capacity);
    let rings = RenderRings {
        feedback: feedback_rx,
        capture: capture_tx,
    };
    let parts = CycleParts {
        capture: capture_rx,
        feedback: feedback_tx,
        breaker: CircuitBreaker::new(settings.max_consecutive_failures, settings.backoff),
        drift: AutoDrift::new(),
        rng: NoiseRng::new(settings.seed.rotate_left(17)),
        capture_buf: vec![0.0; settings.cycle_samples.max(settings.max_block)],
    };
    (rings, parts)
}

/// State visible to the control side, the renderer and the async cycle
pub struct ChannelShared {
    slot: usize,
    params: SharedParams,
    state: StateCell,
    iteration: AtomicU64,
    failures: AtomicU32,
    status: AtomicU8,
    phase: AtomicU8,
    inferring: AtomicBool,
    trigless: AtomicBool,
    /// NaN when unset
    denoise_override: AtomicF32,
    sustain: SharedBlock,
    recall: SharedBlock,
    reset_epoch: AtomicU64,
    handover: Mutex<Handover>,
    features: Arc<FeatureProbe>,
    archive: Mutex<IterationArchive>,
    last_backend: Mutex<Option<String>>,
    session_id: Mutex<Option<Uuid>>,
}

impl ChannelShared {
    fn new(slot: usize, params: ChannelParams, prompt: &str, settings: &ChannelSettings) -> Self {
        Self {
            slot,
            params: SharedParams::new(params, prompt),
            state: StateCell::new(ChannelState::Idle),
            iteration: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            status: AtomicU8::new(BackendStatus::Connected.as_u8()),
            phase: AtomicU8::new(1),
            inferring: AtomicBool::new(false),
            trigless: AtomicBool::new(false),
            denoise_override: AtomicF32::new(f32::NAN),
            sustain: SharedBlock::new(settings.cycle_samples),
            recall: SharedBlock::new(settings.cycle_samples),
            reset_epoch: AtomicU64::new(0),
            handover: Mutex::new(Handover::default()),
            features: Arc::new(FeatureProbe::default()),
            archive: Mutex::new(IterationArchive::new(settings.archive_capacity)),
            last_backend: Mutex::new(None),
            session_id: Mutex::new(None),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn params(&self) -> &SharedParams {
        &self.params
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Acquire)
    }

    pub(crate) fn advance_iteration(&self) -> u64 {
        self.iteration.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn set_failures(&self, failures: u32) {
        self.failures.store(failures, Ordering::Release);
    }

    pub(crate) fn set_status(&self, status: BackendStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub fn backend_status(&self) -> BackendStatus {
        BackendStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: u8) {
        self.phase.store(phase, Ordering::Release);
    }

    pub(crate) fn set_inferring(&self, inferring: bool) {
        self.inferring.store(inferring, Ordering::Release);
    }

    pub(crate) fn take_trigless(&self) -> bool {
        self.trigless.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_denoise_override(&self) -> Option<f32> {
        let value = self.denoise_override.swap(f32::NAN);
        value.is_finite().then_some(value)
    }

    pub(crate) fn sustain(&self) -> &SharedBlock {
        &self.sustain
    }

    pub fn features(&self) -> SpectralFeatures {
        self.features.snapshot()
    }

    pub(crate) fn archive_push(&self, entry: ArchiveEntry) {
        self.archive.lock().push(entry);
    }

    pub(crate) fn set_last_backend(&self, name: &str) {
        *self.last_backend.lock() = Some(name.to_string());
    }
}

impl std::fmt::Debug for ChannelShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelShared")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .field("iteration", &self.iteration())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Render Path
// ============================================================================

/// Audio-thread half of a channel
pub struct ChannelRenderer {
    shared: Arc<ChannelShared>,
    feedback: Consumer<f32>,
    capture: Producer<f32>,
    chain: SpectralChain,
    delay: FeedbackDelay,
    excitation: ExcitationGenerator,

    params: ChannelParams,
    params_version: u64,
    spectral: SpectralParams,
    excitation_settings: ExcitationSettings,
    return_gain: f32,
    /// time ms, feedback, mix
    delay_settings: (f32, f32, f32),

    feedback_buf: Vec<f32>,
    excitation_buf: Vec<f32>,
    sustain_pos: usize,
    sustain_generation: u64,
    recall_pos: usize,
    recall_generation: u64,
    reset_epoch: u64,
}

impl ChannelRenderer {
    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    /// Largest block processed in one pass; longer calls are split
    pub fn max_block(&self) -> usize {
        self.feedback_buf.len()
    }

    /// Render one block of channel output
    ///
    /// # Arguments
    /// * `input` - Host input for live excitation; may be shorter or empty
    /// * `out` - Channel output, fully overwritten
    pub fn render(&mut self, input: &[f32], out: &mut [f32]) {
        self.apply_control();

        if !self.shared.state.is_running() {
            out.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        if self.shared.params.try_refresh(&mut self.params, &mut self.params_version) {
            self.derive_settings();
        }
        let return_gain = self.return_gain;
        let (delay_ms, delay_feedback, delay_mix) = self.delay_settings;

        let max_block = self.max_block();
        let mut offset = 0;
        while offset < out.len() {
            let len = (out.len() - offset).min(max_block);
            let input_chunk = input.get(offset..).unwrap_or(&[]);
            let input_chunk = &input_chunk[..input_chunk.len().min(len)];
            let chunk = &mut out[offset..offset + len];

            self.read_feedback(len);
            self.excitation
                .fill(&mut self.excitation_buf[..len], input_chunk, &self.excitation_settings);

            for ((o, &e), &f) in chunk
                .iter_mut()
                .zip(&self.excitation_buf[..len])
                .zip(&self.feedback_buf[..len])
            {
                *o = e + f * return_gain;
            }
            self.chain.process(chunk, &self.spectral);
            self.delay.process(chunk, delay_ms, delay_feedback, delay_mix);
            for sample in chunk.iter_mut() {
                if !sample.is_finite() {
                    *sample = 0.0;
                }
            }
            self.capture.write(chunk);
            offset += len;
        }
    }

    fn derive_settings(&mut self) {
        let p = self.params.clamped();
        self.spectral = p.spectral();
        self.excitation_settings = p.excitation;
        self.return_gain = p.return_gain;
        self.delay_settings = (p.delay_time_ms, p.delay_feedback, p.delay_mix);
    }

    /// Feedback for `len` samples: ring, then recall, then sustain, then silence
    fn read_feedback(&mut self, len: usize) {
        let got = self.feedback.read(&mut self.feedback_buf[..len], len);
        if got == len {
            return;
        }
        let gap = &mut self.feedback_buf[got..len];

        let recall_generation = self.shared.recall.generation();
        if recall_generation != self.recall_generation {
            self.recall_generation = recall_generation;
            self.recall_pos = 0;
        }
        if self.shared.recall.read_circular(&mut self.recall_pos, gap) {
            return;
        }

        let sustain_generation = self.shared.sustain.generation();
        if sustain_generation != self.sustain_generation {
            self.sustain_generation = sustain_generation;
            self.sustain_pos = 0;
        }
        if self.shared.sustain.read_circular(&mut self.sustain_pos, gap) {
            return;
        }

        gap.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Pick up resets and chain replacements requested by the control side
    fn apply_control(&mut self) {
        let epoch = self.shared.reset_epoch.load(Ordering::Acquire);
        if epoch == self.reset_epoch {
            return;
        }
        let Some(mut handover) = self.shared.handover.try_lock() else {
            return;
        };
        if let Some(chain) = handover.chain.take() {
            handover.retired_chain = Some(std::mem::replace(&mut self.chain, chain));
        }
        if let Some(rings) = handover.rings.take() {
            handover.retired_rings = Some(RenderRings {
                feedback: std::mem::replace(&mut self.feedback, rings.feedback),
                capture: std::mem::replace(&mut self.capture, rings.capture),
            });
        }
        drop(handover);

        self.chain.reset();
        self.delay.reset();
        self.excitation.reset();
        self.feedback.reset();
        self.sustain_pos = 0;
        self.recall_pos = 0;
        self.params_version = 0;
        self.reset_epoch = epoch;
    }
}

// ============================================================================
// Control Handle
// ============================================================================

struct RunningCycle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<CycleParts>,
}

/// Control-side handle of one channel
pub struct FeedbackChannel {
    shared: Arc<ChannelShared>,
    settings: ChannelSettings,
    backends: ChannelBackends,
    parts: Option<CycleParts>,
    running: Option<RunningCycle>,
}

impl FeedbackChannel {
    /// Build a channel and its renderer
    ///
    /// All buffers are allocated here; nothing on the render path allocates later.
    pub fn new(
        slot: usize,
        settings: ChannelSettings,
        params: ChannelParams,
        prompt: &str,
        backends: ChannelBackends,
    ) -> Result<(Self, ChannelRenderer)> {
        if settings.max_block == 0 {
            return Err(ResonatorError::Config {
                reason: "max_block must be positive".to_string(),
            });
        }
        let shared = Arc::new(ChannelShared::new(slot, params, prompt, &settings));
        let chain = SpectralChain::new(settings.frame_size, settings.sample_rate as f32)?
            .with_seed(settings.seed ^ 0xC4A1)
            .with_probe(Arc::clone(&shared.features));

        let (rings, parts) = build_rings(&settings);

        let params = shared.params.get();
        let mut renderer = ChannelRenderer {
            shared: Arc::clone(&shared),
            feedback: rings.feedback,
            capture: rings.capture,
            chain,
            delay: FeedbackDelay::new(settings.sample_rate as f32),
            excitation: ExcitationGenerator::new(settings.sample_rate as f32, settings.seed),
            params,
            params_version: 0,
            spectral: SpectralParams::default(),
            excitation_settings: ExcitationSettings::default(),
            return_gain: 0.0,
            delay_settings: (0.0, 0.0, 0.0),
            feedback_buf: vec![0.0; settings.max_block],
            excitation_buf: vec![0.0; settings.max_block],
            sustain_pos: 0,
            sustain_generation: 0,
            recall_pos: 0,
            recall_generation: 0,
            reset_epoch: 0,
        };
        renderer.derive_settings();

        let channel = Self {
            shared,
            settings,
            backends,
            parts: Some(parts),
            running: None,
        };
        Ok((channel, renderer))
    }

    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    pub fn shared(&self) -> &Arc<ChannelShared> {
        &self.shared
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn params(&self) -> &SharedParams {
        &self.shared.params
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        *self.shared.session_id.lock()
    }

    fn busy(&self, reason: &str) -> ResonatorError {
        ResonatorError::ChannelBusy {
            slot: self.slot(),
            reason: reason.to_string(),
        }
    }

    /// Replace the backend set (idle only)
    pub fn set_backends(&mut self, backends: ChannelBackends) -> Result<()> {
        if self.is_running() {
            return Err(self.busy("cannot swap backends while running"));
        }
        self.backends = backends;
        Ok(())
    }

    /// Start rendering and the inference cycle
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(self.busy("already running"));
        }
        self.backends.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ResonatorError::Config {
            reason: "starting a channel requires a tokio runtime".to_string(),
        })?;
        let parts = self.parts.take().ok_or_else(|| ResonatorError::InvalidState {
            from: self.state().to_string(),
            to: ChannelState::Running.to_string(),
        })?;

        if let Err(err) = self.shared.state.transition(ChannelState::Running) {
            self.parts = Some(parts);
            return Err(err);
        }

        let session = Uuid::new_v4();
        *self.shared.session_id.lock() = Some(session);

        let (cancel, cancel_rx) = watch::channel(false);
        let cycle = InferenceCycle::new(
            Arc::clone(&self.shared),
            parts,
            self.backends.clone(),
            self.settings.clone(),
        );
        let handle = runtime.spawn(cycle.run(cancel_rx));
        self.running = Some(RunningCycle { cancel, handle });

        info!(slot = self.slot(), session = %session, backends = ?self.backends, "Channel started");
        Ok(())
    }

    /// Cancel the inference cycle and mute the render path
    ///
    /// If the cycle task was lost (panicked or aborted) its ring ends went with
    /// it; a fresh ring pair is built and handed to the renderer, so the
    /// channel can be started again.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        self.shared.state.transition(ChannelState::Stopping)?;
        // A closed receiver means the task already finished
        let _ = running.cancel.send(true);

        let joined = running.handle.await;
        self.shared.set_inferring(false);
        self.shared.state.transition(ChannelState::Idle)?;

        match joined {
            Ok(parts) => {
                self.parts = Some(parts);
                info!(slot = self.slot(), iterations = self.shared.iteration(), "Channel stopped");
                Ok(())
            }
            Err(join) => {
                error!(slot = self.slot(), error = %join, "Inference cycle task lost; rebuilding its rings");
                let (rings, parts) = build_rings(&self.settings);
                {
                    let mut handover = self.shared.handover.lock();
                    handover.retired_rings = None;
                    handover.rings = Some(rings);
                }
                self.parts = Some(parts);
                self.shared.reset_epoch.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    /// Zero counters, empty both rings, clear the chain, archive and sustain
    ///
    /// Only valid while the inference cycle is stopped. The render-side part
    /// of the reset is applied at the start of the renderer's next block.
    pub fn reset_state(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(self.busy("stop the channel before resetting it"));
        }
        if let Some(parts) = self.parts.as_mut() {
            parts.reset();
        }
        self.shared.iteration.store(0, Ordering::Release);
        self.shared.set_failures(0);
        self.shared.set_phase(1);
        self.shared.set_status(BackendStatus::Connected);
        self.shared.trigless.store(false, Ordering::Release);
        self.shared.denoise_override.store(f32::NAN);
        self.shared.sustain.clear();
        self.shared.recall.clear();
        self.shared.archive.lock().clear();
        *self.shared.last_backend.lock() = None;
        if let Some(local) = &self.backends.local {
            local.reset();
        }
        self.shared.reset_epoch.fetch_add(1, Ordering::AcqRel);
        debug!(slot = self.slot(), "Channel state reset");
        Ok(())
    }

    /// Change the spectral frame size (idle only)
    ///
    /// The new chain is built here and handed to the renderer, which swaps it
    /// in at its next block.
    pub fn reconfigure(&mut self, frame_size: usize) -> Result<()> {
        if self.is_running() {
            return Err(self.busy("stop the channel before reconfiguring it"));
        }
        if frame_size == self.settings.frame_size {
            return Ok(());
        }
        let chain = SpectralChain::new(frame_size, self.settings.sample_rate as f32)?
            .with_seed(self.settings.seed ^ 0xC4A1)
            .with_probe(Arc::clone(&self.shared.features));
        {
            let mut handover = self.shared.handover.lock();
            handover.retired_chain = None;
            handover.chain = Some(chain);
        }
        self.settings.frame_size = frame_size;
        self.shared.reset_epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn set_prompt(&self, prompt: &str) {
        self.shared.params.set_prompt(prompt);
    }

    /// Skip the transform on the next cycle (step-lock "trigless")
    pub fn set_trigless(&self, trigless: bool) {
        self.shared.trigless.store(trigless, Ordering::Release);
    }

    /// Denoise strength for the next cycle only; `None` cancels a pending override
    pub fn set_denoise_override(&self, denoise: Option<f32>) {
        self.shared
            .denoise_override
            .store(denoise.filter(|d| d.is_finite()).unwrap_or(f32::NAN));
    }

    /// Load an archived iteration into the recall slot
    ///
    /// # Arguments
    /// * `index` - Archive position, 0 = oldest kept
    pub fn recall(&self, index: usize) -> Result<u64> {
        let archive = self.shared.archive.lock();
        let entry = archive.get(index).ok_or_else(|| ResonatorError::InvalidParameter {
            param: "archive index".to_string(),
            value: index.to_string(),
            expected: format!("0..{}", archive.len()),
        })?;
        self.shared.recall.store(&entry.samples);
        Ok(entry.iteration)
    }

    pub fn clear_recall(&self) {
        self.shared.recall.clear();
    }

    /// Copy of the archive, oldest first
    pub fn archive(&self) -> Vec<ArchiveEntry> {
        self.shared.archive.lock().iter().cloned().collect()
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            slot: self.slot(),
            session_id: self.session_id(),
            state: self.state(),
            iteration: self.shared.iteration(),
            phase: self.shared.phase.load(Ordering::Acquire),
            backend_status: self.shared.backend_status(),
            consecutive_failures: self.shared.failures.load(Ordering::Acquire),
            inferring: self.shared.inferring.load(Ordering::Acquire),
            last_backend: self.shared.last_backend.lock().clone(),
            archived: self.shared.archive.lock().len(),
            features: self.shared.features(),
        }
    }
}

impl Drop for FeedbackChannel {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.cancel.send(true);
        }
    }
}

impl std::fmt::Debug for FeedbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackChannel")
            .field("slot", &self.slot())
            .field("state", &self.state())
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::excitation::ExcitationMode;

    fn small_settings() -> ChannelSettings {
        ChannelSettings {
            sample_rate: 48_000,
            max_block: 256,
            frame_size: 512,
            capture_capacity: 8192,
            feedback_capacity: 8192,
            cycle_samples: 2048,
            archive_capacity: 4,
            cycle_yield: Duration::from_millis(1),
            backend_timeout: Duration::from_millis(500),
            max_consecutive_failures: 3,
            backoff: Duration::from_secs(30),
            seed: 42,
        }
    }

    fn build(params: ChannelParams) -> (FeedbackChannel, ChannelRenderer) {
        FeedbackChannel::new(0, small_settings(), params, "", ChannelBackends::passthrough()).unwrap()
    }

    #[test]
    fn test_idle_renders_silence() {
        let params = ChannelParams {
            excitation: ExcitationSettings {
                mode: ExcitationMode::Noise,
                ..ExcitationSettings::default()
            },
            ..ChannelParams::default()
        };
        let (_channel, mut renderer) = build(params);
        let mut out = vec![1.0; 512];
        renderer.render(&[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_underrun_without_fallback_is_silence() {
        let (channel, mut renderer) = build(ChannelParams::default());
        channel.shared.state.transition(ChannelState::Running).unwrap();

        let mut out = vec![1.0; 1000];
        for _ in 0..20 {
            renderer.render(&[], &mut out);
            assert!(out.iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_underrun_replays_sustain() {
        let params = ChannelParams {
            feedback_amount: 0.0,
            shaper_mix: 0.0,
            delay_mix: 0.0,
            ..ChannelParams::default()
        };
        let (channel, mut renderer) = build(params);
        channel.shared.state.transition(ChannelState::Running).unwrap();
        channel.shared.sustain.store(&[0.5; 300]);

        let mut energy = 0.0;
        let mut out = vec![0.0; 256];
        for _ in 0..10 {
            renderer.render(&[], &mut out);
            energy += out.iter().map(|s| s * s).sum::<f32>();
        }
        assert!(energy > 1.0);
    }

    #[test]
    fn test_recall_precedes_sustain() {
        let (channel, mut renderer) = build(ChannelParams::default());
        channel.shared.sustain.store(&[0.5; 64]);
        channel.shared.recall.store(&[-0.25; 64]);
        renderer.read_feedback(128);
        assert!(renderer.feedback_buf[..128].iter().all(|&s| s == -0.25));

        channel.clear_recall();
        renderer.read_feedback(128);
        assert!(renderer.feedback_buf[..128].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_render_writes_capture() {
        let params = ChannelParams {
            excitation: ExcitationSettings {
                mode: ExcitationMode::Noise,
                ..ExcitationSettings::default()
            },
            ..ChannelParams::default()
        };
        let (mut channel, mut renderer) = build(params);
        channel.shared.state.transition(ChannelState::Running).unwrap();

        let mut out = vec![0.0; 700];
        renderer.render(&[], &mut out);
        let parts = channel.parts.as_mut().unwrap();
        assert_eq!(parts.capture.available_to_read(), 700);
    }

    #[test]
    fn test_reset_state_is_applied_by_renderer() {
        let (mut channel, mut renderer) = build(ChannelParams::default());
        channel.parts.as_mut().unwrap().feedback.write(&[0.3; 500]);
        channel.shared.sustain.store(&[0.3; 100]);
        channel.shared.iteration.store(9, Ordering::Release);

        channel.reset_state().unwrap();
        assert_eq!(channel.status().iteration, 0);
        assert!(channel.shared.sustain.is_empty());

        channel.shared.state.transition(ChannelState::Running).unwrap();
        let mut out = vec![1.0; 256];
        renderer.render(&[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(renderer.feedback.available_to_read(), 0);
    }

    #[test]
    fn test_reconfigure_swaps_chain() {
        let (mut channel, mut renderer) = build(ChannelParams::default());
        channel.reconfigure(2048).unwrap();
        assert_eq!(channel.settings().frame_size, 2048);
        assert!(channel.reconfigure(1000).is_err());

        let mut out = vec![0.0; 64];
        renderer.render(&[], &mut out);
        assert_eq!(renderer.chain.frame_size(), 2048);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lost_cycle_task_leaves_channel_restartable() {
        let params = ChannelParams {
            excitation: ExcitationSettings {
                mode: ExcitationMode::Noise,
                ..ExcitationSettings::default()
            },
            ..ChannelParams::default()
        };
        let (mut channel, mut renderer) = build(params);

        channel.start().unwrap();
        channel.running.as_ref().unwrap().handle.abort();
        channel.stop().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.parts.is_some());

        // The cycle only makes progress if the renderer picked up the new rings
        channel.start().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut out = vec![0.0; 256];
        while std::time::Instant::now() < deadline && channel.status().iteration == 0 {
            renderer.render(&[], &mut out);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        channel.stop().await.unwrap();
        assert!(channel.status().iteration >= 1);
    }

    #[test]
    fn test_recall_out_of_range() {
        let (channel, _renderer) = build(ChannelParams::default());
        let err = channel.recall(0).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_denoise_override_is_one_shot() {
        let (channel, _renderer) = build(ChannelParams::default());
        channel.set_denoise_override(Some(0.0));
        assert_eq!(channel.shared.take_denoise_override(), Some(0.0));
        assert_eq!(channel.shared.take_denoise_override(), None);

        channel.set_trigless(true);
        assert!(channel.shared.take_trigless());
        assert!(!channel.shared.take_trigless());
    }

    #[test]
    fn test_start_requires_runtime() {
        let (mut channel, _renderer) = build(ChannelParams::default());
        let err = channel.start().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_start_rejects_missing_backend() {
        let (mut channel, _renderer) = FeedbackChannel::new(
            0,
            small_settings(),
            ChannelParams::default(),
            "",
            ChannelBackends::default(),
        )
        .unwrap();
        let err = channel.start().unwrap_err();
        assert_eq!(err.error_code(), "MISSING_BACKEND");
    }
}
