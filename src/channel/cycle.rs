//! Async inference cycle
//!
//! One tokio task per running channel. Each pass waits for captured audio,
//! snapshots the parameters, perturbs the capture, runs it through the first
//! backend that produces something (remote → local → passthrough) and hands
//! the result back to the render path through the feedback ring and the
//! sustain block. Cycles of one channel never overlap; no lock is held across
//! a backend call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::archive::ArchiveEntry;
use super::breaker::CircuitBreaker;
use super::channel::{BackendStatus, ChannelSettings, ChannelShared};
use super::drift::AutoDrift;
use super::phase::detect_phase;
use crate::dsp::rng::NoiseRng;
use crate::engine::ring_buffer::{Consumer, Producer};
use crate::error::{ResonatorError, Result};
use crate::neural::backend::{PassthroughBackend, TransformBackend, TransformParams};

/// Standard deviation of the pre-transform perturbation per unit of entropy
pub const PERTURBATION_SCALE: f32 = 0.08;

/// Backends a channel may call, in priority order
#[derive(Clone, Default)]
pub struct ChannelBackends {
    /// Shared across channels; gated by the circuit breaker
    pub remote: Option<Arc<dyn TransformBackend>>,
    /// Channel-scoped; never shared
    pub local: Option<Arc<dyn TransformBackend>>,
    pub allow_passthrough: bool,
}

impl ChannelBackends {
    pub fn passthrough() -> Self {
        Self {
            remote: None,
            local: None,
            allow_passthrough: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.is_none() && self.local.is_none() && !self.allow_passthrough {
            return Err(ResonatorError::MissingBackend {
                reason: "no remote, no local and passthrough disallowed".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBackends")
            .field("remote", &self.remote.as_ref().map(|b| b.name().to_string()))
            .field("local", &self.local.as_ref().map(|b| b.name().to_string()))
            .field("allow_passthrough", &self.allow_passthrough)
            .finish()
    }
}

/// Async-side state that survives between runs of the cycle
///
/// Handed to the task on start and returned when it stops, so a stopped
/// channel owns both of its async-side ring ends again.
pub(crate) struct CycleParts {
    pub capture: Consumer<f32>,
    pub feedback: Producer<f32>,
    pub breaker: CircuitBreaker,
    pub drift: AutoDrift,
    pub rng: NoiseRng,
    pub capture_buf: Vec<f32>,
}

impl CycleParts {
    pub fn reset(&mut self) {
        self.capture.reset();
        self.breaker.reset();
        self.drift.reset();
    }
}

/// Add Gaussian noise with σ = entropy × [`PERTURBATION_SCALE`]
pub fn perturb(samples: &mut [f32], entropy: f32, rng: &mut NoiseRng) {
    let sigma = entropy.clamp(0.0, 1.0) * PERTURBATION_SCALE;
    if sigma <= 0.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample += rng.gaussian() * sigma;
    }
}

struct Produced {
    samples: Vec<f32>,
    backend: String,
}

pub(crate) struct InferenceCycle {
    shared: Arc<ChannelShared>,
    parts: CycleParts,
    backends: ChannelBackends,
    settings: ChannelSettings,
}

impl InferenceCycle {
    pub fn new(
        shared: Arc<ChannelShared>,
        parts: CycleParts,
        backends: ChannelBackends,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            shared,
            parts,
            backends,
            settings,
        }
    }

    /// Loop until cancelled, then give the async-side parts back
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> CycleParts {
        let slot = self.shared.slot();
        info!(slot, "Inference cycle started");

        loop {
            if *cancel.borrow() {
                break;
            }
            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(self.settings.cycle_yield) => {}
            }
            if self.parts.capture.available_to_read() < self.settings.max_block {
                continue;
            }
            tokio::select! {
                _ = cancel.changed() => break,
                _ = self.run_once() => {}
            }
        }

        self.shared.set_inferring(false);
        info!(slot, iterations = self.shared.iteration(), "Inference cycle stopped");
        self.parts
    }

    async fn run_once(&mut self) {
        let started = Instant::now();
        let slot = self.shared.slot();
        let snapshot = self.shared.params().snapshot();

        let wanted = self.settings.cycle_samples.min(self.parts.capture_buf.len());
        let count = self.parts.capture.read(&mut self.parts.capture_buf, wanted);
        let mut input = self.parts.capture_buf[..count].to_vec();

        self.shared.set_inferring(true);
        let trigless = self.shared.take_trigless();
        let denoise_override = self.shared.take_denoise_override();

        // Trigless: the capture goes straight back, with no phase, archive or drift
        if trigless {
            let iteration = self.shared.advance_iteration();
            self.shared.set_last_backend("trigless");
            self.parts.feedback.write(&input);
            self.shared.sustain().store(&input);
            self.shared.set_inferring(false);
            debug!(slot, iteration, samples = input.len(), "Trigless cycle");
            return;
        }

        perturb(&mut input, snapshot.params.entropy, &mut self.parts.rng);
        let mut params = snapshot.params.transform(&snapshot.prompt);
        if let Some(denoise) = denoise_override {
            params.denoise = denoise.clamp(0.0, 1.0);
        }
        let produced = self.transform(input, params).await;

        let Some(produced) = produced else {
            self.shared.set_status(BackendStatus::Unavailable);
            self.shared.set_inferring(false);
            warn!(slot, "No backend produced output; replaying sustain");
            return;
        };

        // Count the cycle before its audio becomes audible
        let iteration = self.shared.advance_iteration();
        let phase = detect_phase(iteration, &self.shared.features());
        self.shared.set_phase(phase);
        self.shared.set_last_backend(&produced.backend);

        self.parts.feedback.write(&produced.samples);
        self.shared.sustain().store(&produced.samples);
        self.shared.archive_push(ArchiveEntry {
            iteration,
            backend: produced.backend.clone(),
            phase,
            created_at: Utc::now(),
            samples: produced.samples,
        });

        let writes = self.parts.drift.step(&snapshot.params);
        if !writes.is_empty() {
            self.shared.params().update(|p| {
                for &(name, value) in &writes {
                    // Names come from the drift table, which only holds known fields
                    let _ = p.set_named(name, value);
                }
            });
        }

        self.shared.set_inferring(false);
        debug!(
            slot,
            iteration,
            backend = %produced.backend,
            duration_ms = started.elapsed().as_millis() as u64,
            failures = self.parts.breaker.consecutive_failures(),
            phase,
            "Cycle complete"
        );
    }

    /// Remote → local → passthrough; first non-empty result wins
    async fn transform(&mut self, input: Vec<f32>, params: TransformParams) -> Option<Produced> {
        let slot = self.shared.slot();
        let input = Arc::new(input);
        let params = Arc::new(params);

        if let Some(remote) = self.backends.remote.clone() {
            if params.denoise <= 0.0 {
                self.shared.set_status(BackendStatus::Connected);
                return Some(Produced {
                    samples: input.to_vec(),
                    backend: "identity".to_string(),
                });
            }

            let failures_before = self.parts.breaker.consecutive_failures();
            let allowed = self.parts.breaker.allow(Instant::now());
            let failures = self.parts.breaker.consecutive_failures();
            if failures != failures_before {
                self.shared.set_failures(failures);
                info!(slot, "Backoff elapsed; resuming remote backend");
            }

            if allowed {
                let result = self.call(Arc::clone(&remote), &input, &params).await;
                match result {
                    Ok(samples) if !samples.is_empty() => {
                        self.parts.breaker.record_success();
                        self.shared.set_failures(0);
                        self.shared.set_status(BackendStatus::Connected);
                        return Some(Produced {
                            samples,
                            backend: remote.name().to_string(),
                        });
                    }
                    Ok(_) => {
                        let err = ResonatorError::BackendFailure {
                            backend: remote.name().to_string(),
                            reason: "empty result".to_string(),
                        };
                        self.record_remote_failure(&err);
                    }
                    Err(err) if err.is_backend_failure() => self.record_remote_failure(&err),
                    Err(err) => warn!(slot, error = %err, "Remote backend error"),
                }
            } else {
                debug!(slot, "Remote backend suspended");
            }
        }

        let degraded = if self.backends.remote.is_some() {
            BackendStatus::Degraded
        } else {
            BackendStatus::Connected
        };

        if let Some(local) = self.backends.local.clone() {
            match self.call(Arc::clone(&local), &input, &params).await {
                Ok(samples) if !samples.is_empty() => {
                    self.shared.set_status(degraded);
                    return Some(Produced {
                        samples,
                        backend: local.name().to_string(),
                    });
                }
                Ok(_) => warn!(slot, backend = local.name(), "Local backend returned nothing"),
                Err(err) => warn!(slot, backend = local.name(), error = %err, "Local backend failed"),
            }
        }

        if self.backends.allow_passthrough && !input.is_empty() {
            let passthrough = PassthroughBackend;
            match passthrough.infer(&input, self.settings.sample_rate, &params) {
                Ok(samples) => {
                    self.shared.set_status(BackendStatus::Degraded);
                    return Some(Produced {
                        samples,
                        backend: passthrough.name().to_string(),
                    });
                }
                Err(err) => warn!(slot, error = %err, "Passthrough failed"),
            }
        }
        None
    }

    fn record_remote_failure(&mut self, err: &ResonatorError) {
        let slot = self.shared.slot();
        let opened = self.parts.breaker.record_failure(Instant::now());
        let failures = self.parts.breaker.consecutive_failures();
        self.shared.set_failures(failures);
        self.shared.set_status(BackendStatus::Degraded);
        warn!(slot, failures, error = %err, "Remote backend failed");
        if opened {
            info!(
                slot,
                failures,
                backoff_ms = self.settings.backoff.as_millis() as u64,
                "Circuit breaker open; suspending remote backend"
            );
        }
    }

    /// Run one backend call on the blocking pool with a bounded wait
    async fn call(
        &self,
        backend: Arc<dyn TransformBackend>,
        input: &Arc<Vec<f32>>,
        params: &Arc<TransformParams>,
    ) -> Result<Vec<f32>> {
        let name = backend.name().to_string();
        let samples = Arc::clone(input);
        let params = Arc::clone(params);
        let sample_rate = self.settings.sample_rate;
        let timeout = self.settings.backend_timeout;

        let task = tokio::task::spawn_blocking(move || backend.infer(&samples, sample_rate, &params));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ResonatorError::BackendFailure {
                backend: name,
                reason: format!("backend task aborted: {}", join),
            }),
            Err(_) => Err(ResonatorError::BackendTimeout {
                backend: name,
                timeout_ms: duration_ms(timeout),
            }),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perturb_zero_entropy_is_identity() {
        let mut rng = NoiseRng::new(7);
        let mut samples = vec![0.25; 64];
        perturb(&mut samples, 0.0, &mut rng);
        assert!(samples.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_perturb_scale() {
        let mut rng = NoiseRng::new(7);
        let mut samples = vec![0.0; 48_000];
        perturb(&mut samples, 1.0, &mut rng);
        let var = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let sigma = var.sqrt();
        assert!((sigma - PERTURBATION_SCALE).abs() < 0.01, "sigma {}", sigma);
    }

    #[test]
    fn test_backends_validate() {
        assert!(ChannelBackends::passthrough().validate().is_ok());
        let err = ChannelBackends::default().validate().unwrap_err();
        assert_eq!(err.error_code(), "MISSING_BACKEND");
    }
}
