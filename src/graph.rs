//! Channel graph
//!
//! A fixed pool of channel slots wired to a master bus once, at construction.
//! Adding a channel activates a pooled slot; removing one stops, mutes and
//! resets it. Mute and solo only change per-slot gains:
//!
//! `gain = 0 if muted else (volume if (!any_soloed || soloed) else 0)`
//!
//! [`ChannelGraph`] is the control side; [`GraphRenderer`] goes to the audio
//! thread and reads the gains lock-free.

use std::sync::Arc;

use tracing::{info, warn};

use crate::channel::channel::{ChannelRenderer, ChannelSettings, ChannelStatus, FeedbackChannel};
use crate::channel::cycle::ChannelBackends;
use crate::config::{ChannelConfig, EngineConfig};
use crate::engine::shared::AtomicF32;
use crate::error::{ResonatorError, Result};
use crate::neural::backend::TransformBackend;
use crate::neural::bridge::BridgeBackend;
use crate::neural::local::LocalSpectralBackend;

/// Control-side mix state of one slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotMix {
    pub active: bool,
    pub muted: bool,
    pub soloed: bool,
    pub volume: f32,
}

impl Default for SlotMix {
    fn default() -> Self {
        Self {
            active: false,
            muted: true,
            soloed: false,
            volume: 0.0,
        }
    }
}

/// Output gain of one slot given whether any slot is soloed
pub fn slot_gain(mix: &SlotMix, any_soloed: bool) -> f32 {
    if !mix.active || mix.muted {
        0.0
    } else if !any_soloed || mix.soloed {
        mix.volume.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Gains read by the renderer
#[derive(Debug)]
struct MixBus {
    gains: Vec<AtomicF32>,
    master: AtomicF32,
}

/// Control side of the graph
pub struct ChannelGraph {
    config: EngineConfig,
    remote: Option<Arc<dyn TransformBackend>>,
    channels: Vec<FeedbackChannel>,
    mix: Vec<SlotMix>,
    bus: Arc<MixBus>,
}

/// Audio-thread side of the graph
pub struct GraphRenderer {
    channels: Vec<ChannelRenderer>,
    bus: Arc<MixBus>,
    channel_buf: Vec<f32>,
    master_buf: Vec<f32>,
}

impl ChannelGraph {
    /// Build the slot pool and the renderer that mixes it
    ///
    /// # Arguments
    /// * `config` - Validated before anything is allocated
    /// * `remote` - Shared remote backend, or `None` for local/passthrough only
    pub fn new(
        config: EngineConfig,
        remote: Option<Arc<dyn TransformBackend>>,
    ) -> Result<(Self, GraphRenderer)> {
        config.validate()?;

        let mut channels = Vec::with_capacity(config.max_channels);
        let mut renderers = Vec::with_capacity(config.max_channels);
        for slot in 0..config.max_channels {
            let mut settings = ChannelSettings::from_config(&config, &config.channel);
            settings.seed = settings
                .seed
                .wrapping_add((slot as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let (channel, renderer) = FeedbackChannel::new(
                slot,
                settings,
                config.channel.params,
                &config.channel.prompt,
                ChannelBackends::passthrough(),
            )?;
            channels.push(channel);
            renderers.push(renderer);
        }

        let bus = Arc::new(MixBus {
            gains: (0..config.max_channels).map(|_| AtomicF32::new(0.0)).collect(),
            master: AtomicF32::new(config.master_volume.clamp(0.0, 1.0)),
        });
        let graph = Self {
            mix: vec![SlotMix::default(); config.max_channels],
            remote,
            channels,
            bus: Arc::clone(&bus),
            config: config.clone(),
        };
        let renderer = GraphRenderer {
            channels: renderers,
            bus,
            channel_buf: vec![0.0; config.block_size],
            master_buf: vec![0.0; config.block_size],
        };
        info!(pool = config.max_channels, sample_rate = config.sample_rate, "Channel graph built");
        Ok((graph, renderer))
    }

    /// Build with the remote bridge named in `config.backend.remote_url`
    pub fn from_config(config: EngineConfig) -> Result<(Self, GraphRenderer)> {
        let remote = config.backend.remote_url.as_ref().map(|url| {
            Arc::new(BridgeBackend::new(url.clone(), config.backend.timeout_ms))
                as Arc<dyn TransformBackend>
        });
        Self::new(config, remote)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.channels.len()
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.channels.len() {
            return Err(ResonatorError::SlotOutOfRange {
                slot,
                pool_size: self.channels.len(),
            });
        }
        Ok(())
    }

    pub fn channel(&self, slot: usize) -> Result<&FeedbackChannel> {
        self.check_slot(slot)?;
        Ok(&self.channels[slot])
    }

    pub fn channel_mut(&mut self, slot: usize) -> Result<&mut FeedbackChannel> {
        self.check_slot(slot)?;
        Ok(&mut self.channels[slot])
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.mix.get(slot).map(|m| m.active).unwrap_or(false)
    }

    pub fn active_slots(&self) -> Vec<usize> {
        (0..self.mix.len()).filter(|&s| self.mix[s].active).collect()
    }

    fn backends_for(&self, channel: &ChannelConfig) -> Result<ChannelBackends> {
        let backend = &self.config.backend;
        let local = if backend.local_enabled {
            let local = LocalSpectralBackend::new(channel.frame_size, self.config.sample_rate as f32)?;
            Some(Arc::new(local) as Arc<dyn TransformBackend>)
        } else {
            None
        };
        let backends = ChannelBackends {
            remote: self.remote.clone(),
            local,
            allow_passthrough: backend.allow_passthrough,
        };
        backends.validate()?;
        Ok(backends)
    }

    /// Configure a pooled slot and start it, unmuted
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&mut self, slot: usize, config: &ChannelConfig) -> Result<()> {
        self.check_slot(slot)?;
        config.validate(self.config.sample_rate, self.config.block_size)?;
        if self.mix[slot].active || self.channels[slot].is_running() {
            return Err(ResonatorError::ChannelBusy {
                slot,
                reason: "slot is already active".to_string(),
            });
        }
        let backends = self.backends_for(config)?;

        let channel = &mut self.channels[slot];
        channel.reconfigure(config.frame_size)?;
        channel.set_backends(backends)?;
        channel.params().replace(config.params);
        channel.set_prompt(&config.prompt);
        channel.reset_state()?;
        channel.start()?;

        self.mix[slot] = SlotMix {
            active: true,
            muted: false,
            soloed: false,
            volume: config.volume,
        };
        self.recompute_gains();
        info!(slot, prompt = %config.prompt, "Channel activated");
        Ok(())
    }

    /// Activate the first free slot
    pub fn acquire(&mut self, config: &ChannelConfig) -> Result<usize> {
        let slot = self
            .mix
            .iter()
            .position(|m| !m.active)
            .ok_or(ResonatorError::NoFreeSlot {
                pool_size: self.channels.len(),
            })?;
        self.activate(slot, config)?;
        Ok(slot)
    }

    /// Stop a slot's cycle, mute it, reset it and return it to the pool
    pub async fn deactivate(&mut self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        self.channels[slot].stop().await?;
        self.mix[slot] = SlotMix::default();
        self.recompute_gains();
        self.channels[slot].reset_state()?;
        info!(slot, "Channel deactivated");
        Ok(())
    }

    pub fn set_mute(&mut self, slot: usize, muted: bool) -> Result<()> {
        self.check_slot(slot)?;
        self.mix[slot].muted = muted;
        self.recompute_gains();
        Ok(())
    }

    pub fn set_solo(&mut self, slot: usize, soloed: bool) -> Result<()> {
        self.check_slot(slot)?;
        self.mix[slot].soloed = soloed;
        self.recompute_gains();
        Ok(())
    }

    pub fn set_volume(&mut self, slot: usize, volume: f32) -> Result<()> {
        self.check_slot(slot)?;
        self.mix[slot].volume = if volume.is_finite() { volume } else { 0.0 };
        self.recompute_gains();
        Ok(())
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        self.bus.master.store(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.bus.master.load()
    }

    pub fn mix(&self, slot: usize) -> Option<SlotMix> {
        self.mix.get(slot).copied()
    }

    /// Effective output gain of a slot
    pub fn gain(&self, slot: usize) -> f32 {
        self.bus.gains.get(slot).map(AtomicF32::load).unwrap_or(0.0)
    }

    fn recompute_gains(&self) {
        let any_soloed = self.mix.iter().any(|m| m.active && m.soloed);
        for (gain, mix) in self.bus.gains.iter().zip(&self.mix) {
            gain.store(slot_gain(mix, any_soloed));
        }
    }

    pub fn status(&self, slot: usize) -> Result<ChannelStatus> {
        Ok(self.channel(slot)?.status())
    }

    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.active_slots()
            .into_iter()
            .map(|slot| self.channels[slot].status())
            .collect()
    }

    /// Stop every cycle, then silence the bus
    ///
    /// The renderer can be dropped once this returns.
    pub async fn shutdown(&mut self) {
        for channel in self.channels.iter_mut() {
            if let Err(err) = channel.stop().await {
                warn!(slot = channel.slot(), error = %err, "Channel did not stop cleanly");
            }
        }
        for mix in self.mix.iter_mut() {
            *mix = SlotMix::default();
        }
        self.recompute_gains();
        self.bus.master.store(0.0);
        info!("Channel graph shut down");
    }
}

impl GraphRenderer {
    pub fn pool_size(&self) -> usize {
        self.channels.len()
    }

    /// Render one host block
    ///
    /// Every channel renders (muted ones keep evolving); the gained mono mix is
    /// written to every output channel. Non-finite samples become silence.
    ///
    /// # Arguments
    /// * `input` - Host input (mono), may be empty
    /// * `outputs` - Host output channels; the shortest sets the block length
    pub fn render(&mut self, input: &[f32], outputs: &mut [&mut [f32]]) {
        let frames = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
        let max_block = self.master_buf.len();
        let master = self.bus.master.load();

        let mut offset = 0;
        while offset < frames {
            let len = (frames - offset).min(max_block);
            let input_chunk = input.get(offset..).unwrap_or(&[]);
            let input_chunk = &input_chunk[..input_chunk.len().min(len)];

            let mix = &mut self.master_buf[..len];
            mix.iter_mut().for_each(|s| *s = 0.0);
            for (renderer, gain) in self.channels.iter_mut().zip(&self.bus.gains) {
                let out = &mut self.channel_buf[..len];
                renderer.render(input_chunk, out);
                let gain = gain.load();
                if gain > 0.0 {
                    for (m, &s) in mix.iter_mut().zip(out.iter()) {
                        *m += s * gain;
                    }
                }
            }
            for sample in mix.iter_mut() {
                let value = *sample * master;
                *sample = if value.is_finite() { value } else { 0.0 };
            }
            for output in outputs.iter_mut() {
                output[offset..offset + len].copy_from_slice(mix);
            }
            offset += len;
        }
    }

    /// Render into a single mono buffer
    pub fn render_mono(&mut self, input: &[f32], out: &mut [f32]) {
        self.render(input, &mut [out]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix(active: bool, muted: bool, soloed: bool, volume: f32) -> SlotMix {
        SlotMix {
            active,
            muted,
            soloed,
            volume,
        }
    }

    #[test]
    fn test_gain_rules() {
        assert_eq!(slot_gain(&mix(true, false, false, 0.7), false), 0.7);
        assert_eq!(slot_gain(&mix(true, true, false, 0.7), false), 0.0);
        assert_eq!(slot_gain(&mix(true, false, false, 0.7), true), 0.0);
        assert_eq!(slot_gain(&mix(true, false, true, 0.7), true), 0.7);
        assert_eq!(slot_gain(&mix(true, true, true, 0.7), true), 0.0);
        assert_eq!(slot_gain(&mix(false, false, false, 0.7), false), 0.0);
    }

    fn small_config(pool: usize) -> EngineConfig {
        let mut config = EngineConfig {
            max_channels: pool,
            block_size: 256,
            ..EngineConfig::default()
        };
        config.channel.frame_size = 512;
        config.channel.capture_seconds = 1.0;
        config.channel.feedback_seconds = 1.0;
        config.channel.cycle_seconds = 0.5;
        config
    }

    #[test]
    fn test_new_validates_config() {
        let mut config = small_config(2);
        config.channel.frame_size = 1000;
        assert!(ChannelGraph::new(config, None).is_err());
    }

    #[test]
    fn test_solo_mutes_others() {
        let (mut graph, _renderer) = ChannelGraph::new(small_config(3), None).unwrap();
        for slot in 0..3 {
            graph.mix[slot] = mix(true, false, false, 0.5);
        }
        graph.recompute_gains();
        assert_eq!(graph.gain(1), 0.5);

        graph.set_solo(2, true).unwrap();
        assert_eq!(graph.gain(0), 0.0);
        assert_eq!(graph.gain(1), 0.0);
        assert_eq!(graph.gain(2), 0.5);

        graph.set_mute(2, true).unwrap();
        assert_eq!(graph.gain(2), 0.0);

        graph.set_solo(2, false).unwrap();
        assert_eq!(graph.gain(0), 0.5);
    }

    #[test]
    fn test_slot_range() {
        let (mut graph, _renderer) = ChannelGraph::new(small_config(2), None).unwrap();
        let err = graph.set_mute(5, true).unwrap_err();
        assert_eq!(err.error_code(), "SLOT_OUT_OF_RANGE");
        assert!(graph.channel(1).is_ok());
    }

    #[test]
    fn test_idle_graph_renders_silence_to_every_output() {
        let (_graph, mut renderer) = ChannelGraph::new(small_config(2), None).unwrap();
        let mut left = vec![1.0; 600];
        let mut right = vec![1.0; 600];
        renderer.render(&[], &mut [&mut left, &mut right]);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_master_volume_clamped() {
        let (mut graph, _renderer) = ChannelGraph::new(small_config(1), None).unwrap();
        graph.set_master_volume(3.0);
        assert_eq!(graph.master_volume(), 1.0);
        graph.set_master_volume(f32::NAN);
        assert_eq!(graph.master_volume(), 0.0);
    }
}
