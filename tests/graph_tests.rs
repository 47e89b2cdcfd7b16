//! Integration tests for the channel pool and mix bus

use std::sync::Arc;
use std::time::{Duration, Instant};

use latent_resonator::channel::BackendStatus;
use latent_resonator::dsp::{ExcitationMode, ExcitationSettings};
use latent_resonator::engine::ChannelState;
use latent_resonator::neural::{MockBackend, TransformBackend};
use latent_resonator::{
    BackendConfig, ChannelConfig, ChannelGraph, ChannelParams, EngineConfig, GraphRenderer,
    ResonatorError,
};

fn engine_config(max_channels: usize) -> EngineConfig {
    EngineConfig {
        sample_rate: 48000,
        block_size: 256,
        max_channels,
        master_volume: 1.0,
        channel: channel_config(),
        backend: BackendConfig {
            timeout_ms: 500,
            ..BackendConfig::default()
        },
    }
}

fn channel_config() -> ChannelConfig {
    ChannelConfig {
        frame_size: 512,
        capture_seconds: 0.5,
        feedback_seconds: 0.5,
        cycle_seconds: 0.05,
        archive_capacity: 4,
        cycle_yield_ms: 1,
        volume: 0.8,
        prompt: "glass bells".to_string(),
        params: ChannelParams {
            excitation: ExcitationSettings {
                mode: ExcitationMode::Noise,
                level: 0.5,
                ..ExcitationSettings::default()
            },
            ..ChannelParams::default()
        },
        seed: Some(11),
    }
}

fn mock_graph(max_channels: usize) -> (ChannelGraph, GraphRenderer, Arc<MockBackend>) {
    let remote = Arc::new(MockBackend::new("remote").with_gain(0.9));
    let (graph, renderer) = ChannelGraph::new(
        engine_config(max_channels),
        Some(Arc::clone(&remote) as Arc<dyn TransformBackend>),
    )
    .unwrap();
    (graph, renderer, remote)
}

async fn pump_until<F>(graph: &ChannelGraph, renderer: &mut GraphRenderer, done: F) -> bool
where
    F: Fn(&ChannelGraph) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = vec![0.0; 256];
    while Instant::now() < deadline {
        renderer.render_mono(&[], &mut out);
        if done(graph) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_acquire_and_release() {
    let (mut graph, _renderer, _remote) = mock_graph(2);
    let config = channel_config();

    assert_eq!(graph.acquire(&config).unwrap(), 0);
    assert_eq!(graph.acquire(&config).unwrap(), 1);
    let err = graph.acquire(&config).unwrap_err();
    assert!(matches!(err, ResonatorError::NoFreeSlot { pool_size: 2 }));
    assert_eq!(err.error_code(), "NO_FREE_SLOT");

    assert!(matches!(
        graph.activate(1, &config),
        Err(ResonatorError::ChannelBusy { slot: 1, .. })
    ));

    graph.deactivate(0).await.unwrap();
    assert!(!graph.is_active(0));
    assert_eq!(graph.gain(0), 0.0);
    assert_eq!(graph.channel(0).unwrap().state(), ChannelState::Idle);
    assert_eq!(graph.active_slots(), vec![1]);

    // The freed slot is handed out again
    assert_eq!(graph.acquire(&config).unwrap(), 0);
    graph.shutdown().await;
    assert!(graph.statuses().is_empty());
    for slot in 0..graph.pool_size() {
        assert_eq!(graph.status(slot).unwrap().state, ChannelState::Idle);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_activation_rejects_bad_channel_config() {
    let (mut graph, _renderer, _remote) = mock_graph(1);
    let config = ChannelConfig {
        frame_size: 1000,
        ..channel_config()
    };
    assert!(graph.activate(0, &config).is_err());
    assert!(!graph.is_active(0));
    assert!(matches!(
        graph.activate(3, &channel_config()),
        Err(ResonatorError::SlotOutOfRange { slot: 3, pool_size: 1 })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_active_channel_reaches_output() {
    let (mut graph, mut renderer, remote) = mock_graph(2);
    let slot = graph.acquire(&channel_config()).unwrap();

    let watched = Arc::clone(&remote);
    assert!(pump_until(&graph, &mut renderer, move |_| watched.calls() >= 2).await);

    let mut left = vec![0.0; 512];
    let mut right = vec![0.0; 512];
    renderer.render(&[], &mut [&mut left[..], &mut right[..]]);
    assert!(left.iter().any(|&s| s != 0.0));
    assert_eq!(left, right);
    assert!(left.iter().all(|s| s.is_finite()));

    let status = graph.status(slot).unwrap();
    assert_eq!(status.state, ChannelState::Running);
    assert_eq!(status.backend_status, BackendStatus::Connected);
    assert!(status.session_id.is_some());

    graph.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mute_and_solo_shape_the_mix() {
    let (mut graph, mut renderer, _remote) = mock_graph(2);
    let config = channel_config();
    graph.acquire(&config).unwrap();
    graph.acquire(&config).unwrap();

    graph.set_solo(1, true).unwrap();
    assert_eq!(graph.gain(0), 0.0);
    assert!(graph.gain(1) > 0.0);

    graph.set_mute(1, true).unwrap();
    assert_eq!(graph.gain(1), 0.0);

    // Muted channels keep cycling
    let before = graph.status(1).unwrap().iteration;
    assert!(pump_until(&graph, &mut renderer, |g| g.status(1).unwrap().iteration > before).await);

    let mut out = vec![1.0; 256];
    renderer.render_mono(&[], &mut out);
    assert!(out.iter().all(|&s| s == 0.0));

    graph.set_master_volume(f32::NAN);
    assert_eq!(graph.master_volume(), 0.0);
    graph.shutdown().await;
}

#[test]
fn test_missing_backend_rejected_at_build() {
    let mut config = engine_config(1);
    config.backend = BackendConfig {
        remote_url: None,
        local_enabled: false,
        allow_passthrough: false,
        ..BackendConfig::default()
    };
    let err = ChannelGraph::new(config, None).err().unwrap();
    assert_eq!(err.error_code(), "MISSING_BACKEND");
}
