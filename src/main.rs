//! Latent Resonator CLI
//!
//! Command-line interface for the recursive audio-feedback engine.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use latent_resonator::cli::commands::{self, RenderOptions};
use latent_resonator::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Latent Resonator v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Some(Commands::Render {
            output,
            input,
            seconds,
            channels,
            prompt,
            backend,
            excitation,
            sets,
            realtime,
            frame_size,
            seed,
        }) => {
            let options = RenderOptions {
                output,
                input,
                seconds,
                channels,
                prompt,
                backend,
                excitation,
                sets,
                realtime,
                frame_size,
                seed,
            };
            commands::render(config, &options).await.context("render failed")?;
        }
        Some(Commands::Health { url }) => {
            let health = commands::health(&config, url).await.context("bridge health check failed")?;
            if !health.is_ok() {
                anyhow::bail!("bridge reports status '{}'", health.status);
            }
        }
        Some(Commands::Analyze {
            input,
            frame_size,
            json,
        }) => {
            let report = commands::analyze(&input, frame_size)
                .with_context(|| format!("failed to analyze {}", input.display()))?;
            commands::print_analysis(&report, json)?;
        }
        None => {
            println!("Latent Resonator v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
        }
    }
    Ok(())
}
