//! CLI Module
//!
//! Command-line interface for the resonator engine.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Latent Resonator - recursive audio-feedback engine
#[derive(Parser, Debug)]
#[command(name = "resonator-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Which backend serves the channels during a render
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// ACE-Step bridge, falling back to local DSP
    Remote,
    /// Local spectral backend only
    Local,
    /// Scripted in-process mock (gain 0.9)
    Mock,
    /// Identity
    Passthrough,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render channels to a WAV file
    #[command(name = "render")]
    Render {
        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Input audio for live excitation (looped)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Length of the render in seconds
        #[arg(short, long, default_value_t = 20.0)]
        seconds: f32,

        /// Number of channels to activate
        #[arg(long, default_value_t = 1)]
        channels: usize,

        /// Semantic prompt, e.g. "metallic drone"
        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(short, long, value_enum, default_value_t = BackendChoice::Local)]
        backend: BackendChoice,

        /// euclidean | noise | oscillator | live | silence
        #[arg(short, long, default_value = "euclidean")]
        excitation: String,

        /// Parameter override, repeatable (e.g. --set entropy=0.6)
        #[arg(long = "set", value_parser = parse_assignment)]
        sets: Vec<(String, f32)>,

        /// Pace rendering at real time instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Spectral frame size (512, 1024, 2048)
        #[arg(long)]
        frame_size: Option<usize>,

        /// Noise seed for reproducible renders
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Probe the ACE-Step bridge
    #[command(name = "health")]
    Health {
        /// Bridge base URL (defaults to config / RESONATOR_BRIDGE_URL)
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Run a WAV file through the spectral chain and print its features
    #[command(name = "analyze")]
    Analyze {
        /// Input WAV path
        input: PathBuf,

        /// Spectral frame size (512, 1024, 2048)
        #[arg(long, default_value_t = 1024)]
        frame_size: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Parse `name=value`
pub fn parse_assignment(s: &str) -> std::result::Result<(String, f32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let value: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("entropy=0.5").unwrap(), ("entropy".to_string(), 0.5));
        assert_eq!(parse_assignment(" bpm = 90 ").unwrap(), ("bpm".to_string(), 90.0));
        assert!(parse_assignment("entropy").is_err());
        assert!(parse_assignment("entropy=lots").is_err());
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from([
            "resonator-cli",
            "render",
            "-o",
            "out.wav",
            "--backend",
            "mock",
            "--set",
            "entropy=0.4",
            "--set",
            "granularity=0.2",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Render { backend, sets, .. }) => {
                assert_eq!(backend, BackendChoice::Mock);
                assert_eq!(sets.len(), 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_analyze() {
        let cli = Cli::try_parse_from(["resonator-cli", "-v", "analyze", "in.wav", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Analyze { json: true, .. })));
    }
}
