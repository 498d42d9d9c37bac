//! Music player: plays every MP3 in a directory through the streaming decode engine.
//!
//! Controls are read from stdin (see `controls`); the volume is saved on exit.

use anyhow::Result;
use clap::Parser;
use music_player::{cli, config::PlayerConfig, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,stream_engine=info,music_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    runtime::run(PlayerConfig::from_args(&args), true)
}
