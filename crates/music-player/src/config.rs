use std::path::PathBuf;

use stream_engine::EngineConfig;

use crate::cli::Args;

const DEFAULT_SETTINGS_FILE: &str = "music-player.toml";

/// Everything `runtime::run` needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub music_dir: PathBuf,
    pub device: Option<String>,
    pub settings_path: PathBuf,
    /// Overrides the saved volume when set.
    pub volume: Option<u8>,
    pub controls: bool,
    pub engine: EngineConfig,
}

impl PlayerConfig {
    pub fn from_args(args: &Args) -> Self {
        let settings_path = args
            .settings
            .clone()
            .unwrap_or_else(|| args.music_dir.join(DEFAULT_SETTINGS_FILE));
        Self {
            music_dir: args.music_dir.clone(),
            device: normalize_device_name(args.device.clone()),
            settings_path,
            volume: args.volume,
            controls: !args.no_controls,
            engine: EngineConfig::default(),
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn settings_default_to_music_dir() {
        let args = Args::try_parse_from(["music-player", "--music-dir", "/tmp/songs"]).unwrap();
        let cfg = PlayerConfig::from_args(&args);
        assert_eq!(cfg.settings_path, PathBuf::from("/tmp/songs/music-player.toml"));
        assert!(cfg.controls);
    }

    #[test]
    fn explicit_settings_path_wins() {
        let args = Args::try_parse_from([
            "music-player",
            "--settings",
            "/etc/player.toml",
            "--no-controls",
        ])
        .unwrap();
        let cfg = PlayerConfig::from_args(&args);
        assert_eq!(cfg.settings_path, PathBuf::from("/etc/player.toml"));
        assert!(!cfg.controls);
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }
}
