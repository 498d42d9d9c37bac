use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "music-player", version = VERSION)]
pub struct Args {
    /// Directory scanned for .mp3 files
    #[arg(long, default_value = "/sd/music")]
    pub music_dir: PathBuf,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Settings file (volume is persisted here)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Start at this volume (0-100) instead of the saved one
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Do not read playback controls from stdin
    #[arg(long)]
    pub no_controls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["music-player"]).unwrap();
        assert_eq!(args.music_dir, PathBuf::from("/sd/music"));
        assert!(args.device.is_none());
        assert!(args.volume.is_none());
        assert!(!args.no_controls);
    }

    #[test]
    fn volume_out_of_range_is_rejected() {
        assert!(Args::try_parse_from(["music-player", "--volume", "101"]).is_err());
        let args = Args::try_parse_from(["music-player", "--volume", "55"]).unwrap();
        assert_eq!(args.volume, Some(55));
    }
}
