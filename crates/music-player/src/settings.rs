//! Persisted player settings (TOML).
//!
//! Read once at start-up and written once at shutdown.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Output volume in percent.
    pub volume: u8,
}

/// On-disk shape. Wider than [`Settings`] so hand-edited values get clamped
/// instead of rejected.
#[derive(Debug, Deserialize)]
struct StoredSettings {
    volume: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no saved settings; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("read settings {:?}", path)),
        };
        let stored = toml::from_str::<StoredSettings>(&raw)
            .with_context(|| format!("parse settings {:?}", path))?;

        let volume = stored
            .volume
            .map(|v| v.clamp(0, 100) as u8)
            .unwrap_or(DEFAULT_VOLUME);
        tracing::info!(volume, "loaded saved volume");
        Ok(Self { volume })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let clamped = Settings {
            volume: self.volume.min(100),
        };
        let raw = toml::to_string(&clamped).context("serialize settings")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir {:?}", parent))?;
        }
        std::fs::write(path, raw).with_context(|| format!("write settings {:?}", path))?;
        tracing::info!(volume = clamped.volume, path = %path.display(), "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "music-player-settings-{}-{name}.toml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_file_uses_defaults() {
        let path = temp_path("missing");
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }

    #[test]
    fn volume_round_trips() {
        let path = temp_path("round-trip");
        for v in [0u8, 37, 100] {
            Settings { volume: v }.save(&path).unwrap();
            assert_eq!(Settings::load(&path).unwrap().volume, v);
        }
    }

    #[test]
    fn save_clamps_out_of_range() {
        let path = temp_path("save-clamp");
        Settings { volume: 180 }.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap().volume, 100);
    }

    #[test]
    fn load_clamps_hand_edited_values() {
        let path = temp_path("load-clamp");
        std::fs::write(&path, "volume = 250\n").unwrap();
        assert_eq!(Settings::load(&path).unwrap().volume, 100);
        std::fs::write(&path, "volume = -4\n").unwrap();
        assert_eq!(Settings::load(&path).unwrap().volume, 0);
    }

    #[test]
    fn empty_file_uses_default_volume() {
        let path = temp_path("empty");
        std::fs::write(&path, "").unwrap();
        assert_eq!(Settings::load(&path).unwrap().volume, DEFAULT_VOLUME);
    }

    #[test]
    fn garbage_is_an_error() {
        let path = temp_path("garbage");
        std::fs::write(&path, "volume = [").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
