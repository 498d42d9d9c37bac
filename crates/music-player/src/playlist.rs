//! Directory playlist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Upper bound on scanned tracks.
pub const MAX_ENTRIES: usize = 256;

/// Pressing "previous" later than this into a track restarts it instead.
pub const RESTART_THRESHOLD: Duration = Duration::from_secs(10);

/// What `prev_or_restart` decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrevAction {
    Previous,
    Restart,
}

#[derive(Debug)]
pub struct Playlist {
    dir: PathBuf,
    entries: Vec<String>,
    current: usize,
}

impl Playlist {
    /// Collect regular `.mp3` files (extension matched case-insensitively) from `dir`,
    /// sorted case-insensitively. An empty result is an error.
    pub fn scan(dir: &Path) -> Result<Self> {
        let read_dir = std::fs::read_dir(dir)
            .with_context(|| format!("read music directory {}", dir.display()))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            if entries.len() >= MAX_ENTRIES {
                tracing::warn!(max = MAX_ENTRIES, "playlist full; ignoring remaining files");
                break;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_mp3(&name) {
                entries.push(name);
            }
        }

        if entries.is_empty() {
            return Err(anyhow!("no .mp3 files found in {}", dir.display()));
        }
        entries.sort_by_key(|name| name.to_lowercase());
        tracing::info!(dir = %dir.display(), count = entries.len(), "playlist loaded");

        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
            current: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Zero-based index of the current track.
    pub fn position(&self) -> usize {
        self.current
    }

    pub fn current_name(&self) -> &str {
        &self.entries[self.current]
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(self.current_name())
    }

    /// Advance, wrapping to the first track.
    pub fn next(&mut self) {
        self.current = (self.current + 1) % self.entries.len();
    }

    /// Step back if `elapsed` is under [`RESTART_THRESHOLD`] (wrapping to the last
    /// track); otherwise stay put so the caller restarts the current track.
    pub fn prev_or_restart(&mut self, elapsed: Duration) -> PrevAction {
        if elapsed >= RESTART_THRESHOLD {
            return PrevAction::Restart;
        }
        self.current = self
            .current
            .checked_sub(1)
            .unwrap_or(self.entries.len() - 1);
        PrevAction::Previous
    }
}

fn is_mp3(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
}
