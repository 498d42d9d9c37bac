//! Player runtime: the control-side service loop.
//!
//! Owns the playlist and the engine handle, advances on finished tracks, and maps
//! control events onto transport requests. Nothing here blocks on the decode
//! worker except the final shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use stream_engine::{
    AudioOutput, CpalOutput, EndReason, Engine, Intent, Mp3FrameDecoder, PlaybackStatus,
    TransportHandle, device,
};

use crate::config::PlayerConfig;
use crate::controls::{self, ControlEvent};
use crate::playlist::{Playlist, PrevAction};
use crate::settings::Settings;

const TICK_PLAYING: Duration = Duration::from_millis(10);
const TICK_IDLE: Duration = Duration::from_millis(50);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Run the player until quit or Ctrl-C, then save the volume.
pub fn run(config: PlayerConfig, install_ctrlc: bool) -> Result<()> {
    let settings = match Settings::load(&config.settings_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("settings unreadable, using defaults: {e:#}");
            Settings::default()
        }
    };
    let volume = config.volume.unwrap_or(settings.volume);
    let playlist = Playlist::scan(&config.music_dir)?;

    let stop = Arc::new(AtomicBool::new(false));
    if install_ctrlc {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("install ctrl-c handler")?;
    }

    let device_name = config.device.clone();
    let engine = Engine::start(
        config.engine.clone(),
        Box::new(Mp3FrameDecoder::new()),
        move || {
            let output = CpalOutput::open(device_name.as_deref())?;
            Ok(Box::new(output) as Box<dyn AudioOutput>)
        },
        volume,
    )
    .context("start decode engine")?;

    let mut controls = if config.controls {
        Some(controls::spawn_stdin_reader()?)
    } else {
        None
    };

    let mut player = Player::new(engine.handle(), playlist);
    player.play_current();

    while !stop.load(Ordering::Relaxed) {
        if !poll_controls(&mut controls, &mut player) {
            break;
        }
        player.service();
        std::thread::sleep(if player.is_playing() {
            TICK_PLAYING
        } else {
            TICK_IDLE
        });
    }

    tracing::info!("shutting down");
    let volume = engine.shutdown();
    if let Err(e) = (Settings { volume }).save(&config.settings_path) {
        tracing::warn!("failed to save settings: {e:#}");
    }
    Ok(())
}

/// Handle pending control events. Returns false on quit.
fn poll_controls(controls: &mut Option<Receiver<ControlEvent>>, player: &mut Player) -> bool {
    let Some(rx) = controls.as_ref() else {
        return true;
    };
    loop {
        match rx.try_recv() {
            Ok(ControlEvent::Quit) => return false,
            Ok(event) => player.handle_event(event),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => {
                *controls = None;
                return true;
            }
        }
    }
}

/// How the current track ended, as far as the playlist is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackEnd {
    Finished,
    Failed,
}

/// Classify `status` for the play request `generation`. `None` while it is still
/// playing, paused, stopped on purpose, or superseded by a newer request.
fn track_end(status: &PlaybackStatus, generation: u64) -> Option<TrackEnd> {
    if status.generation != generation {
        return None;
    }
    if status.finished {
        return Some(TrackEnd::Finished);
    }
    match status.end_reason {
        Some(EndReason::OpenFailed | EndReason::Error) => Some(TrackEnd::Failed),
        Some(EndReason::Eof | EndReason::Stopped) | None => None,
    }
}

struct Player {
    transport: TransportHandle,
    playlist: Playlist,
    generation: u64,
    handled: bool,
    paused: bool,
    consecutive_failures: usize,
}

impl Player {
    fn new(transport: TransportHandle, playlist: Playlist) -> Self {
        Self {
            transport,
            playlist,
            generation: 0,
            handled: false,
            paused: false,
            consecutive_failures: 0,
        }
    }

    fn play_current(&mut self) {
        let path = self.playlist.current_path();
        tracing::info!(
            track = self.playlist.current_name(),
            index = self.playlist.position() + 1,
            total = self.playlist.len(),
            "play"
        );
        self.generation = self.transport.request_play(path);
        self.handled = false;
        self.paused = false;
    }

    fn is_playing(&self) -> bool {
        !self.paused && self.transport.status().intent == Intent::Playing
    }

    /// Auto-advance when the current track ends.
    fn service(&mut self) {
        if self.handled {
            return;
        }
        let Some(end) = track_end(&self.transport.status(), self.generation) else {
            return;
        };
        self.handled = true;

        match end {
            TrackEnd::Finished => self.consecutive_failures = 0,
            TrackEnd::Failed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.playlist.len() {
                    tracing::error!("every track in the playlist failed; stopping");
                    return;
                }
            }
        }
        tracing::info!(?end, "advancing to next track");
        self.playlist.next();
        self.play_current();
    }

    fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::TogglePause => {
                if self.paused {
                    self.transport.request_resume();
                } else {
                    self.transport.request_pause();
                }
                self.paused = !self.paused;
                tracing::info!(paused = self.paused, "pause toggled");
            }
            ControlEvent::Next => {
                self.playlist.next();
                self.consecutive_failures = 0;
                self.play_current();
            }
            ControlEvent::Previous => {
                let elapsed = Duration::from_millis(self.transport.position_ms());
                if self.playlist.prev_or_restart(elapsed) == PrevAction::Restart {
                    tracing::info!("restarting track");
                }
                self.consecutive_failures = 0;
                self.play_current();
            }
            ControlEvent::VolumeUp | ControlEvent::VolumeDown => {
                let volume = controls::step_volume(self.transport.volume(), event);
                let volume = self.transport.set_volume(volume);
                tracing::info!(volume, "volume");
            }
            ControlEvent::Info => {
                let st = self.transport.status();
                tracing::info!(
                    track = self.playlist.current_name(),
                    index = self.playlist.position() + 1,
                    total = self.playlist.len(),
                    position_ms = st.position_ms(),
                    sample_rate_hz = st.sample_rate_hz,
                    channels = st.channels,
                    volume = st.volume,
                    phase = ?st.phase,
                    "status"
                );
            }
            ControlEvent::Quit => {}
        }
    }
}
