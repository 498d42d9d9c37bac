//! Command channel and shared playback status.
//!
//! The control thread talks to the worker only through [`TransportHandle`]: commands
//! go over an unbounded channel (sending never blocks) and progress comes back
//! through a small mutex-protected [`PlaybackStatus`] that neither side holds for
//! longer than a field update.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;

/// Discrete requests from the control thread to the decode worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Play { path: PathBuf, generation: u64 },
    Pause,
    Resume,
    Stop,
    SetVolume(u8),
    /// Hard stop: the worker releases everything and exits.
    Shutdown,
}

/// What the control thread wants the worker to be doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Intent {
    Playing,
    Paused,
    #[default]
    StopRequested,
}

/// Why the most recent session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The file was played to the end.
    Eof,
    Stopped,
    OpenFailed,
    /// Read, output or device failure.
    Error,
}

/// Worker state as published to the control thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerPhase {
    #[default]
    Starting,
    Idle,
    Opening,
    Decoding,
    Paused,
    Draining,
    Exited,
}

impl WorkerPhase {
    /// Opening or decoding a file; the worker may be inside a blocking write.
    pub fn is_decode_active(self) -> bool {
        matches!(self, WorkerPhase::Opening | WorkerPhase::Decoding)
    }
}

/// Shared status written by both sides.
///
/// The control thread owns `generation`, `intent` and `volume`; the worker owns
/// everything else, except that `request_play` clears `finished` and `end_reason`
/// for the generation it starts.
#[derive(Clone, Debug, Default)]
pub struct PlaybackStatus {
    /// Id of the latest play request.
    pub generation: u64,
    pub phase: WorkerPhase,
    pub intent: Intent,
    pub now_playing: Option<PathBuf>,
    /// The latest requested file was played to the end.
    pub finished: bool,
    pub end_reason: Option<EndReason>,
    /// Samples per channel written to the output for the current file.
    pub samples_written: u64,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub volume: u8,
}

impl PlaybackStatus {
    pub fn shared(volume: u8) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            volume: volume.min(100),
            ..Self::default()
        }))
    }

    /// Elapsed playback time of the current file. Zero while the rate is unknown.
    pub fn position_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.samples_written.saturating_mul(1000) / u64::from(self.sample_rate_hz)
    }

    /// Copy for the control thread.
    pub fn snapshot(&self) -> PlaybackStatus {
        self.clone()
    }
}

/// Lock the status, recovering the data if a holder panicked.
pub(crate) fn lock_status(status: &Mutex<PlaybackStatus>) -> MutexGuard<'_, PlaybackStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable control-side handle. No method ever waits on the worker.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    tx: Sender<Command>,
    status: Arc<Mutex<PlaybackStatus>>,
}

impl TransportHandle {
    pub(crate) fn new(tx: Sender<Command>, status: Arc<Mutex<PlaybackStatus>>) -> Self {
        Self { tx, status }
    }

    /// Ask the worker to play `path`, replacing anything pending or playing.
    ///
    /// Returns the generation assigned to this request.
    pub fn request_play(&self, path: impl Into<PathBuf>) -> u64 {
        let path = path.into();
        let mut st = lock_status(&self.status);
        st.generation += 1;
        st.finished = false;
        st.end_reason = None;
        st.intent = Intent::Playing;
        let generation = st.generation;
        // Sent under the lock so generations reach the worker in order.
        self.send(Command::Play { path, generation });
        generation
    }

    pub fn request_stop(&self) {
        let mut st = lock_status(&self.status);
        st.intent = Intent::StopRequested;
        self.send(Command::Stop);
    }

    pub fn request_pause(&self) {
        let mut st = lock_status(&self.status);
        if st.intent == Intent::Playing {
            st.intent = Intent::Paused;
        }
        self.send(Command::Pause);
    }

    /// No effect unless a session is paused.
    pub fn request_resume(&self) {
        let mut st = lock_status(&self.status);
        if st.intent == Intent::Paused {
            st.intent = Intent::Playing;
        }
        self.send(Command::Resume);
    }

    /// Set the output volume in percent; values above 100 are clamped.
    pub fn set_volume(&self, percent: u8) -> u8 {
        let percent = percent.min(100);
        let mut st = lock_status(&self.status);
        st.volume = percent;
        self.send(Command::SetVolume(percent));
        percent
    }

    pub fn volume(&self) -> u8 {
        lock_status(&self.status).volume
    }

    /// The latest requested file played to its end.
    pub fn poll_finished(&self) -> bool {
        lock_status(&self.status).finished
    }

    pub fn position_ms(&self) -> u64 {
        lock_status(&self.status).position_ms()
    }

    pub fn status(&self) -> PlaybackStatus {
        lock_status(&self.status).snapshot()
    }

    pub(crate) fn shutdown(&self) {
        let mut st = lock_status(&self.status);
        st.intent = Intent::StopRequested;
        self.send(Command::Shutdown);
    }

    fn send(&self, cmd: Command) {
        if let Err(e) = self.tx.send(cmd) {
            tracing::warn!(command = ?e.into_inner(), "decode worker is gone; command dropped");
        }
    }
}
