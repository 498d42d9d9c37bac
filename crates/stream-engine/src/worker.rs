//! Decode worker loop.
//!
//! The worker owns the ingest window, the frame decoder and the output sink. It is
//! an explicit state machine: a [`Session`] only exists while decoding or paused,
//! so "finished while playing" cannot be represented.
//!
//! Commands are folded between frames: every queued command is drained, the last
//! `Play` wins, `Stop` discards a pending path. A command therefore takes effect
//! within one frame's decode and write.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::config::EngineConfig;
use crate::decode::FrameDecoder;
use crate::ingest::IngestBuffer;
use crate::sink::{AudioOutput, OutputSink, WriteOutcome};
use crate::transport::{Command, EndReason, Intent, PlaybackStatus, WorkerPhase, lock_status};

/// Samples at or beyond this magnitude count as near full scale.
const NEAR_FULL_SCALE: i16 = 32_000;

/// A play request that has not been opened yet.
#[derive(Debug)]
pub(crate) struct Pending {
    pub(crate) path: PathBuf,
    pub(crate) generation: u64,
}

/// Per-file decode state. Dropping it does not close the file; the worker detaches
/// the ingest window whenever a session ends.
#[derive(Debug)]
pub(crate) struct Session {
    path: PathBuf,
    generation: u64,
    format_applied: bool,
    samples_written: u64,
    sample_rate_hz: u32,
    low_buffer_warned: bool,
    levels: LevelStats,
}

impl Session {
    fn new(pending: Pending, provisional_rate_hz: u32) -> Self {
        Self {
            path: pending.path,
            generation: pending.generation,
            format_applied: false,
            samples_written: 0,
            sample_rate_hz: provisional_rate_hz,
            low_buffer_warned: false,
            levels: LevelStats::default(),
        }
    }

    fn position_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.samples_written.saturating_mul(1000) / u64::from(self.sample_rate_hz)
    }
}

#[derive(Debug)]
pub(crate) enum WorkerState {
    Idle,
    Opening(Pending),
    Decoding(Session),
    Paused(Session),
    Draining,
}

/// Peak levels of everything written for one file.
#[derive(Debug, Default)]
struct LevelStats {
    peak_max: i16,
    peak_min: i16,
    near_full_scale: u64,
    samples: u64,
}

impl LevelStats {
    fn observe(&mut self, pcm: &[i16]) {
        for &x in pcm {
            self.peak_max = self.peak_max.max(x);
            self.peak_min = self.peak_min.min(x);
            if x >= NEAR_FULL_SCALE || x <= -NEAR_FULL_SCALE {
                self.near_full_scale += 1;
            }
        }
        self.samples += pcm.len() as u64;
    }
}

pub(crate) struct Worker {
    config: EngineConfig,
    rx: Receiver<Command>,
    status: Arc<Mutex<PlaybackStatus>>,
    ingest: IngestBuffer<File>,
    decoder: Box<dyn FrameDecoder>,
    sink: OutputSink,
    pcm: Vec<i16>,
    intent: Intent,
    pending: Option<Pending>,
    volume: u8,
    shutdown: bool,
    phase: WorkerPhase,
}

impl Worker {
    pub(crate) fn new(
        config: EngineConfig,
        rx: Receiver<Command>,
        status: Arc<Mutex<PlaybackStatus>>,
        decoder: Box<dyn FrameDecoder>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let volume = lock_status(&status).volume;
        Self {
            ingest: IngestBuffer::new(config.ingest_capacity),
            config,
            rx,
            status,
            decoder,
            sink: OutputSink::new(output),
            pcm: Vec::with_capacity(2 * 1152),
            intent: Intent::StopRequested,
            pending: None,
            volume,
            shutdown: false,
            phase: WorkerPhase::Starting,
        }
    }

    /// Run until a shutdown request (or a closed channel) is observed.
    pub(crate) fn run(mut self) {
        tracing::info!(volume = self.volume, "decode worker started");
        if let Err(e) = self.sink.set_volume(self.volume) {
            tracing::warn!("apply initial volume: {e:#}");
        }

        let mut state = WorkerState::Idle;
        loop {
            state = match state {
                WorkerState::Draining => break,
                other => self.tick(other),
            };
        }
        self.drain_for_shutdown();
    }

    /// Advance the state machine by one step.
    pub(crate) fn tick(&mut self, state: WorkerState) -> WorkerState {
        match state {
            WorkerState::Idle => {
                self.publish_phase(WorkerPhase::Idle);
                self.wait_for_commands();
                self.transition(WorkerState::Idle)
            }
            WorkerState::Paused(session) => {
                self.publish_phase(WorkerPhase::Paused);
                self.wait_for_commands();
                self.transition(WorkerState::Paused(session))
            }
            WorkerState::Opening(pending) => self.open(pending),
            WorkerState::Decoding(session) => {
                self.publish_phase(WorkerPhase::Decoding);
                self.poll_commands();
                match self.transition(WorkerState::Decoding(session)) {
                    WorkerState::Decoding(session) => self.decode_step(session),
                    other => other,
                }
            }
            WorkerState::Draining => WorkerState::Draining,
        }
    }

    fn wait_for_commands(&mut self) {
        match self.rx.recv_timeout(self.config.idle_wait) {
            Ok(cmd) => {
                self.apply(cmd);
                self.poll_commands();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.shutdown = true,
        }
    }

    fn poll_commands(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => self.apply(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.shutdown = true;
                    break;
                }
            }
        }
    }

    fn apply(&mut self, cmd: Command) {
        tracing::debug!(?cmd, "command");
        match cmd {
            Command::Play { path, generation } => {
                let next = Pending { path, generation };
                if let Some(old) = self.pending.replace(next) {
                    tracing::debug!(path = %old.path.display(), "pending play superseded");
                }
                self.intent = Intent::Playing;
            }
            Command::Stop => {
                self.pending = None;
                self.intent = Intent::StopRequested;
            }
            Command::Pause => {
                if self.intent == Intent::Playing {
                    self.intent = Intent::Paused;
                }
            }
            Command::Resume => {
                if self.intent == Intent::Paused {
                    self.intent = Intent::Playing;
                }
            }
            Command::SetVolume(percent) => {
                self.volume = percent.min(100);
                if let Err(e) = self.sink.set_volume(self.volume) {
                    tracing::warn!("set volume: {e:#}");
                }
            }
            Command::Shutdown => {
                self.shutdown = true;
                self.pending = None;
                self.intent = Intent::StopRequested;
            }
        }
    }

    /// Apply the folded commands to `state`.
    fn transition(&mut self, state: WorkerState) -> WorkerState {
        if self.shutdown {
            if let WorkerState::Decoding(s) | WorkerState::Paused(s) = state {
                self.end_session(s, EndReason::Stopped);
            }
            return WorkerState::Draining;
        }

        if let Some(pending) = self.pending.take() {
            if let WorkerState::Decoding(s) | WorkerState::Paused(s) = state {
                self.ingest.detach();
                tracing::info!(path = %s.path.display(), "session replaced");
            }
            return WorkerState::Opening(pending);
        }

        match (state, self.intent) {
            (WorkerState::Decoding(s), Intent::Paused) => {
                self.set_amplifier(false);
                tracing::info!(position_ms = s.position_ms(), "paused");
                WorkerState::Paused(s)
            }
            (WorkerState::Paused(s), Intent::Playing) => {
                self.set_amplifier(true);
                tracing::info!(position_ms = s.position_ms(), "resumed");
                WorkerState::Decoding(s)
            }
            (WorkerState::Decoding(s) | WorkerState::Paused(s), Intent::StopRequested) => {
                self.end_session(s, EndReason::Stopped)
            }
            (state, _) => state,
        }
    }

    fn open(&mut self, pending: Pending) -> WorkerState {
        self.publish_phase(WorkerPhase::Opening);
        self.ingest.detach();
        self.decoder.reset();

        let file = match File::open(&pending.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %pending.path.display(), "open failed: {e}");
                self.intent = Intent::StopRequested;
                self.report_end(pending.generation, EndReason::OpenFailed);
                return WorkerState::Idle;
            }
        };
        self.ingest.attach(file);

        let provisional = self.config.provisional_rate_hz;
        if let Err(e) = self.sink.reset(provisional) {
            tracing::warn!(path = %pending.path.display(), "output reset failed: {e:#}");
            self.ingest.detach();
            self.intent = Intent::StopRequested;
            self.report_end(pending.generation, EndReason::Error);
            return WorkerState::Idle;
        }
        if let Err(e) = self.sink.set_volume(self.volume) {
            tracing::warn!("set volume: {e:#}");
        }
        let playing = self.intent == Intent::Playing;
        self.set_amplifier(playing);

        tracing::info!(
            path = %pending.path.display(),
            generation = pending.generation,
            "opened"
        );
        let session = Session::new(pending, provisional);
        let phase = if playing {
            WorkerPhase::Decoding
        } else {
            WorkerPhase::Paused
        };
        {
            let mut st = lock_status(&self.status);
            st.now_playing = Some(session.path.clone());
            st.samples_written = 0;
            st.sample_rate_hz = provisional;
            st.channels = 0;
            st.phase = phase;
        }
        self.phase = phase;

        if playing {
            WorkerState::Decoding(session)
        } else {
            WorkerState::Paused(session)
        }
    }

    /// Refill, decode one frame and write it.
    pub(crate) fn decode_step(&mut self, mut s: Session) -> WorkerState {
        let available = match self.ingest.fill() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(path = %s.path.display(), "read failed: {e}");
                return self.end_session(s, EndReason::Error);
            }
        };
        if available < self.config.eof_threshold {
            return self.finish_session(s);
        }
        self.check_low_buffer(&mut s, available);

        let started = Instant::now();
        let frame = self.decoder.decode_frame(self.ingest.unread(), &mut self.pcm);
        let elapsed = started.elapsed();
        if elapsed > self.config.slow_decode_warn {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                available,
                "slow frame decode"
            );
        }

        if frame.needs_more_data() {
            let before = self.ingest.total_read();
            if let Err(e) = self.ingest.fill() {
                tracing::warn!(path = %s.path.display(), "read failed: {e}");
                return self.end_session(s, EndReason::Error);
            }
            if self.ingest.total_read() == before {
                tracing::debug!(
                    trailing_bytes = self.ingest.available(),
                    "no complete frame left"
                );
                return self.finish_session(s);
            }
            return WorkerState::Decoding(s);
        }

        self.ingest.consume(frame.consumed);
        if !frame.is_valid() {
            return WorkerState::Decoding(s);
        }

        if !s.format_applied {
            tracing::info!(
                sample_rate_hz = frame.sample_rate_hz,
                channels = frame.channels,
                bitrate_kbps = frame.bitrate_kbps,
                "stream format"
            );
            match self.sink.configure(frame.sample_rate_hz) {
                Ok(true) => tracing::debug!(rate_hz = frame.sample_rate_hz, "output reconfigured"),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("output reconfigure failed: {e:#}");
                    return self.end_session(s, EndReason::Error);
                }
            }
            s.format_applied = true;
            s.sample_rate_hz = frame.sample_rate_hz;
            let mut st = lock_status(&self.status);
            st.sample_rate_hz = frame.sample_rate_hz;
            st.channels = frame.channels;
        }

        s.levels.observe(&self.pcm);
        match self
            .sink
            .write(&self.pcm, frame.channels, self.config.write_timeout)
        {
            Ok(WriteOutcome::Written) => {}
            Ok(WriteOutcome::TimedOut) => {
                tracing::warn!(
                    timeout_ms = self.config.write_timeout.as_millis() as u64,
                    "output write timed out"
                );
                return self.end_session(s, EndReason::Error);
            }
            Err(e) => {
                tracing::warn!("output write failed: {e:#}");
                return self.end_session(s, EndReason::Error);
            }
        }

        s.samples_written += frame.samples as u64;
        lock_status(&self.status).samples_written = s.samples_written;
        WorkerState::Decoding(s)
    }

    fn check_low_buffer(&self, s: &mut Session, available: usize) {
        if available >= self.config.low_buffer_reset_bytes {
            s.low_buffer_warned = false;
        } else if available < self.config.low_buffer_warn_bytes && !s.low_buffer_warned {
            s.low_buffer_warned = true;
            if self.ingest.is_exhausted() {
                tracing::debug!(available, "reached end of file data");
            } else {
                tracing::warn!(available, "ingest buffer running low");
            }
        }
    }

    /// End of file: let the output play what it holds, then end the session.
    fn finish_session(&mut self, s: Session) -> WorkerState {
        self.ingest.detach();
        self.drain_output();
        let reason = if self.shutdown || self.intent == Intent::StopRequested {
            EndReason::Stopped
        } else {
            EndReason::Eof
        };
        self.end_session(s, reason)
    }

    /// Wait in `idle_wait` slices for the output to run dry, folding commands in
    /// between. Gives up on timeout or when a command needs the worker.
    fn drain_output(&mut self) {
        let deadline = Instant::now() + self.config.eof_drain_timeout;
        loop {
            match self.sink.drain(self.config.idle_wait) {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("output drain failed: {e:#}");
                    return;
                }
            }
            self.poll_commands();
            if self.pending.is_some() || self.shutdown || self.intent != Intent::Playing {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = self.config.eof_drain_timeout.as_millis() as u64,
                    "output did not drain"
                );
                return;
            }
        }
    }

    /// Close the session's file, silence the output and publish why it ended.
    fn end_session(&mut self, s: Session, reason: EndReason) -> WorkerState {
        self.ingest.detach();
        self.set_amplifier(false);
        if self.pending.is_none() {
            self.intent = Intent::StopRequested;
        }

        tracing::info!(
            path = %s.path.display(),
            ?reason,
            position_ms = s.position_ms(),
            "session ended"
        );
        tracing::debug!(
            peak_max = s.levels.peak_max,
            peak_min = s.levels.peak_min,
            near_full_scale = s.levels.near_full_scale,
            samples = s.levels.samples,
            "levels"
        );

        self.report_end(s.generation, reason);
        WorkerState::Idle
    }

    /// Publish the end of `generation`, unless a newer play request exists.
    fn report_end(&mut self, generation: u64, reason: EndReason) {
        let mut st = lock_status(&self.status);
        st.now_playing = None;
        if st.generation != generation {
            return;
        }
        st.end_reason = Some(reason);
        st.finished = reason == EndReason::Eof;
        st.intent = Intent::StopRequested;
    }

    fn set_amplifier(&mut self, enabled: bool) {
        if let Err(e) = self.sink.set_amplifier(enabled) {
            tracing::warn!(enabled, "set amplifier: {e:#}");
        }
    }

    fn publish_phase(&mut self, phase: WorkerPhase) {
        if self.phase != phase {
            self.phase = phase;
            lock_status(&self.status).phase = phase;
        }
    }

    /// Release the file, codec and buffers, then mute the output.
    fn drain_for_shutdown(&mut self) {
        self.publish_phase(WorkerPhase::Draining);
        self.ingest.detach();
        self.decoder.reset();
        self.pcm = Vec::new();
        if let Err(e) = self.sink.mute() {
            tracing::warn!("mute output: {e:#}");
        }
        tracing::info!("decode worker exiting");
        self.publish_phase(WorkerPhase::Exited);
    }
}
