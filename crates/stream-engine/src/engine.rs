//! Engine lifecycle: start-up handshake and staged shutdown.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};

use crate::config::EngineConfig;
use crate::decode::FrameDecoder;
use crate::error::EngineError;
use crate::sink::AudioOutput;
use crate::transport::{PlaybackStatus, TransportHandle, WorkerPhase, lock_status};
use crate::worker::Worker;

const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

/// A running decode engine: one worker thread plus the handle used to drive it.
///
/// Engines are independent; several can run in one process.
pub struct Engine {
    config: EngineConfig,
    handle: TransportHandle,
    status: Arc<Mutex<PlaybackStatus>>,
    join: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the decode worker and wait until its output is ready.
    ///
    /// `output_factory` runs on the worker thread, so outputs that cannot cross
    /// threads (CPAL streams) are fine. If it fails, the worker exits and `start`
    /// returns the error; nothing is left running.
    pub fn start<F>(
        config: EngineConfig,
        decoder: Box<dyn FrameDecoder>,
        output_factory: F,
        initial_volume: u8,
    ) -> Result<Engine, EngineError>
    where
        F: FnOnce() -> anyhow::Result<Box<dyn AudioOutput>> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let status = PlaybackStatus::shared(initial_volume);

        let worker_status = status.clone();
        let worker_config = config.clone();
        let join = thread::Builder::new()
            .name("decode-worker".into())
            .stack_size(config.worker_stack_size)
            .spawn(move || {
                let output = match output_factory() {
                    Ok(output) => output,
                    Err(e) => {
                        lock_status(&worker_status).phase = WorkerPhase::Exited;
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let worker = Worker::new(worker_config, rx, worker_status, decoder, output);
                let _ = ready_tx.send(Ok(()));
                worker.run();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = join.join();
                return Err(EngineError::OutputInit(msg));
            }
            Err(_) => {
                let _ = join.join();
                return Err(EngineError::WorkerGone);
            }
        }

        tracing::info!(
            ingest_capacity = config.ingest_capacity,
            stack_size = config.worker_stack_size,
            "decode engine started"
        );
        Ok(Engine {
            config,
            handle: TransportHandle::new(tx, status.clone()),
            status,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn request_play(&self, path: impl Into<std::path::PathBuf>) -> u64 {
        self.handle.request_play(path)
    }

    pub fn request_stop(&self) {
        self.handle.request_stop();
    }

    pub fn request_pause(&self) {
        self.handle.request_pause();
    }

    pub fn request_resume(&self) {
        self.handle.request_resume();
    }

    pub fn set_volume(&self, percent: u8) -> u8 {
        self.handle.set_volume(percent)
    }

    pub fn poll_finished(&self) -> bool {
        self.handle.poll_finished()
    }

    pub fn position_ms(&self) -> u64 {
        self.handle.position_ms()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.handle.status()
    }

    /// Stop the worker and join it. Returns the final volume for persistence.
    pub fn shutdown(mut self) -> u8 {
        self.stop_worker();
        self.handle.volume()
    }

    fn stop_worker(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let started = Instant::now();

        // Let the decode loop exit at its next frame boundary.
        self.handle.request_stop();
        if !self.wait_for(self.config.decode_exit_timeout, |st| {
            !st.phase.is_decode_active()
        }) {
            tracing::warn!(
                timeout_ms = self.config.decode_exit_timeout.as_millis() as u64,
                "decode worker still active; forcing shutdown"
            );
        }

        self.handle.shutdown();
        if !self.wait_for(self.config.worker_exit_timeout, |st| {
            st.phase == WorkerPhase::Exited
        }) {
            tracing::warn!(
                timeout_ms = self.config.worker_exit_timeout.as_millis() as u64,
                "decode worker did not exit in time; joining anyway"
            );
        }

        if join.join().is_err() {
            tracing::warn!("decode worker panicked");
        }
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "decode engine stopped"
        );
    }

    fn wait_for(&self, timeout: Duration, done: impl Fn(&PlaybackStatus) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&lock_status(&self.status)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(SHUTDOWN_POLL);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
