//! Start-up errors for the decode engine.
//!
//! Everything that goes wrong once the engine is running is recoverable and only
//! logged; these variants cover the cases where the engine refuses to start.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The decode worker thread could not be created.
    #[error("failed to spawn decode worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The output device could not be opened on the worker thread.
    #[error("failed to initialize audio output: {0}")]
    OutputInit(String),

    /// The worker exited before reporting that it was ready.
    #[error("decode worker exited during start-up")]
    WorkerGone,
}
