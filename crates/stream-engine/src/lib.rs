//! Streaming MP3 decode engine.
//!
//! A single worker thread reads a file through a fixed [`ingest::IngestBuffer`],
//! decodes one frame at a time with a [`decode::FrameDecoder`] and writes PCM to an
//! [`sink::AudioOutput`]. The control thread drives it through a non-blocking
//! [`transport::TransportHandle`] obtained from [`engine::Engine`].

pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod sink;
pub mod transport;

mod worker;

pub use config::EngineConfig;
pub use decode::{FrameDecoder, Mp3FrameDecoder};
pub use engine::Engine;
pub use error::EngineError;
pub use playback::CpalOutput;
pub use sink::AudioOutput;
pub use transport::{EndReason, Intent, PlaybackStatus, TransportHandle, WorkerPhase};
