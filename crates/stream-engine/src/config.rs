use std::time::Duration;

/// Tuning parameters shared by the ingest, decode and output stages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Fixed capacity of the ingest window in bytes.
    pub ingest_capacity: usize,
    /// Fewer unread bytes than this after a refill means end of stream.
    pub eof_threshold: usize,
    /// Warn (once per episode) when the unread bytes drop below this.
    pub low_buffer_warn_bytes: usize,
    /// Re-arm the low buffer warning once the window holds at least this much.
    pub low_buffer_reset_bytes: usize,
    /// Warn when a single frame takes longer than this to decode.
    pub slow_decode_warn: Duration,
    /// Upper bound for one blocking output write.
    pub write_timeout: Duration,
    /// End of file: how long to let already written audio play out.
    pub eof_drain_timeout: Duration,
    /// How long the idle worker waits for a command before re-checking its state.
    pub idle_wait: Duration,
    /// Output rate applied when a file is opened, before its first frame is decoded.
    pub provisional_rate_hz: u32,
    /// Stack size of the decode worker thread.
    pub worker_stack_size: usize,
    /// Shutdown: how long to wait for the worker to leave its decode loop.
    pub decode_exit_timeout: Duration,
    /// Shutdown: how long to wait for the worker to report that it exited.
    pub worker_exit_timeout: Duration,
}

impl Default for EngineConfig {
    /// Defaults tuned for a single local MP3 stream on modest hardware.
    fn default() -> Self {
        Self {
            ingest_capacity: 16 * 1024,
            eof_threshold: 4,
            low_buffer_warn_bytes: 1024,
            low_buffer_reset_bytes: 4096,
            slow_decode_warn: Duration::from_millis(20),
            write_timeout: Duration::from_millis(500),
            eof_drain_timeout: Duration::from_secs(1),
            idle_wait: Duration::from_millis(20),
            provisional_rate_hz: 44_100,
            worker_stack_size: 256 * 1024,
            decode_exit_timeout: Duration::from_millis(600),
            worker_exit_timeout: Duration::from_secs(2),
        }
    }
}
