//! Output sink adapter.
//!
//! [`AudioOutput`] is the raw hardware capability (rate, start/stop, blocking write,
//! volume, amplifier). [`OutputSink`] wraps it and owns the policy: rate changes are a
//! stop/reconfigure/start sequence and only happen when the rate actually differs.

use std::time::Duration;

use anyhow::{Context, Result};

/// Result of a bounded write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The device did not accept all samples before the timeout.
    TimedOut,
}

/// Hardware output capability.
///
/// Implementations are created and used on the decode worker thread only, so they
/// do not need to be `Send`.
pub trait AudioOutput {
    fn set_rate(&mut self, rate_hz: u32) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Write interleaved PCM, blocking at most `timeout`.
    fn write(&mut self, pcm: &[i16], channels: u16, timeout: Duration) -> Result<WriteOutcome>;

    /// Let everything already written play out, waiting at most `timeout`.
    ///
    /// Returns whether the output ran dry. Called at the end of a file, before the
    /// next `stop` would discard buffered audio.
    fn drain(&mut self, timeout: Duration) -> Result<bool>;

    /// Output volume in percent (0..=100).
    fn set_volume(&mut self, percent: u8) -> Result<()>;
    fn set_amplifier(&mut self, enabled: bool) -> Result<()>;
}

/// Rate-tracking wrapper around an [`AudioOutput`].
pub struct OutputSink {
    output: Box<dyn AudioOutput>,
    rate_hz: Option<u32>,
}

impl OutputSink {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            rate_hz: None,
        }
    }

    /// Currently configured rate, if any was applied yet.
    pub fn rate_hz(&self) -> Option<u32> {
        self.rate_hz
    }

    /// Unconditional stop, set rate, start. Used when a new file is opened.
    pub fn reset(&mut self, rate_hz: u32) -> Result<()> {
        self.reconfigure(rate_hz)
    }

    /// Switch to `rate_hz` if it differs from the configured rate.
    ///
    /// Returns whether the device was reconfigured.
    pub fn configure(&mut self, rate_hz: u32) -> Result<bool> {
        if self.rate_hz == Some(rate_hz) {
            return Ok(false);
        }
        self.reconfigure(rate_hz)?;
        Ok(true)
    }

    fn reconfigure(&mut self, rate_hz: u32) -> Result<()> {
        self.output.stop().context("stop output")?;
        // Forget the old rate first so a failed restart is retried next time.
        self.rate_hz = None;
        self.output
            .set_rate(rate_hz)
            .with_context(|| format!("set output rate {rate_hz}"))?;
        self.output.start().context("start output")?;
        self.rate_hz = Some(rate_hz);
        Ok(())
    }

    pub fn write(&mut self, pcm: &[i16], channels: u16, timeout: Duration) -> Result<WriteOutcome> {
        self.output.write(pcm, channels, timeout)
    }

    pub fn drain(&mut self, timeout: Duration) -> Result<bool> {
        self.output.drain(timeout)
    }

    pub fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.output.set_volume(percent.min(100))
    }

    pub fn set_amplifier(&mut self, enabled: bool) -> Result<()> {
        self.output.set_amplifier(enabled)
    }

    /// Amplifier off and device stopped. The volume setting is left untouched.
    pub fn mute(&mut self) -> Result<()> {
        self.output.set_amplifier(false)?;
        self.output.stop().context("stop output")?;
        self.rate_hz = None;
        Ok(())
    }
}
