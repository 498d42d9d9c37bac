//! CPAL-backed [`AudioOutput`].
//!
//! The worker converts decoded `i16` PCM to `f32`, maps it to the device channel
//! count, resamples when the device cannot run at the decoded rate, and pushes it
//! into a bounded [`SharedAudio`] queue. The real-time callback:
//! - outputs silence without draining while the amplifier is off
//! - refills from the queue without blocking
//! - applies the volume gain
//! - converts `f32` samples to the device sample format
//!
//! At the end of a file [`AudioOutput::drain`] flushes the resampler tail and waits
//! for the callback to empty the queue, so the next `stop` discards nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::resample::StreamResampler;
use crate::sink::{AudioOutput, WriteOutcome};

/// Seconds of audio the output queue can hold.
const QUEUE_SECONDS: f32 = 0.5;
/// Frames per resampler step.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;
/// Upper bound on frames pulled from the queue per callback refill.
const REFILL_MAX_FRAMES: usize = 2048;

/// Flags shared between the worker side and the callback.
#[derive(Debug)]
struct Controls {
    volume: AtomicU8,
    amplifier: AtomicBool,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
}

/// A playing stream plus everything the worker needs to feed it.
struct ActiveStream {
    _stream: cpal::Stream,
    queue: Arc<SharedAudio>,
    device_rate: u32,
    device_channels: usize,
    resampler: Option<StreamResampler>,
    scratch: Vec<f32>,
    /// Flushed resampler output not yet accepted by the queue.
    tail: Vec<f32>,
}

/// Audio output on a CPAL device. Must stay on the thread that created it.
pub struct CpalOutput {
    device: cpal::Device,
    device_name: String,
    rate_hz: u32,
    active: Option<ActiveStream>,
    controls: Arc<Controls>,
}

impl CpalOutput {
    /// Open the device matching `needle` (or the host default).
    pub fn open(needle: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, needle)?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        tracing::info!(device = %device_name, "output device selected");
        Ok(Self {
            device,
            device_name,
            rate_hz: 44_100,
            active: None,
            controls: Arc::new(Controls {
                volume: AtomicU8::new(100),
                amplifier: AtomicBool::new(false),
                underrun_frames: AtomicU64::new(0),
                underrun_events: AtomicU64::new(0),
            }),
        })
    }

    fn build(&self) -> Result<ActiveStream> {
        let supported = device::pick_output_config(&self.device, self.rate_hz)?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(buffer_size) = device::pick_buffer_size(&supported) {
            config.buffer_size = buffer_size;
        }

        let device_rate = config.sample_rate;
        let device_channels = config.channels as usize;
        let queue = Arc::new(SharedAudio::new(
            device_channels,
            calc_max_buffered_samples(device_rate, device_channels, QUEUE_SECONDS),
        ));

        let resampler = if device_rate != self.rate_hz {
            tracing::info!(
                from_hz = self.rate_hz,
                to_hz = device_rate,
                "device cannot run at decoded rate; resampling"
            );
            Some(StreamResampler::new(
                self.rate_hz,
                device_rate,
                device_channels,
                RESAMPLE_CHUNK_FRAMES,
            )?)
        } else {
            None
        };

        let stream = build_output_stream(
            &self.device,
            &config,
            sample_format,
            queue.clone(),
            self.controls.clone(),
        )?;
        stream.play().context("start output stream")?;

        tracing::info!(
            device = %self.device_name,
            rate_hz = device_rate,
            channels = device_channels,
            format = ?sample_format,
            "output stream started"
        );

        Ok(ActiveStream {
            _stream: stream,
            queue,
            device_rate,
            device_channels,
            resampler,
            scratch: Vec::new(),
            tail: Vec::new(),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn set_rate(&mut self, rate_hz: u32) -> Result<()> {
        if rate_hz == 0 {
            return Err(anyhow!("invalid output rate 0"));
        }
        self.rate_hz = rate_hz;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.active.is_none() {
            self.active = Some(self.build()?);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            active.queue.close();
            active.queue.clear();
            let frames = self.controls.underrun_frames.swap(0, Ordering::Relaxed);
            let events = self.controls.underrun_events.swap(0, Ordering::Relaxed);
            tracing::debug!(
                device_rate = active.device_rate,
                underrun_frames = frames,
                underrun_events = events,
                "output stream stopped"
            );
        }
        Ok(())
    }

    fn write(&mut self, pcm: &[i16], channels: u16, timeout: Duration) -> Result<WriteOutcome> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| anyhow!("output stream not started"))?;

        let mut mapped = std::mem::take(&mut active.scratch);
        map_channels(pcm, channels as usize, active.device_channels, &mut mapped);

        let outcome = {
            let samples = match active.resampler.as_mut() {
                Some(resampler) => std::borrow::Cow::Owned(resampler.process(&mapped)?),
                None => std::borrow::Cow::Borrowed(mapped.as_slice()),
            };
            let accepted = active.queue.push_interleaved_timeout(&samples, timeout);
            if accepted < samples.len() {
                WriteOutcome::TimedOut
            } else {
                WriteOutcome::Written
            }
        };

        active.scratch = mapped;
        Ok(outcome)
    }

    fn drain(&mut self, timeout: Duration) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(true);
        };
        let deadline = Instant::now() + timeout;

        if let Some(resampler) = active.resampler.as_mut() {
            active.tail.extend(resampler.flush()?);
        }
        if !active.tail.is_empty() {
            let accepted = active.queue.push_interleaved_timeout(&active.tail, timeout);
            active.tail.drain(..accepted);
            if !active.tail.is_empty() {
                return Ok(false);
            }
        }
        if !self.controls.amplifier.load(Ordering::Relaxed) {
            // The callback does not consume while silenced.
            return Ok(active.queue.len_frames() == 0);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !active.queue.wait_drained(remaining) {
            return Ok(false);
        }
        // The callback may still hold its last refill.
        let held = Duration::from_secs_f64(
            REFILL_MAX_FRAMES as f64 / f64::from(active.device_rate.max(1)),
        );
        std::thread::sleep(held.min(deadline.saturating_duration_since(Instant::now())));
        tracing::debug!("output drained");
        Ok(true)
    }

    fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.controls
            .volume
            .store(percent.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn set_amplifier(&mut self, enabled: bool) -> Result<()> {
        self.controls.amplifier.store(enabled, Ordering::Relaxed);
        Ok(())
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: Arc<SharedAudio>,
    controls: Arc<Controls>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, controls),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, controls),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, controls),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, controls),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<SharedAudio>,
    controls: Arc<Controls>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let mut src: Vec<f32> = Vec::new();
    let mut pos = 0usize;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if !controls.amplifier.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let gain = gain_for(controls.volume.load(Ordering::Relaxed));

            for i in 0..data.len() {
                if pos >= src.len() {
                    pos = 0;
                    match queue.pop_nonblocking(REFILL_MAX_FRAMES) {
                        Some(v) => src = v,
                        None => {
                            src.clear();
                            let remaining = data.len() - i;
                            controls.underrun_events.fetch_add(1, Ordering::Relaxed);
                            controls
                                .underrun_frames
                                .fetch_add((remaining / channels) as u64, Ordering::Relaxed);
                            data[i..].fill(silence);
                            return;
                        }
                    }
                }
                data[i] = <T as cpal::Sample>::from_sample::<f32>(src[pos] * gain);
                pos += 1;
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Linear gain for a volume percentage.
fn gain_for(percent: u8) -> f32 {
    f32::from(percent.min(100)) / 100.0
}

/// Convert interleaved `i16` with `src_channels` into `f32` with `dst_channels`.
///
/// Mono is duplicated to every output channel, stereo is averaged down to mono,
/// other layouts copy matching channels and repeat the last source channel.
fn map_channels(pcm: &[i16], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let scale = 1.0 / 32_768.0;

    out.reserve(pcm.len() / src_channels * dst_channels);
    for frame in pcm.chunks_exact(src_channels) {
        match (src_channels, dst_channels) {
            (s, d) if s == d => out.extend(frame.iter().map(|&x| f32::from(x) * scale)),
            (2, 1) => out.push(0.5 * (f32::from(frame[0]) + f32::from(frame[1])) * scale),
            _ => {
                for ch in 0..dst_channels {
                    let x = frame[ch.min(src_channels - 1)];
                    out.push(f32::from(x) * scale);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_is_linear_and_clamped() {
        assert_eq!(gain_for(0), 0.0);
        assert_eq!(gain_for(50), 0.5);
        assert_eq!(gain_for(100), 1.0);
        assert_eq!(gain_for(200), 1.0);
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut out = Vec::new();
        map_channels(&[16_384, -16_384], 1, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut out = Vec::new();
        map_channels(&[16_384, 0, -32_768, -32_768], 2, 1, &mut out);
        assert_eq!(out, vec![0.25, -1.0]);
    }

    #[test]
    fn matching_layout_passes_through() {
        let mut out = vec![9.0];
        map_channels(&[0, 16_384], 2, 2, &mut out);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn stereo_to_surround_repeats_last_channel() {
        let mut out = Vec::new();
        map_channels(&[8_192, 16_384], 2, 4, &mut out);
        assert_eq!(out, vec![0.25, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn trailing_partial_frame_is_ignored() {
        let mut out = Vec::new();
        map_channels(&[0, 0, 0], 2, 2, &mut out);
        assert_eq!(out.len(), 2);
    }
}
