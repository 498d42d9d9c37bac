//! Inline resampling for outputs that cannot run at the decoded rate.
//!
//! Uses Rubato's streaming sinc resampler on interleaved `f32`. Input is collected
//! until a full chunk is available, so output lags the input by at most one chunk.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
    ratio: f64,
    /// Input went in since the last flush.
    dirty: bool,
}

impl StreamResampler {
    /// Build a resampler from `src_rate` to `dst_rate` processing `chunk_frames` per step.
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(anyhow!("invalid resample rates {src_rate} -> {dst_rate}"));
        }
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);

        let f_ratio = dst_rate as f64 / src_rate as f64;
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;

        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out_interleaved: vec![0.0; channels * chunk_frames * 3],
            ratio: f_ratio,
            dirty: false,
        })
    }

    /// Feed interleaved input and return whatever output full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        self.dirty |= !input.is_empty();

        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };

        let mut start = 0;
        while self.pending.len() - start >= chunk_samples {
            let chunk = &self.pending[start..start + chunk_samples];
            let input_adapter = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

            let out_capacity_frames = self.out_interleaved.len() / self.channels;
            let mut output_adapter = InterleavedSlice::new_mut(
                &mut self.out_interleaved,
                self.channels,
                out_capacity_frames,
            )
            .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

            let (_nbr_in, nbr_out) = self
                .inner
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| anyhow!("resampler process: {e}"))?;

            produced.extend_from_slice(&self.out_interleaved[..nbr_out * self.channels]);
            start += chunk_samples;
        }
        self.pending.drain(..start);
        Ok(produced)
    }

    /// Push the held partial chunk and the filter delay out as output, then reset.
    ///
    /// Used at the end of a stream; a second call without new input returns nothing.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if !self.dirty {
            return Ok(Vec::new());
        }
        let tail_frames = self.pending.len() / self.channels;
        let wanted_frames =
            (tail_frames as f64 * self.ratio).ceil() as usize + self.inner.output_delay();
        let chunk_samples = self.chunk_frames * self.channels;

        let mut out = Vec::with_capacity(wanted_frames * self.channels);
        // Each zero-padded chunk yields output, so a few rounds cover any delay.
        for _ in 0..8 {
            if out.len() >= wanted_frames * self.channels {
                break;
            }
            let pad = chunk_samples - self.pending.len() % chunk_samples;
            self.pending.resize(self.pending.len() + pad, 0.0);
            out.extend(self.process(&[])?);
        }
        out.truncate(wanted_frames * self.channels);

        self.pending.clear();
        self.inner.reset();
        self.dirty = false;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rates() {
        assert!(StreamResampler::new(0, 48_000, 2, 256).is_err());
        assert!(StreamResampler::new(44_100, 0, 2, 256).is_err());
    }

    #[test]
    fn holds_input_until_a_full_chunk() {
        let mut r = StreamResampler::new(44_100, 48_000, 2, 256).unwrap();
        let out = r.process(&vec![0.0; 2 * 100]).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.pending.len(), 200);
    }

    #[test]
    fn upsampling_produces_roughly_scaled_output() {
        let mut r = StreamResampler::new(24_000, 48_000, 1, 512).unwrap();
        let mut total = 0;
        for _ in 0..20 {
            total += r.process(&vec![0.25; 512]).unwrap().len();
        }
        // 20 chunks in, roughly 40 chunks out once the filter delay is filled.
        assert!(total > 512 * 30, "got {total}");
        assert!(total <= 512 * 42, "got {total}");
        assert!(r.pending.is_empty());
    }

    #[test]
    fn flush_emits_the_held_tail_once() {
        let mut r = StreamResampler::new(44_100, 48_000, 2, 256).unwrap();
        assert!(r.process(&vec![0.5; 2 * 100]).unwrap().is_empty());

        let tail = r.flush().unwrap();
        // 100 frames scaled by 48k/44.1k, plus the filter delay.
        assert!(tail.len() >= 2 * 108, "got {}", tail.len());
        assert_eq!(tail.len() % 2, 0);
        assert!(r.pending.is_empty());
        assert!(r.flush().unwrap().is_empty());
    }

    #[test]
    fn flush_without_input_is_empty() {
        let mut r = StreamResampler::new(48_000, 44_100, 1, 128).unwrap();
        assert!(r.flush().unwrap().is_empty());
    }
}
