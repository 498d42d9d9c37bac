//! Bounded sample queue between the decode worker and the cpal callback.
//!
//! The worker pushes with a deadline (this is where backpressure happens: a full
//! device stalls the worker instead of dropping audio). The callback pops without
//! ever blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// `channels` is fixed for the lifetime of the queue; the output rebuilds its queue
/// whenever the stream layout changes.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    closed: bool,
}

/// Queue capacity in samples for `buffer_seconds` of audio at `(rate_hz, channels)`.
///
/// Non-finite or non-positive durations fall back to half a second.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.5
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::with_capacity(max_buffered_samples),
                closed: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Buffered frames right now (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.queue.len() / self.channels
    }

    /// Wake any blocked producer and refuse further samples.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Drop everything currently buffered.
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Wait until the consumer has taken every whole frame, or `timeout` elapses.
    ///
    /// Returns whether the queue drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock().unwrap();
        while g.queue.len() >= self.channels && !g.closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
        }
        true
    }

    /// Push interleaved samples, waiting for space until `timeout` elapses.
    ///
    /// Returns the number of samples accepted. Fewer than `samples.len()` means the
    /// deadline passed or the queue was closed.
    pub fn push_interleaved_timeout(&self, samples: &[f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;

        let mut g = self.inner.lock().unwrap();
        while offset < samples.len() {
            while g.queue.len() >= self.max_buffered_samples && !g.closed {
                let now = Instant::now();
                if now >= deadline {
                    return offset;
                }
                let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
                g = ng;
            }
            if g.closed {
                return offset;
            }

            let space = self.max_buffered_samples - g.queue.len();
            let take = space.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
        }
        offset
    }

    /// Pop up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` when no complete frame is buffered.
    pub fn pop_nonblocking(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        let take_frames = (g.queue.len() / self.channels).min(max_frames);
        let take_samples = take_frames * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        let remaining = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(remaining);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "output queue low watermark"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 1.0), 96_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 48_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 48_000);
        assert_eq!(calc_max_buffered_samples(0, 2, 1.0), 2);
    }

    #[test]
    fn pop_nonblocking_empty() {
        let q = SharedAudio::new(2, 16);
        assert!(q.pop_nonblocking(4).is_none());
    }

    #[test]
    fn pop_nonblocking_returns_whole_frames() {
        let q = SharedAudio::new(2, 64);
        q.push_interleaved_timeout(&[1.0, 2.0, 3.0, 4.0, 5.0], Duration::ZERO);

        let out = q.pop_nonblocking(8).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(q.pop_nonblocking(8).is_none());
    }

    #[test]
    fn push_times_out_when_full() {
        let q = SharedAudio::new(1, 4);
        let start = Instant::now();
        let accepted = q.push_interleaved_timeout(&[0.0; 6], Duration::from_millis(30));
        assert_eq!(accepted, 4);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(q.len_frames(), 4);
    }

    #[test]
    fn push_resumes_when_consumer_drains() {
        let q = Arc::new(SharedAudio::new(1, 4));
        let q_pop = q.clone();

        let handle = thread::spawn(move || {
            let mut got = 0;
            while got < 8 {
                if let Some(v) = q_pop.pop_nonblocking(2) {
                    got += v.len();
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            got
        });

        let accepted = q.push_interleaved_timeout(&[0.5; 8], Duration::from_secs(5));
        assert_eq!(accepted, 8);
        assert_eq!(handle.join().unwrap(), 8);
    }

    #[test]
    fn close_releases_blocked_producer() {
        let q = Arc::new(SharedAudio::new(1, 2));
        let q_close = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q_close.close();
        });
        let accepted = q.push_interleaved_timeout(&[0.0; 5], Duration::from_secs(5));
        assert_eq!(accepted, 2);
        handle.join().unwrap();
    }

    #[test]
    fn clear_drops_buffered_samples() {
        let q = SharedAudio::new(2, 16);
        q.push_interleaved_timeout(&[1.0; 8], Duration::ZERO);
        q.clear();
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn wait_drained_returns_once_consumer_empties_queue() {
        let q = Arc::new(SharedAudio::new(2, 64));
        q.push_interleaved_timeout(&[0.25; 16], Duration::ZERO);
        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            while q_pop.len_frames() > 0 {
                thread::sleep(Duration::from_millis(2));
                q_pop.pop_nonblocking(2);
            }
        });

        assert!(q.wait_drained(Duration::from_secs(5)));
        assert_eq!(q.len_frames(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn wait_drained_gives_up_without_consumer() {
        let q = SharedAudio::new(1, 8);
        q.push_interleaved_timeout(&[0.5; 4], Duration::ZERO);
        assert!(!q.wait_drained(Duration::from_millis(20)));
        assert_eq!(q.len_frames(), 4);
        assert!(SharedAudio::new(1, 8).wait_drained(Duration::ZERO));
    }
}
