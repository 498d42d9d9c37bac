//! Frame decoder adapter.
//!
//! Turns the unread region of the ingest window into one frame of interleaved `i16`
//! PCM per call. Codec state persists across calls and must be reset between files.
//!
//! The production implementation locates Layer III frames with [`crate::frame`] and
//! hands each one to Symphonia's MP3 codec.

use anyhow::Result;
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use crate::frame::{self, FrameHeader, SyncResult};

/// Result of one decode attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Bytes of input that can be dropped (skipped data plus the frame itself).
    pub consumed: usize,
    /// PCM samples per channel written to the output vector.
    pub samples: usize,
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub bitrate_kbps: u32,
}

impl DecodedFrame {
    /// Bytes were dropped but no audio was produced (tags, garbage, corrupt frames).
    pub fn skipped(consumed: usize) -> Self {
        Self {
            consumed,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.samples > 0
    }

    /// Nothing consumed and nothing produced: refill and retry.
    pub fn needs_more_data(&self) -> bool {
        self.consumed == 0 && self.samples == 0
    }
}

/// Single-frame decode capability used by the worker loop.
pub trait FrameDecoder: Send {
    /// Decode at most one frame from `input` into `pcm` (cleared first).
    fn decode_frame(&mut self, input: &[u8], pcm: &mut Vec<i16>) -> DecodedFrame;

    /// Forget all codec state carried over from the previous stream.
    fn reset(&mut self);
}

/// MP3 (MPEG-1/2/2.5 Layer III) decoder backed by Symphonia.
#[derive(Default)]
pub struct Mp3FrameDecoder {
    decoder: Option<Box<dyn Decoder>>,
    sample_buf: Option<SampleBuffer<i16>>,
    tag_remaining: usize,
    frames_decoded: u64,
}

impl Mp3FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_decoder(&mut self, header: &FrameHeader) -> Result<()> {
        if self.decoder.is_none() {
            self.decoder = Some(make_decoder(header)?);
        }
        Ok(())
    }
}

impl FrameDecoder for Mp3FrameDecoder {
    fn decode_frame(&mut self, input: &[u8], pcm: &mut Vec<i16>) -> DecodedFrame {
        pcm.clear();

        if self.tag_remaining > 0 {
            let n = self.tag_remaining.min(input.len());
            self.tag_remaining -= n;
            return DecodedFrame::skipped(n);
        }
        if let Some(tag_len) = frame::id3v2_len(input) {
            tracing::debug!(tag_len, "skipping ID3v2 tag");
            let n = tag_len.min(input.len());
            self.tag_remaining = tag_len - n;
            return DecodedFrame::skipped(n);
        }

        let (offset, header) = match frame::find_frame(input) {
            SyncResult::Found { offset, header } => (offset, header),
            SyncResult::NeedMore { skip } => return DecodedFrame::skipped(skip),
        };
        if offset > 0 {
            tracing::debug!(skipped = offset, "resynced to next frame");
        }
        let end = offset + header.frame_len();

        if let Err(e) = self.ensure_decoder(&header) {
            tracing::warn!("mp3 decoder init error: {e:#}");
            return DecodedFrame::skipped(end);
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return DecodedFrame::skipped(end);
        };

        let spf = header.samples_per_frame() as u64;
        let packet = Packet::new_from_slice(0, self.frames_decoded * spf, spf, &input[offset..end]);
        self.frames_decoded += 1;

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("skipping undecodable frame: {e}");
                return DecodedFrame::skipped(end);
            }
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return DecodedFrame::skipped(end);
        }

        let needed = frames * spec.channels.count();
        let reuse = self
            .sample_buf
            .as_ref()
            .is_some_and(|b| b.capacity() >= needed);
        if !reuse {
            self.sample_buf = Some(SampleBuffer::<i16>::new(decoded.frames() as u64, spec));
        }
        let Some(buf) = self.sample_buf.as_mut() else {
            return DecodedFrame::skipped(end);
        };
        buf.copy_interleaved_ref(decoded);
        pcm.extend_from_slice(buf.samples());

        DecodedFrame {
            consumed: end,
            samples: frames,
            channels: spec.channels.count() as u16,
            sample_rate_hz: spec.rate,
            bitrate_kbps: header.bitrate_kbps,
        }
    }

    fn reset(&mut self) {
        self.decoder = None;
        self.tag_remaining = 0;
        self.frames_decoded = 0;
    }
}

fn make_decoder(header: &FrameHeader) -> Result<Box<dyn Decoder>> {
    let channels = if header.mono {
        Channels::FRONT_CENTRE
    } else {
        Channels::FRONT_LEFT | Channels::FRONT_RIGHT
    };
    let mut params = CodecParameters::new();
    params
        .for_codec(CODEC_TYPE_MP3)
        .with_sample_rate(header.sample_rate_hz)
        .with_channels(channels);
    let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
    Ok(decoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{HEADER_V1_128K, frames};

    fn id3_tag(body_len: usize) -> Vec<u8> {
        let mut tag = b"ID3\x03\x00\x00".to_vec();
        tag.extend_from_slice(&[
            ((body_len >> 21) & 0x7F) as u8,
            ((body_len >> 14) & 0x7F) as u8,
            ((body_len >> 7) & 0x7F) as u8,
            (body_len & 0x7F) as u8,
        ]);
        tag.resize(10 + body_len, 0);
        tag
    }

    #[test]
    fn decoded_frame_flags() {
        assert!(DecodedFrame::default().needs_more_data());
        assert!(!DecodedFrame::skipped(3).needs_more_data());
        assert!(!DecodedFrame::skipped(3).is_valid());
    }

    #[test]
    fn decodes_frames_to_interleaved_pcm() {
        let mut dec = Mp3FrameDecoder::new();
        let input = frames(HEADER_V1_128K, 3);
        let mut pcm = Vec::new();

        let mut offset = 0;
        for _ in 0..3 {
            let out = dec.decode_frame(&input[offset..], &mut pcm);
            assert!(out.is_valid(), "{out:?}");
            assert_eq!(out.consumed, 417);
            assert_eq!(out.samples, 1152);
            assert_eq!(out.channels, 2);
            assert_eq!(out.sample_rate_hz, 44_100);
            assert_eq!(out.bitrate_kbps, 128);
            assert_eq!(pcm.len(), 2304);
            // Empty main data decodes to silence.
            assert!(pcm.iter().all(|&x| x == 0));
            offset += out.consumed;
        }
        assert_eq!(offset, input.len());
        assert_eq!(dec.frames_decoded, 3);
    }

    #[test]
    fn decodes_again_after_reset() {
        let mut dec = Mp3FrameDecoder::new();
        let input = frames(HEADER_V1_128K, 2);
        let mut pcm = Vec::new();
        assert!(dec.decode_frame(&input, &mut pcm).is_valid());

        dec.reset();
        assert!(dec.decoder.is_none());
        assert_eq!(dec.frames_decoded, 0);

        let out = dec.decode_frame(&input, &mut pcm);
        assert!(out.is_valid(), "{out:?}");
        assert_eq!(out.samples, 1152);
        assert_eq!(pcm.len(), 2304);
    }

    #[test]
    fn skips_id3_tag_in_one_call() {
        let mut dec = Mp3FrameDecoder::new();
        let mut input = id3_tag(100);
        input.extend_from_slice(&frames(HEADER_V1_128K, 2));
        let mut pcm = Vec::new();
        let out = dec.decode_frame(&input, &mut pcm);
        assert_eq!(out, DecodedFrame::skipped(110));
        assert!(pcm.is_empty());
    }

    #[test]
    fn skips_tag_larger_than_window_across_calls() {
        let mut dec = Mp3FrameDecoder::new();
        let tag = id3_tag(990);
        let mut pcm = Vec::new();

        let first = dec.decode_frame(&tag[..400], &mut pcm);
        assert_eq!(first.consumed, 400);
        let second = dec.decode_frame(&tag[400..800], &mut pcm);
        assert_eq!(second.consumed, 400);
        let third = dec.decode_frame(&tag[800..], &mut pcm);
        assert_eq!(third.consumed, 200);
        assert_eq!(dec.tag_remaining, 0);
    }

    #[test]
    fn reset_forgets_pending_tag() {
        let mut dec = Mp3FrameDecoder::new();
        let tag = id3_tag(990);
        let mut pcm = Vec::new();
        dec.decode_frame(&tag[..400], &mut pcm);
        dec.reset();

        let input = frames(HEADER_V1_128K, 2);
        let out = dec.decode_frame(&input, &mut pcm);
        assert_eq!(out.consumed, 417);
    }

    #[test]
    fn partial_frame_needs_more_data() {
        let mut dec = Mp3FrameDecoder::new();
        let input = frames(HEADER_V1_128K, 1);
        let mut pcm = vec![1, 2, 3];
        let out = dec.decode_frame(&input[..300], &mut pcm);
        assert!(out.needs_more_data());
        assert!(pcm.is_empty());
    }

    #[test]
    fn garbage_before_frame_is_consumed_with_the_frame() {
        let mut dec = Mp3FrameDecoder::new();
        let mut input = vec![0x42u8; 37];
        input.extend_from_slice(&frames(HEADER_V1_128K, 2));
        let mut pcm = Vec::new();
        let out = dec.decode_frame(&input, &mut pcm);
        assert_eq!(out.consumed, 37 + 417);
    }

    #[test]
    fn pure_garbage_is_dropped_except_tail() {
        let mut dec = Mp3FrameDecoder::new();
        let mut pcm = Vec::new();
        let out = dec.decode_frame(&[0x11u8; 100], &mut pcm);
        assert_eq!(out, DecodedFrame::skipped(97));
    }
}
