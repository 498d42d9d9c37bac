//! MPEG audio frame headers and sync search.
//!
//! Only Layer III is accepted; every other layer is treated as a false sync.

/// MPEG version from the two version bits of the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Parsed 4-byte Layer III frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub padding: bool,
    pub mono: bool,
}

impl FrameHeader {
    /// Parse a header from the first four bytes of `bytes`.
    ///
    /// Returns `None` for anything that is not a usable Layer III header: missing sync,
    /// reserved version, other layers, free-format or invalid bitrate, reserved rate.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let (b0, b1, b2, b3) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        if b0 != 0xFF || (b1 & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (b1 >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        if (b1 >> 1) & 0x03 != 1 {
            return None;
        }

        let bitrate_idx = (b2 >> 4) as usize;
        if bitrate_idx == 0 || bitrate_idx == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_V1_L3[bitrate_idx],
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => BITRATES_V2_L3[bitrate_idx],
        };

        let base_rate = match (b2 >> 2) & 0x03 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate_hz = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate_hz,
            padding: (b2 >> 1) & 0x01 == 1,
            mono: (b3 >> 6) == 0x03,
        })
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let coeff = match self.version {
            MpegVersion::Mpeg1 => 144_000,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72_000,
        };
        (coeff * self.bitrate_kbps / self.sample_rate_hz) as usize + usize::from(self.padding)
    }

    /// PCM samples per channel produced by one frame.
    pub fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }

    pub fn channels(&self) -> u16 {
        if self.mono { 1 } else { 2 }
    }

    /// Whether `other` can follow this frame in the same stream.
    fn continues_with(&self, other: &FrameHeader) -> bool {
        self.version == other.version && self.sample_rate_hz == other.sample_rate_hz
    }
}

/// Outcome of a sync search over a byte window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncResult {
    /// A frame starts at `offset` and lies completely inside the window.
    Found { offset: usize, header: FrameHeader },
    /// No complete frame yet; the first `skip` bytes can be dropped before refilling.
    NeedMore { skip: usize },
}

/// Locate the next complete Layer III frame in `input`.
///
/// A candidate is confirmed by a compatible header or a metadata tag right after it.
/// A candidate whose successor lies beyond the window is accepted as long as the
/// frame itself fits. An unconfirmed candidate is kept as a fallback and returned
/// when nothing later in the window syncs, so the last frame before trailing junk
/// is not lost.
pub fn find_frame(input: &[u8]) -> SyncResult {
    let len = input.len();
    let mut fallback: Option<(usize, FrameHeader)> = None;
    let mut i = 0;
    while i + 4 <= len {
        if let Some(header) = FrameHeader::parse(&input[i..]) {
            let end = i + header.frame_len();
            if end + 4 <= len {
                let next = &input[end..];
                match FrameHeader::parse(next) {
                    Some(next) if header.continues_with(&next) => {
                        return SyncResult::Found { offset: i, header };
                    }
                    _ if starts_with_tag(next) => {
                        return SyncResult::Found { offset: i, header };
                    }
                    _ => {
                        fallback.get_or_insert((i, header));
                    }
                }
            } else if end <= len {
                return SyncResult::Found { offset: i, header };
            } else {
                let skip = fallback.map_or(i, |(offset, _)| offset);
                return SyncResult::NeedMore { skip };
            }
        }
        i += 1;
    }
    if let Some((offset, header)) = fallback {
        return SyncResult::Found { offset, header };
    }
    // Keep a possible partial header at the tail.
    SyncResult::NeedMore {
        skip: len.saturating_sub(3),
    }
}

/// Whether `input` starts with an ID3v1, APEv2 or ID3v2 tag.
fn starts_with_tag(input: &[u8]) -> bool {
    input.starts_with(b"TAG") || input.starts_with(b"APETAGEX") || input.starts_with(b"ID3")
}

/// Length of an ID3v2 tag at the start of `input`, header and footer included.
///
/// Returns `None` if `input` does not start with a complete ID3v2 header.
pub fn id3v2_len(input: &[u8]) -> Option<usize> {
    if input.len() < 10 || &input[..3] != b"ID3" {
        return None;
    }
    let size_bytes = &input[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(*b));
    let footer = if input[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo, no padding: 417-byte frames.
    pub(crate) const HEADER_V1_128K: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

    /// Build `count` back-to-back frames with the given header and zeroed payload.
    pub(crate) fn frames(header: [u8; 4], count: usize) -> Vec<u8> {
        let len = FrameHeader::parse(&header).unwrap().frame_len();
        let mut out = Vec::with_capacity(len * count);
        for _ in 0..count {
            out.extend_from_slice(&header);
            out.resize(out.len() + len - 4, 0);
        }
        out
    }

    #[test]
    fn parse_mpeg1_layer3() {
        let h = FrameHeader::parse(&HEADER_V1_128K).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg1);
        assert_eq!(h.bitrate_kbps, 128);
        assert_eq!(h.sample_rate_hz, 44_100);
        assert_eq!(h.channels(), 2);
        assert_eq!(h.frame_len(), 417);
        assert_eq!(h.samples_per_frame(), 1152);
    }

    #[test]
    fn parse_padding_and_mono() {
        let h = FrameHeader::parse(&[0xFF, 0xFB, 0x92, 0xC0]).unwrap();
        assert!(h.padding);
        assert_eq!(h.frame_len(), 418);
        assert_eq!(h.channels(), 1);
    }

    #[test]
    fn parse_mpeg2_and_mpeg25() {
        let h = FrameHeader::parse(&[0xFF, 0xF3, 0x80, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg2);
        assert_eq!(h.sample_rate_hz, 22_050);
        assert_eq!(h.bitrate_kbps, 64);
        assert_eq!(h.frame_len(), 208);
        assert_eq!(h.samples_per_frame(), 576);

        let h = FrameHeader::parse(&[0xFF, 0xE3, 0x84, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg25);
        assert_eq!(h.sample_rate_hz, 12_000);
    }

    #[test]
    fn parse_rejects_other_layers_and_bad_fields() {
        // Layer I and Layer II.
        assert!(FrameHeader::parse(&[0xFF, 0xFF, 0x90, 0x00]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xFD, 0x90, 0x00]).is_none());
        // Free format and invalid bitrate.
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x00]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0xF0, 0x00]).is_none());
        // Reserved sample rate and reserved version.
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x9C, 0x00]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xEB, 0x90, 0x00]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x90]).is_none());
    }

    #[test]
    fn find_frame_at_start_of_stream() {
        let data = frames(HEADER_V1_128K, 3);
        match find_frame(&data) {
            SyncResult::Found { offset, header } => {
                assert_eq!(offset, 0);
                assert_eq!(header.frame_len(), 417);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn find_frame_skips_garbage_and_false_sync() {
        let mut data = vec![0x12, 0x34, 0xFF, 0xFB, 0x90, 0x00, 0x55];
        // The false sync above is not followed by a second header.
        data.resize(500, 0x55);
        let garbage = data.len();
        data.extend_from_slice(&frames(HEADER_V1_128K, 2));
        match find_frame(&data) {
            SyncResult::Found { offset, .. } => assert_eq!(offset, garbage),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn find_frame_needs_more_for_partial_frame() {
        let data = frames(HEADER_V1_128K, 1);
        let mut partial = vec![0u8; 10];
        partial.extend_from_slice(&data[..200]);
        assert_eq!(find_frame(&partial), SyncResult::NeedMore { skip: 10 });
    }

    #[test]
    fn find_frame_keeps_tail_when_nothing_found() {
        assert_eq!(find_frame(&[0u8; 64]), SyncResult::NeedMore { skip: 61 });
        assert_eq!(find_frame(&[0u8; 2]), SyncResult::NeedMore { skip: 0 });
    }

    #[test]
    fn last_frame_before_id3v1_tag_is_found() {
        let mut data = frames(HEADER_V1_128K, 2);
        data.extend_from_slice(b"TAG");
        data.resize(data.len() + 125, b' ');

        // Second call of a two-frame file: one frame, then the 128-byte tag.
        let tail = &data[417..];
        assert_eq!(tail.len(), 545);
        match find_frame(tail) {
            SyncResult::Found { offset, header } => {
                assert_eq!(offset, 0);
                assert_eq!(header.frame_len(), 417);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn last_frame_before_trailing_junk_is_found() {
        let mut data = frames(HEADER_V1_128K, 1);
        data.extend_from_slice(&[0x00; 64]);
        assert!(matches!(find_frame(&data), SyncResult::Found { offset: 0, .. }));
    }

    #[test]
    fn false_sync_is_kept_while_a_later_frame_is_incomplete() {
        let mut data = vec![0xFF, 0xFB, 0x90, 0x00];
        data.resize(450, 0x55);
        data.extend_from_slice(&frames(HEADER_V1_128K, 1)[..100]);
        assert_eq!(find_frame(&data), SyncResult::NeedMore { skip: 0 });
    }

    #[test]
    fn id3v2_len_reads_syncsafe_size() {
        let mut tag = b"ID3\x04\x00\x00".to_vec();
        tag.extend_from_slice(&[0x00, 0x00, 0x02, 0x01]);
        assert_eq!(id3v2_len(&tag), Some(10 + 257));

        tag[5] = 0x10;
        assert_eq!(id3v2_len(&tag), Some(10 + 257 + 10));

        assert_eq!(id3v2_len(b"ID3\x04"), None);
        assert_eq!(id3v2_len(&HEADER_V1_128K), None);
    }
}
