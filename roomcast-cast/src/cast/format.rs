//! Raw PCM stream format
//!
//! The decoder is always asked for signed 16-bit little-endian interleaved
//! samples; the multi-room server is configured for the same format.

use std::time::Duration;

/// Raw PCM format shared by decoder output, pacing and sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl PcmFormat {
    /// 44.1 kHz stereo s16le
    pub const CD: PcmFormat = PcmFormat {
        sample_rate: 44_100,
        channels: 2,
        bytes_per_sample: 2,
    };

    /// Bytes in one interleaved frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.frame_bytes() as u64
    }

    /// Byte count covering `duration`, rounded down to whole frames
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let bytes = duration.as_millis() as u64 * self.bytes_per_second() / 1000;
        self.align_down(bytes as usize)
    }

    /// Playback duration represented by `bytes`
    pub fn duration_of(&self, bytes: u64) -> Duration {
        let bps = self.bytes_per_second();
        Duration::from_secs(bytes / bps) + Duration::from_nanos((bytes % bps) * 1_000_000_000 / bps)
    }

    /// Round a byte count down to a whole number of frames
    pub fn align_down(&self, bytes: usize) -> usize {
        bytes - bytes % self.frame_bytes()
    }

    /// Zero-valued samples covering `duration`
    pub fn silence(&self, duration: Duration) -> Vec<u8> {
        vec![0u8; self.bytes_for(duration)]
    }

    /// ffmpeg sample format name
    pub fn ffmpeg_format(&self) -> &'static str {
        match self.bytes_per_sample {
            1 => "s8",
            3 => "s24le",
            4 => "s32le",
            _ => "s16le",
        }
    }

    /// ffmpeg codec name matching `ffmpeg_format`
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self.bytes_per_sample {
            1 => "pcm_s8",
            3 => "pcm_s24le",
            4 => "pcm_s32le",
            _ => "pcm_s16le",
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        PcmFormat::CD
    }
}
