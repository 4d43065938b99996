//! Negotiated stream parameters
//!
//! Parsed out of every SET/WRITE header. A change in any of the six
//! fields is a structural change that resets the whole pipeline.

use crate::protocol::RemoteMessage;
use crate::{Error, Result};

/// Sample rate bounds accepted from the host.
pub const SAMPLE_RATE_HZ_MIN: u32 = 4000;
pub const SAMPLE_RATE_HZ_MAX: u32 = 192000;

/// Logical output category; the host only negotiates music streams.
pub const STREAM_TYPE_MUSIC: i32 = 3;

/// Output channel arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

/// Device sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Pcm8,
    Pcm16,
    /// Platform default encoding (16-bit sample size)
    Default,
}

/// Which payload mode the stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Opus,
    Pcm,
}

/// The six-field negotiated format tuple. Equality over all fields
/// decides whether the pipeline must reconfigure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub stream_type: i32,
    pub sample_rate_hz: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    pub sample_size_bytes: usize,
    pub channel_count: usize,
}

impl StreamParams {
    /// Bytes of PCM the sink consumes per second at these parameters.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate_hz as usize * self.sample_size_bytes * self.channel_count
    }
}

/// Fully parsed SET/WRITE header: the parameter tuple plus the
/// per-message fields that are not part of the structural identity.
#[derive(Debug, Clone, Copy)]
pub struct WriteHeader {
    pub codec: StreamCodec,
    pub params: StreamParams,
    pub sample_interval_ms: u32,
    pub timestamp_us: i64,
    /// Negotiated device buffer size derived from rate and interval
    pub buffer_size_bytes: usize,
}

impl WriteHeader {
    /// Parse the header fields following the command word.
    ///
    /// The cursor must already be past the leading i32. Invalid
    /// channel counts, bit depths, or sample rates reject the whole
    /// message with no state change.
    pub fn parse(msg: &mut RemoteMessage) -> Result<Self> {
        let codec = match msg.read_i32() {
            0 => StreamCodec::Opus,
            _ => StreamCodec::Pcm,
        };

        let channels = msg.read_u8();
        let channel_layout = match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            other => {
                return Err(Error::MalformedMessage(format!(
                    "invalid channel count {}",
                    other
                )))
            }
        };

        let bit_depth = msg.read_u8();
        let (sample_format, sample_size_bytes) = match bit_depth {
            16 => (SampleFormat::Pcm16, 2),
            8 => (SampleFormat::Pcm8, 1),
            other => {
                return Err(Error::MalformedMessage(format!(
                    "invalid bit depth {}",
                    other
                )))
            }
        };

        let sample_rate = msg.read_i32();
        if sample_rate < SAMPLE_RATE_HZ_MIN as i32 || sample_rate > SAMPLE_RATE_HZ_MAX as i32 {
            return Err(Error::MalformedMessage(format!(
                "sample rate {} outside [{}, {}]",
                sample_rate, SAMPLE_RATE_HZ_MIN, SAMPLE_RATE_HZ_MAX
            )));
        }

        let sample_interval_ms = msg.read_i32().max(0) as u32;
        let timestamp_us = msg.read_i64();

        let channel_count = channels as usize;
        let bytes_per_sample = (bit_depth as usize / 8) * channel_count;
        let buffer_size_bytes =
            sample_rate as usize * sample_interval_ms as usize * bytes_per_sample / 1000;

        Ok(Self {
            codec,
            params: StreamParams {
                stream_type: STREAM_TYPE_MUSIC,
                sample_rate_hz: sample_rate as u32,
                channel_layout,
                sample_format,
                sample_size_bytes,
                channel_count,
            },
            sample_interval_ms,
            timestamp_us,
            buffer_size_bytes,
        })
    }
}
