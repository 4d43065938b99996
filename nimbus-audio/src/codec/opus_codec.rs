//! Opus decode and encode wrappers
//!
//! One stateful decoder handle per playback session, touched only by
//! the producer thread. The encoder serves the microphone uplink.

use super::{FrameDecoder, CODEC_CHANNELS, CODEC_SAMPLE_RATE, MAX_ENCODED_FRAME};
use crate::{Error, Result};
use opus::{Application, Channels, Decoder, Encoder};

fn channel_config(channels: usize) -> Result<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(Error::Decode(format!("unsupported channel count {}", other))),
    }
}

/// Stateful Opus decoder owning one codec handle.
pub struct OpusFrameDecoder {
    inner: Decoder,
    channels: usize,
}

impl OpusFrameDecoder {
    /// Create a decoder at the host's fixed 48 kHz stereo format.
    pub fn new() -> Result<Self> {
        Self::with_format(CODEC_SAMPLE_RATE, CODEC_CHANNELS)
    }

    pub fn with_format(sample_rate: u32, channels: usize) -> Result<Self> {
        let inner = Decoder::new(sample_rate, channel_config(channels)?)
            .map_err(|e| Error::Decode(format!("failed to create opus decoder: {}", e)))?;
        Ok(Self { inner, channels })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, input: &[u8], out: &mut [i16]) -> Result<usize> {
        let per_channel = self
            .inner
            .decode(input, out, false)
            .map_err(|e| Error::Decode(format!("opus decode failed: {}", e)))?;
        Ok(per_channel * self.channels)
    }
}

/// Opus encoder for the microphone uplink path.
pub struct OpusFrameEncoder {
    inner: Encoder,
}

impl OpusFrameEncoder {
    /// Create an encoder in constant-bitrate mode.
    pub fn new(sample_rate: u32, channels: usize, bitrate: i32) -> Result<Self> {
        let mut inner = Encoder::new(sample_rate, channel_config(channels)?, Application::Audio)
            .map_err(|e| Error::Encode(format!("failed to create opus encoder: {}", e)))?;
        inner
            .set_bitrate(opus::Bitrate::Bits(bitrate))
            .map_err(|e| Error::Encode(format!("failed to set bitrate {}: {}", bitrate, e)))?;
        inner
            .set_vbr(false)
            .map_err(|e| Error::Encode(format!("failed to set CBR mode: {}", e)))?;
        Ok(Self { inner })
    }

    /// Encode one frame of interleaved samples.
    pub fn encode(&mut self, input: &[i16]) -> Result<Vec<u8>> {
        self.inner
            .encode_vec(input, MAX_ENCODED_FRAME)
            .map_err(|e| Error::Encode(format!("opus encode failed: {}", e)))
    }
}
