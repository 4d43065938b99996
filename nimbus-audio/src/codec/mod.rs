//! Compressed frame codecs
//!
//! The pipeline treats codecs as byte-in/sample-out functions behind
//! [`FrameDecoder`]. Opus covers the compressed stream mode; the raw
//! mode is a little-endian byte-pair reassembly with no codec state.

mod opus_codec;
mod pcm;

pub use opus_codec::{OpusFrameDecoder, OpusFrameEncoder};
pub use pcm::PcmFrameDecoder;

use crate::Result;

/// Decoder sample rate fixed by the host's encoder.
pub const CODEC_SAMPLE_RATE: u32 = 48000;

/// Decoder channel count fixed by the host's encoder.
pub const CODEC_CHANNELS: usize = 2;

/// Largest encoded frame the uplink encoder may produce, in bytes.
pub const MAX_ENCODED_FRAME: usize = 3840;

/// Converts compressed payload bytes into interleaved i16 samples.
///
/// Returns the total number of samples written to `out`; zero or an
/// error means the frame is dropped and the pipeline continues.
pub trait FrameDecoder: Send {
    fn decode(&mut self, input: &[u8], out: &mut [i16]) -> Result<usize>;
}
