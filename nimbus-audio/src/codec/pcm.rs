//! Raw PCM stream mode
//!
//! When the negotiated format is uncompressed, decoding is replaced by
//! little-endian byte-pair reassembly: two input bytes per output
//! sample, low byte first.

use super::FrameDecoder;
use crate::Result;

/// Stateless raw-mode "decoder".
#[derive(Debug, Default)]
pub struct PcmFrameDecoder;

impl FrameDecoder for PcmFrameDecoder {
    fn decode(&mut self, input: &[u8], out: &mut [i16]) -> Result<usize> {
        let samples = (input.len() / 2).min(out.len());
        for (i, slot) in out.iter_mut().enumerate().take(samples) {
            *slot = i16::from_le_bytes([input[i * 2], input[i * 2 + 1]]);
        }
        Ok(samples)
    }
}
