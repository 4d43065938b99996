//! External collaborator hooks
//!
//! Registered by the embedding application: `SaveHook` receives every
//! decoded PCM frame (recording/diagnostics), `SendHook` carries
//! encoded microphone frames upstream. Both run on pipeline threads
//! and must not block for long.

use crate::Result;

/// Receives decoded playback audio as little-endian PCM bytes.
pub trait SaveHook: Send + Sync {
    fn save(&self, pcm: &[u8]);
}

/// Sends client-originated audio data to the remote host.
pub trait SendHook: Send + Sync {
    fn send(&self, data: &[u8]) -> Result<()>;
}

/// Convert interleaved samples to the little-endian byte layout the
/// hooks consume.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
