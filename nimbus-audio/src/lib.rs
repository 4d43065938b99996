//! # Nimbus Audio Client (nimbus-audio)
//!
//! Client-side audio pipeline of the Nimbus cloud-streaming client:
//! parses the remote host's binary audio command stream, decodes
//! compressed frames, paces them through a bounded jitter queue, and
//! feeds a real-time output device.
//!
//! **Architecture:** the network thread parses packets ([`protocol`])
//! and hands them to the [`playback::SessionRegistry`], which decodes
//! frames into pool slots and enqueues them; a consumer thread drains
//! the [`playback::PlaybackQueue`] into the audio sink.

pub mod codec;
pub mod error;
pub mod hooks;
pub mod playback;
pub mod protocol;

pub use error::{Error, Result};
