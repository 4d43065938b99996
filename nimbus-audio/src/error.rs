//! Error types for nimbus-audio
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. All frame-level failures are handled locally in the
//! component that detects them; nothing crosses the producer/consumer
//! boundary as an error.

use thiserror::Error;

/// Main error type for the audio pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound packet rejected at the boundary (size, truncation)
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Wire message buffer overflow on write
    #[error("Message write overflow: capacity {capacity}, needed {needed}")]
    MessageOverflow { capacity: usize, needed: usize },

    /// Compressed frame could not be decoded (frame is dropped)
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Frame encoding for the uplink path failed
    #[error("Audio encode error: {0}")]
    Encode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Hook registration errors
    #[error("Hook registration error: {0}")]
    HookRegistration(String),
}

/// Convenience Result type using nimbus-audio Error
pub type Result<T> = std::result::Result<T, Error>;
