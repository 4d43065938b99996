//! Jitter-buffered playback pipeline
//!
//! One [`PlaybackSession`] per logical stream: the producer (network
//! thread) decodes frames into a fixed slot pool and enqueues slot
//! indices; a dedicated consumer thread drains the queue into the
//! audio sink. The [`SessionRegistry`] is the composition-root owner
//! of all sessions and the global mute state.

pub mod params;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;

pub use params::{ChannelLayout, SampleFormat, StreamCodec, StreamParams, WriteHeader};
pub use pool::{FrameBuffer, FramePool};
pub use queue::{DequeueOutcome, PlaybackQueue};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, SessionConfig};
pub use sink::{AudioSink, CpalSinkFactory, SimulatedSink, SimulatedSinkFactory, SinkFactory};
