//! Binary wire protocol between the remote host and this client
//!
//! Two conventions coexist on purpose and must not be unified:
//!
//! - The main message protocol: a fixed-size header whose structured
//!   fields are **big-endian** ([`message::RemoteMessage`]).
//! - The four-byte outer frame selector at the start of every packet
//!   and the outbound queue-size report, both **little-endian**
//!   ([`command`], [`client_data`]).

pub mod client_data;
pub mod command;
pub mod message;

pub use client_data::ClientQueueReport;
pub use command::{classify_packet, Command, PacketKind};
pub use message::RemoteMessage;

/// Header length of a play-data frame in bytes; the audio payload
/// starts at this offset.
pub const AUDIO_DATA_HEADER_LEN: usize = 30;

/// Message buffer capacity in i32 slots
pub const AUDIO_MSG_LEN: usize = 30;

/// Maximum total inbound packet size in bytes
pub const MAX_PACKET_LEN: usize = 4096;

/// Outer selector marking a play-data frame (little-endian on the wire)
pub const AUDIO_PLAY_DATA: i32 = 16908289;

/// Outer selector marking a client volume frame (little-endian on the wire)
pub const SET_CLIENT_VOLUME: i32 = 16777218;

/// Outbound command word for the queue-size report (little-endian)
pub const SET_CLIENT_PLAY_QUEUE_SIZE: i32 = 16777217;
