//! Command opcodes and the inbound packet boundary
//!
//! Every packet starts with a four-byte little-endian selector. Two
//! magic values mark play-data and volume frames; anything else is a
//! control frame whose big-endian opcode the session reads from the
//! message header.

use super::{AUDIO_PLAY_DATA, MAX_PACKET_LEN, SET_CLIENT_VOLUME};
use crate::{Error, Result};

/// Closed set of message opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set stream parameters
    Set,
    /// Start the player
    Start,
    /// Read captured audio (unused on the client)
    Read,
    /// Write a compressed audio frame
    WriteCompressed,
    /// Stop the player
    Stop,
    /// Destroy the player and release resources
    Destruct,
    /// Set playback volume
    SetVolume,
    /// Write a raw PCM frame
    WriteRaw,
}

impl Command {
    /// Decode a raw opcode. Unknown opcodes yield None and are logged
    /// and ignored by the caller.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Command::Set),
            1 => Some(Command::Start),
            2 => Some(Command::Read),
            3 => Some(Command::WriteCompressed),
            4 => Some(Command::Stop),
            5 => Some(Command::Destruct),
            6 => Some(Command::SetVolume),
            7 => Some(Command::WriteRaw),
            _ => None,
        }
    }
}

/// What kind of frame a packet carries, decided by the outer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Audio data frame: 30-byte header followed by the payload
    PlayData,
    /// Volume control frame
    Volume,
    /// Generic control frame; opcode in the message header
    Control,
}

/// Validate packet bounds and classify by the little-endian selector.
///
/// `declared_len` is the length the transport reported for this
/// packet; it must match the actual byte count. No state is mutated
/// on rejection.
pub fn classify_packet(data: &[u8], declared_len: usize) -> Result<PacketKind> {
    if declared_len != data.len() {
        return Err(Error::MalformedMessage(format!(
            "declared length {} does not match actual {}",
            declared_len,
            data.len()
        )));
    }
    if data.len() < 4 || data.len() > MAX_PACKET_LEN {
        return Err(Error::MalformedMessage(format!(
            "packet of {} bytes outside [4, {}]",
            data.len(),
            MAX_PACKET_LEN
        )));
    }

    let selector = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    Ok(match selector {
        AUDIO_PLAY_DATA => PacketKind::PlayData,
        SET_CLIENT_VOLUME => PacketKind::Volume,
        _ => PacketKind::Control,
    })
}
