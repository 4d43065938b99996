//! Session registry and packet routing
//!
//! The registry is the single entry point for inbound packets: it
//! validates and classifies each one, reuses one message buffer for
//! every header parse, and routes the resulting command to the right
//! session. It also owns the global mute flag, the registered hooks,
//! and the microphone uplink encoder.

use crate::codec::OpusFrameEncoder;
use crate::hooks::{SaveHook, SendHook};
use crate::playback::session::{PlaybackSession, SessionConfig};
use crate::playback::sink::SinkFactory;
use crate::protocol::{
    classify_packet, ClientQueueReport, Command, PacketKind, RemoteMessage, AUDIO_DATA_HEADER_LEN,
    AUDIO_MSG_LEN,
};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The host multiplexes one playback stream today; the registry still
/// keys sessions by stream id so a second stream is a map entry, not
/// a redesign.
const DEFAULT_STREAM: u32 = 0;

pub struct SessionRegistry {
    sessions: HashMap<u32, PlaybackSession>,
    cfg: SessionConfig,
    sink_factory: Arc<dyn SinkFactory>,
    muted: Arc<AtomicBool>,
    save_hook: Option<Arc<dyn SaveHook>>,
    send_hook: Option<Arc<dyn SendHook>>,
    uplink: Option<OpusFrameEncoder>,
    /// Reused header scratch buffer; one packet is parsed at a time
    msg: RemoteMessage,
}

impl SessionRegistry {
    pub fn new(cfg: SessionConfig, sink_factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            sessions: HashMap::new(),
            cfg,
            sink_factory,
            muted: Arc::new(AtomicBool::new(false)),
            save_hook: None,
            send_hook: None,
            uplink: None,
            msg: RemoteMessage::with_capacity(AUDIO_MSG_LEN * 4),
        }
    }

    /// Validate, classify, and dispatch one inbound packet.
    ///
    /// Rejected packets mutate no state. Unknown control opcodes are
    /// logged and ignored so a newer host does not kill the client.
    pub fn on_packet(&mut self, data: Bytes, declared_len: usize) -> Result<()> {
        let kind = classify_packet(&data, declared_len)?;

        let command = match kind {
            PacketKind::PlayData => {
                // Header bytes are copied into the scratch buffer; the
                // audio payload stays in the packet, referenced at its
                // fixed offset.
                let header_end = AUDIO_DATA_HEADER_LEN.min(data.len());
                self.msg.init(&data[..header_end])?;
                self.msg.set_payload(data.clone(), AUDIO_DATA_HEADER_LEN);
                let _ = self.msg.read_i32();
                Command::WriteCompressed
            }
            PacketKind::Volume => {
                self.msg.init(&data)?;
                let _ = self.msg.read_i32();
                Command::SetVolume
            }
            PacketKind::Control => {
                self.msg.init(&data)?;
                let raw = self.msg.read_i32();
                match Command::from_raw(raw) {
                    Some(command) => command,
                    None => {
                        warn!(opcode = raw, "unknown control opcode ignored");
                        return Ok(());
                    }
                }
            }
        };

        let cfg = self.cfg.clone();
        let sink_factory = Arc::clone(&self.sink_factory);
        let muted = Arc::clone(&self.muted);
        let save_hook = self.save_hook.clone();
        let session = self.sessions.entry(DEFAULT_STREAM).or_insert_with(|| {
            debug!(stream = DEFAULT_STREAM, "creating playback session");
            PlaybackSession::new(cfg, sink_factory, muted, save_hook)
        });
        session.on_message(command, &mut self.msg);

        if session.is_destroyed() {
            self.sessions.remove(&DEFAULT_STREAM);
            info!(stream = DEFAULT_STREAM, "session removed");
        }
        Ok(())
    }

    /// Register the decoded-audio hook. Registration is explicit;
    /// passing nothing is a caller bug, not a deregistration.
    pub fn register_save_hook(&mut self, hook: Option<Arc<dyn SaveHook>>) -> Result<()> {
        let hook =
            hook.ok_or_else(|| Error::HookRegistration("save hook must not be null".to_string()))?;
        self.save_hook = Some(hook);
        Ok(())
    }

    /// Register the uplink transport hook.
    pub fn register_send_hook(&mut self, hook: Option<Arc<dyn SendHook>>) -> Result<()> {
        let hook =
            hook.ok_or_else(|| Error::HookRegistration("send hook must not be null".to_string()))?;
        self.send_hook = Some(hook);
        Ok(())
    }

    /// Silence all output immediately without disturbing the pipeline.
    pub fn mute_all(&mut self) {
        self.muted.store(true, Ordering::SeqCst);
        for session in self.sessions.values_mut() {
            session.mute();
        }
        info!("playback muted");
    }

    /// Restore each session's saved volume.
    pub fn unmute_all(&mut self) {
        self.muted.store(false, Ordering::SeqCst);
        for session in self.sessions.values_mut() {
            session.unmute();
        }
        info!("playback unmuted");
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Stop feeding sinks without releasing any resources.
    pub fn stop_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.halt();
        }
    }

    /// Destroy every session and release all devices.
    pub fn shutdown(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.destroy();
        }
    }

    /// Current queue depth for host-side pacing.
    pub fn queue_report(&self) -> ClientQueueReport {
        let depth: usize = self.sessions.values().map(|s| s.queue_len()).sum();
        ClientQueueReport::new(depth as i32)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Create the microphone uplink encoder.
    pub fn init_uplink(&mut self, sample_rate: u32, channels: usize, bitrate: i32) -> Result<()> {
        self.uplink = Some(OpusFrameEncoder::new(sample_rate, channels, bitrate)?);
        info!(sample_rate, channels, bitrate, "uplink encoder ready");
        Ok(())
    }

    /// Encode one captured frame and push it through the send hook.
    pub fn uplink_audio(&mut self, samples: &[i16]) -> Result<()> {
        let encoder = self
            .uplink
            .as_mut()
            .ok_or_else(|| Error::InvalidState("uplink encoder not initialized".to_string()))?;
        let hook = self
            .send_hook
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no send hook registered".to_string()))?;
        let encoded = encoder.encode(samples)?;
        hook.send(&encoded)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
