//! Per-stream playback session
//!
//! Owns the decode pool, the frame queue, the sink handle, and the
//! consumer thread for one logical audio stream. The producer side
//! runs on the network thread via [`PlaybackSession::on_message`]; the
//! consumer thread drains decoded frames into the sink at its own
//! pace.

use crate::codec::{FrameDecoder, OpusFrameDecoder, PcmFrameDecoder};
use crate::hooks::{samples_to_le_bytes, SaveHook};
use crate::playback::params::{StreamCodec, StreamParams, WriteHeader};
use crate::playback::pool::{FrameBuffer, FramePool};
use crate::playback::queue::{DequeueOutcome, PlaybackQueue};
use crate::playback::sink::{AudioSink, SinkFactory};
use crate::protocol::{Command, RemoteMessage};
use nimbus_common::config::AudioSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Queue fill fraction that triggers producer backpressure and lets a
/// simulated sink skip frames to catch up.
const HIGH_WATER_NUM: usize = 3;
const HIGH_WATER_DEN: usize = 4;

/// Producer waits this many times before enqueueing over high water.
const BACKPRESSURE_RETRIES: u32 = 10;
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(1);

const DEFAULT_VOLUME: f32 = 50.0;
const VOLUME_EPSILON: f32 = 1e-6;

/// Pipeline tunables, usually sourced from the config file.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub pool_slots: usize,
    pub slot_samples: usize,
    pub consumer_timeout: Duration,
    pub resync_after: Duration,
    pub log_interval: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AudioSettings::default())
    }
}

impl From<&AudioSettings> for SessionConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            pool_slots: settings.pool_slots.max(2),
            slot_samples: settings.slot_samples.max(1),
            consumer_timeout: Duration::from_millis(settings.consumer_timeout_ms),
            resync_after: Duration::from_millis(settings.resync_after_ms),
            log_interval: settings.log_interval.max(1),
        }
    }
}

/// Everything the consumer thread needs, detached from the session so
/// the producer side keeps exclusive ownership of the rest.
struct ConsumerContext {
    queue: Arc<PlaybackQueue>,
    slots: Arc<Vec<Mutex<FrameBuffer>>>,
    sink: Arc<Mutex<Option<Box<dyn AudioSink>>>>,
    alive: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    timeout: Duration,
    pool_slots: usize,
}

pub struct PlaybackSession {
    cfg: SessionConfig,
    params: Option<StreamParams>,
    codec: Option<StreamCodec>,
    decoder: Option<Box<dyn FrameDecoder>>,
    sink: Arc<Mutex<Option<Box<dyn AudioSink>>>>,
    sink_factory: Arc<dyn SinkFactory>,
    pool: FramePool,
    queue: Arc<PlaybackQueue>,
    alive: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
    /// Raw host volume in [0, 100]
    volume: f32,
    last_overflow_check: Instant,
    feed_min: usize,
    feed_max: usize,
    feed_count: u64,
    save_hook: Option<Arc<dyn SaveHook>>,
    decode_failures: u64,
    /// Format the sink factory last failed on; retried only when the
    /// negotiated format actually changes
    sink_failed_for: Option<(StreamParams, StreamCodec)>,
    destroyed: bool,
}

impl PlaybackSession {
    pub fn new(
        cfg: SessionConfig,
        sink_factory: Arc<dyn SinkFactory>,
        muted: Arc<AtomicBool>,
        save_hook: Option<Arc<dyn SaveHook>>,
    ) -> Self {
        let pool = FramePool::new(cfg.pool_slots, cfg.slot_samples);
        Self {
            params: None,
            codec: None,
            decoder: None,
            sink: Arc::new(Mutex::new(None)),
            sink_factory,
            pool,
            queue: Arc::new(PlaybackQueue::new()),
            alive: Arc::new(AtomicBool::new(false)),
            muted,
            consumer: None,
            volume: DEFAULT_VOLUME,
            last_overflow_check: Instant::now(),
            feed_min: usize::MAX,
            feed_max: 0,
            feed_count: 0,
            save_hook,
            decode_failures: 0,
            sink_failed_for: None,
            destroyed: false,
            cfg,
        }
    }

    /// Dispatch one classified message. The cursor of `msg` must be
    /// positioned just past the leading command word.
    pub fn on_message(&mut self, command: Command, msg: &mut RemoteMessage) {
        if self.destroyed {
            debug!(?command, "message for destroyed session ignored");
            return;
        }
        match command {
            Command::Set => self.handle_set(msg),
            Command::Start => self.handle_start(),
            Command::Read => debug!("capture read is not supported on this client"),
            Command::Stop => self.handle_stop(),
            Command::Destruct => self.destroy(),
            Command::SetVolume => self.handle_set_volume(msg),
            Command::WriteCompressed | Command::WriteRaw => self.handle_write(command, msg),
        }
    }

    fn handle_set(&mut self, msg: &mut RemoteMessage) {
        let header = match WriteHeader::parse(msg) {
            Ok(header) => header,
            Err(e) => {
                warn!("rejecting SET with invalid parameters: {}", e);
                return;
            }
        };
        self.apply_params(&header, header.codec);
        self.start_consumer();
    }

    fn handle_start(&mut self) {
        let volume = self.effective_volume();
        let mut guard = self.sink.lock().unwrap();
        if let Some(sink) = guard.as_mut() {
            sink.set_volume(volume);
            if let Err(e) = sink.start() {
                warn!("failed to start playback: {}", e);
            }
        } else {
            debug!("START before parameters are negotiated, ignoring");
        }
    }

    fn handle_stop(&mut self) {
        let mut guard = self.sink.lock().unwrap();
        if let Some(sink) = guard.as_mut() {
            if let Err(e) = sink.stop() {
                warn!("failed to stop playback: {}", e);
            }
        }
    }

    fn handle_set_volume(&mut self, msg: &mut RemoteMessage) {
        let left = msg.read_f32();
        let _right = msg.read_f32();

        if self.muted.load(Ordering::SeqCst) {
            debug!("volume change while muted ignored");
            return;
        }

        // Accept the open interval plus the exact endpoints; out of
        // range values are ignored, not clamped.
        let accepted = (left > 0.0 && left < 100.0)
            || left.abs() < VOLUME_EPSILON
            || (left - 100.0).abs() < VOLUME_EPSILON;
        if !accepted {
            warn!(volume = left, "ignoring out-of-range volume");
            return;
        }

        self.volume = left;
        let mut guard = self.sink.lock().unwrap();
        if let Some(sink) = guard.as_mut() {
            sink.set_volume(left / 100.0);
            debug!(volume = left, "volume applied");
        }
    }

    fn handle_write(&mut self, command: Command, msg: &mut RemoteMessage) {
        let header = match WriteHeader::parse(msg) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping write with invalid header: {}", e);
                return;
            }
        };

        // The raw-write opcode overrides whatever the header claims.
        let codec = match command {
            Command::WriteRaw => StreamCodec::Pcm,
            _ => header.codec,
        };

        self.apply_params(&header, codec);
        self.start_consumer();

        let user_size = msg.read_i32();
        if user_size <= 0 {
            debug!(user_size, "write frame with no audio data");
            return;
        }
        self.queue_audio_data(msg, user_size as usize);
    }

    /// Reconfigure the pipeline when the negotiated format changes.
    ///
    /// A change in any parameter or in the codec flushes all in-flight
    /// audio: stale frames in the old format must never reach a sink
    /// configured for the new one. A sink that failed to configure is
    /// not retried until the format changes; the session stays
    /// sinkless but keeps decoding and queueing.
    fn apply_params(&mut self, header: &WriteHeader, codec: StreamCodec) {
        let format = (header.params, codec);
        let unchanged = self.params == Some(header.params)
            && self.codec == Some(codec)
            && self.decoder.is_some()
            && (self.sink.lock().unwrap().is_some() || self.sink_failed_for == Some(format));
        if unchanged {
            return;
        }

        info!(
            sample_rate = header.params.sample_rate_hz,
            channels = header.params.channel_count,
            ?codec,
            buffer_size = header.buffer_size_bytes,
            "stream parameters changed, reconfiguring pipeline"
        );

        self.queue.clear();
        self.pool.reset();

        self.decoder = match codec {
            StreamCodec::Pcm => Some(Box::new(PcmFrameDecoder) as Box<dyn FrameDecoder>),
            StreamCodec::Opus => match OpusFrameDecoder::new() {
                Ok(decoder) => Some(Box::new(decoder)),
                Err(e) => {
                    error!("cannot create decoder: {}", e);
                    None
                }
            },
        };

        let mut guard = self.sink.lock().unwrap();
        if let Some(old) = guard.as_mut() {
            old.release();
        }
        *guard = match self
            .sink_factory
            .configure(&header.params, header.buffer_size_bytes)
        {
            Ok(mut sink) => {
                sink.set_volume(self.effective_volume());
                self.sink_failed_for = None;
                Some(sink)
            }
            Err(e) => {
                error!("cannot configure audio sink, continuing without output: {}", e);
                self.sink_failed_for = Some(format);
                None
            }
        };
        drop(guard);

        self.params = Some(header.params);
        self.codec = Some(codec);
    }

    /// Decode the payload into a pool slot and hand it to the queue.
    fn queue_audio_data(&mut self, msg: &RemoteMessage, user_size: usize) {
        self.queue_size_check();

        let Some(payload) = msg.payload() else {
            self.decode_failures += 1;
            if self.decode_failures % self.cfg.log_interval as u64 == 1 {
                warn!("write frame carried no payload");
            }
            return;
        };
        let offset = msg.payload_offset();
        if offset >= payload.len() {
            return;
        }
        let end = (offset + user_size).min(payload.len());
        let audio = &payload[offset..end];

        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        let slot = self.pool.advance();
        {
            let mut frame = self.pool.slot(slot).lock().unwrap();
            let decoded = match decoder.decode(audio, frame.storage_mut()) {
                Ok(n) if n > 0 => n,
                Ok(_) => return,
                Err(e) => {
                    self.decode_failures += 1;
                    if self.decode_failures % self.cfg.log_interval as u64 == 1 {
                        warn!(failures = self.decode_failures, "frame decode failed: {}", e);
                    }
                    return;
                }
            };
            frame.set_len(decoded);

            if let Some(hook) = &self.save_hook {
                hook.save(&samples_to_le_bytes(frame.samples()));
            }
        }
        self.queue.enqueue(slot);

        // Feed-rate telemetry
        let depth = self.queue.len();
        self.feed_min = self.feed_min.min(depth);
        self.feed_max = self.feed_max.max(depth);
        self.feed_count += 1;
        if self.feed_count % self.cfg.log_interval as u64 == 0 {
            debug!(
                depth,
                min = self.feed_min,
                max = self.feed_max,
                frames = self.feed_count,
                "queue feed"
            );
        }
    }

    /// Detect a stalled or overfull queue before enqueueing.
    ///
    /// The overflow clock measures the gap since the previous check.
    /// A long gap means the stream paused and whatever is queued is
    /// stale; a nearly full queue means the consumer fell behind. Both
    /// resync by dropping all in-flight audio. After resync the
    /// producer briefly waits below the high-water mark.
    fn queue_size_check(&mut self) {
        let size = self.queue.len();
        let now = Instant::now();
        let gap = now.duration_since(self.last_overflow_check);
        self.last_overflow_check = now;

        if size > 0 && (gap > self.cfg.resync_after || size >= self.cfg.pool_slots - 1) {
            warn!(size, gap_ms = gap.as_millis() as u64, "resynchronizing playback queue");
            self.queue.clear();
            self.pool.reset();
            let mut guard = self.sink.lock().unwrap();
            if let Some(sink) = guard.as_mut() {
                sink.flush();
            }
        }

        let high_water = self.cfg.pool_slots * HIGH_WATER_NUM / HIGH_WATER_DEN;
        for _ in 0..BACKPRESSURE_RETRIES {
            if self.queue.len() < high_water {
                break;
            }
            thread::sleep(BACKPRESSURE_SLEEP);
        }
    }

    fn start_consumer(&mut self) {
        if self.alive.load(Ordering::SeqCst) {
            return;
        }
        // A previous consumer may have timed out; reap it first.
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        self.queue.clear();
        self.alive.store(true, Ordering::SeqCst);

        let ctx = ConsumerContext {
            queue: Arc::clone(&self.queue),
            slots: self.pool.shared_slots(),
            sink: Arc::clone(&self.sink),
            alive: Arc::clone(&self.alive),
            muted: Arc::clone(&self.muted),
            timeout: self.cfg.consumer_timeout,
            pool_slots: self.cfg.pool_slots,
        };

        match thread::Builder::new()
            .name("audio-consumer".to_string())
            .spawn(move || consumer_loop(ctx))
        {
            Ok(handle) => {
                self.consumer = Some(handle);
                info!("consumer thread started");
            }
            Err(e) => {
                self.alive.store(false, Ordering::SeqCst);
                error!("failed to spawn consumer thread: {}", e);
            }
        }
    }

    /// Tear down the whole pipeline. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        info!("destroying playback session");
        self.alive.store(false, Ordering::SeqCst);
        self.queue.interrupt();
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        self.queue.clear();

        let mut guard = self.sink.lock().unwrap();
        if let Some(mut sink) = guard.take() {
            sink.release();
        }
        drop(guard);

        self.decoder = None;
        self.params = None;
        self.codec = None;
        self.destroyed = true;
    }

    /// Silence output immediately. Frames keep decoding and queueing
    /// so unmute resumes with current audio.
    pub fn mute(&mut self) {
        let mut guard = self.sink.lock().unwrap();
        if let Some(sink) = guard.as_mut() {
            sink.set_volume(0.0);
        }
    }

    /// Restore the saved volume after a mute.
    pub fn unmute(&mut self) {
        let volume = self.volume / 100.0;
        let mut guard = self.sink.lock().unwrap();
        if let Some(sink) = guard.as_mut() {
            sink.set_volume(volume);
        }
    }

    /// Stop feeding the sink without releasing resources.
    pub fn halt(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.queue.interrupt();
    }

    fn effective_volume(&self) -> f32 {
        if self.muted.load(Ordering::SeqCst) {
            0.0
        } else {
            self.volume / 100.0
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_consumer_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Consumer thread body: drain the queue into the sink until timeout,
/// interrupt, or shutdown.
fn consumer_loop(ctx: ConsumerContext) {
    let high_water = ctx.pool_slots * HIGH_WATER_NUM / HIGH_WATER_DEN;
    while ctx.alive.load(Ordering::SeqCst) {
        match ctx.queue.dequeue_blocking(ctx.timeout) {
            DequeueOutcome::Interrupted => break,
            DequeueOutcome::TimedOut => {
                error!(
                    timeout_ms = ctx.timeout.as_millis() as u64,
                    "no frames arrived within the timeout, consumer stopping"
                );
                ctx.alive.store(false, Ordering::SeqCst);
                break;
            }
            DequeueOutcome::Frame(slot) => {
                let frame = ctx.slots[slot].lock().unwrap();
                if ctx.muted.load(Ordering::SeqCst) {
                    // Muted streams drop frames at the sink boundary
                    continue;
                }
                let mut guard = ctx.sink.lock().unwrap();
                let Some(sink) = guard.as_mut() else {
                    continue;
                };
                // A paced simulated sink cannot speed up; shed load by
                // skipping frames while the queue is over high water.
                if sink.is_simulated() && ctx.queue.len() >= high_water {
                    continue;
                }
                if !sink.is_playing() {
                    if let Err(e) = sink.start() {
                        warn!("cannot start sink from consumer: {}", e);
                        continue;
                    }
                }
                if let Err(e) = sink.write(frame.samples()) {
                    warn!("sink write failed: {}", e);
                }
            }
        }
    }
    debug!("consumer thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::SimulatedSinkFactory;
    use crate::protocol::AUDIO_DATA_HEADER_LEN;
    use bytes::Bytes;

    fn write_packet(cmd: i32, codec: i32, payload: &[u8]) -> (RemoteMessage, Bytes) {
        let mut header = Vec::new();
        header.extend_from_slice(&cmd.to_be_bytes());
        header.extend_from_slice(&codec.to_be_bytes());
        header.push(2); // channels
        header.push(16); // bit depth
        header.extend_from_slice(&48000i32.to_be_bytes());
        header.extend_from_slice(&10i32.to_be_bytes());
        header.extend_from_slice(&[0u8; 8]); // timestamp
        header.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        assert_eq!(header.len(), AUDIO_DATA_HEADER_LEN);

        let mut full = header.clone();
        full.extend_from_slice(payload);
        let bytes = Bytes::from(full);

        let mut msg = RemoteMessage::with_capacity(120);
        msg.init(&header).unwrap();
        msg.set_payload(bytes.clone(), header.len());
        // Session dispatch expects the command word consumed
        let _ = msg.read_i32();
        (msg, bytes)
    }

    fn test_session() -> PlaybackSession {
        let cfg = SessionConfig {
            pool_slots: 8,
            slot_samples: 1920,
            consumer_timeout: Duration::from_millis(100),
            resync_after: Duration::from_millis(200),
            log_interval: 200,
        };
        PlaybackSession::new(
            cfg,
            Arc::new(SimulatedSinkFactory),
            Arc::new(AtomicBool::new(false)),
            None,
        )
    }

    #[test]
    fn test_raw_write_starts_pipeline_and_queues() {
        let mut session = test_session();
        let pcm: Vec<u8> = (0..256u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
        let (mut msg, _bytes) = write_packet(7, 1, &pcm);

        session.on_message(Command::WriteRaw, &mut msg);
        assert!(session.is_consumer_alive());

        session.destroy();
        assert!(session.is_destroyed());
    }

    #[test]
    fn test_destroy_is_idempotent_and_stops_consumer() {
        let mut session = test_session();
        let (mut msg, _bytes) = write_packet(0, 1, &[]);
        session.on_message(Command::Set, &mut msg);
        assert!(session.is_consumer_alive());

        session.destroy();
        assert!(!session.is_consumer_alive());
        session.destroy();
        assert!(session.is_destroyed());

        // Messages after destruction are ignored
        let (mut msg2, _bytes2) = write_packet(0, 1, &[]);
        session.on_message(Command::Set, &mut msg2);
        assert!(!session.is_consumer_alive());
    }

    #[test]
    fn test_volume_acceptance_bounds() {
        let mut session = test_session();
        let (mut msg, _bytes) = write_packet(0, 1, &[]);
        session.on_message(Command::Set, &mut msg);

        let set_volume = |session: &mut PlaybackSession, value: f32| {
            let mut raw = Vec::new();
            raw.extend_from_slice(&6i32.to_be_bytes());
            raw.extend_from_slice(&value.to_bits().to_be_bytes());
            raw.extend_from_slice(&value.to_bits().to_be_bytes());
            let mut msg = RemoteMessage::with_capacity(120);
            msg.init(&raw).unwrap();
            let _ = msg.read_i32();
            session.on_message(Command::SetVolume, &mut msg);
        };

        set_volume(&mut session, 75.0);
        assert_eq!(session.volume(), 75.0);

        // Exact endpoints are accepted
        set_volume(&mut session, 0.0);
        assert_eq!(session.volume(), 0.0);
        set_volume(&mut session, 100.0);
        assert_eq!(session.volume(), 100.0);

        // Out-of-range values leave the saved volume unchanged
        set_volume(&mut session, -1.0);
        assert_eq!(session.volume(), 100.0);
        set_volume(&mut session, 101.0);
        assert_eq!(session.volume(), 100.0);

        session.destroy();
    }

    #[test]
    fn test_invalid_header_leaves_state_untouched() {
        let mut session = test_session();
        // Bad channel count
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.push(9);
        raw.push(16);
        raw.extend_from_slice(&48000i32.to_be_bytes());
        raw.extend_from_slice(&10i32.to_be_bytes());
        raw.extend_from_slice(&[0u8; 8]);
        let mut msg = RemoteMessage::with_capacity(120);
        msg.init(&raw).unwrap();
        let _ = msg.read_i32();

        session.on_message(Command::Set, &mut msg);
        assert!(!session.is_consumer_alive());
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_consumer_times_out_without_frames() {
        let mut session = test_session();
        let (mut msg, _bytes) = write_packet(0, 1, &[]);
        session.on_message(Command::Set, &mut msg);
        assert!(session.is_consumer_alive());

        // No frames arrive; the consumer must give up on its own
        thread::sleep(Duration::from_millis(300));
        assert!(!session.is_consumer_alive());

        // The next write restarts it exactly once
        let pcm: Vec<u8> = vec![0; 128];
        let (mut msg2, _bytes2) = write_packet(7, 1, &pcm);
        session.on_message(Command::WriteRaw, &mut msg2);
        assert!(session.is_consumer_alive());

        session.destroy();
    }
}
