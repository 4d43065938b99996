//! Audio sink backends
//!
//! The consumer thread talks to a `Box<dyn AudioSink>` produced by a
//! [`SinkFactory`] whenever the negotiated stream parameters change.
//! The cpal backend owns its stream on a dedicated device thread
//! because cpal streams cannot cross threads; control flows over a
//! command channel. The simulated backend paces writes by wall clock
//! for headless hosts.

use crate::playback::params::StreamParams;
use crate::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retries before a full staging buffer starts dropping old samples.
const WRITE_FULL_RETRIES: u32 = 10;
const WRITE_FULL_BACKOFF: Duration = Duration::from_millis(1);

/// Staging depth relative to one negotiated device buffer.
const STAGING_BUFFERS: usize = 8;

/// Playback device abstraction used by the consumer thread.
///
/// Implementations are state machines: configured, playing, stopped,
/// released. Calls after `release` are no-ops.
pub trait AudioSink: Send {
    /// Begin or resume playback.
    fn start(&mut self) -> Result<()>;
    /// Pause playback without discarding buffered samples.
    fn stop(&mut self) -> Result<()>;
    /// Hand one decoded frame to the device.
    fn write(&mut self, samples: &[i16]) -> Result<()>;
    /// Discard all buffered but unplayed samples.
    fn flush(&mut self);
    /// Apply a normalized volume in [0.0, 1.0].
    fn set_volume(&mut self, volume: f32);
    /// Tear the device down. Idempotent.
    fn release(&mut self);
    fn is_playing(&self) -> bool;
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Builds a sink for a negotiated parameter set.
pub trait SinkFactory: Send + Sync {
    fn configure(&self, params: &StreamParams, buffer_size_bytes: usize)
        -> Result<Box<dyn AudioSink>>;
}

enum SinkCmd {
    Play,
    Pause,
    Shutdown,
}

/// Real audio output through cpal.
pub struct CpalSink {
    staging: Arc<Mutex<VecDeque<i16>>>,
    staging_cap: usize,
    volume: Arc<Mutex<f32>>,
    playing: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<SinkCmd>,
    thread: Option<JoinHandle<()>>,
    source_channels: usize,
    released: bool,
    drop_warned: bool,
}

impl CpalSink {
    /// Open the device and spin up the stream thread.
    ///
    /// Blocks until the device thread reports whether the stream could
    /// be built, so configuration failures surface synchronously.
    pub fn open(
        device_name: Option<String>,
        params: &StreamParams,
        buffer_size_bytes: usize,
    ) -> Result<Self> {
        let buffer_samples = (buffer_size_bytes / 2).max(1);
        let staging_cap = buffer_samples * STAGING_BUFFERS;

        let staging = Arc::new(Mutex::new(VecDeque::with_capacity(staging_cap)));
        let volume = Arc::new(Mutex::new(1.0f32));
        let playing = Arc::new(AtomicBool::new(false));

        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCmd>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread_staging = Arc::clone(&staging);
        let thread_volume = Arc::clone(&volume);
        let thread_params = *params;

        let thread = thread::Builder::new()
            .name("audio-device".to_string())
            .spawn(move || {
                device_thread(
                    device_name,
                    thread_params,
                    thread_staging,
                    thread_volume,
                    cmd_rx,
                    ready_tx,
                );
            })
            .map_err(|e| Error::AudioOutput(format!("failed to spawn device thread: {}", e)))?;

        // The thread sends exactly one readiness result after building
        // (or failing to build) the stream.
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::AudioOutput(
                    "device thread exited before reporting readiness".to_string(),
                ));
            }
        }

        info!(
            sample_rate = params.sample_rate_hz,
            channels = params.channel_count,
            staging_cap, "audio sink configured"
        );

        Ok(Self {
            staging,
            staging_cap,
            volume,
            playing,
            cmd_tx,
            thread: Some(thread),
            source_channels: params.channel_count,
            released: false,
            drop_warned: false,
        })
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self) -> Result<()> {
        if self.released || self.playing.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.cmd_tx
            .send(SinkCmd::Play)
            .map_err(|_| Error::AudioOutput("device thread gone".to_string()))?;
        self.playing.store(true, Ordering::SeqCst);
        debug!("audio sink playing");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.released || !self.playing.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.cmd_tx
            .send(SinkCmd::Pause)
            .map_err(|_| Error::AudioOutput("device thread gone".to_string()))?;
        self.playing.store(false, Ordering::SeqCst);
        debug!("audio sink paused");
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if self.released {
            return Ok(());
        }

        // Briefly wait for the callback to drain, then sacrifice the
        // oldest samples so fresh audio keeps flowing.
        for _ in 0..WRITE_FULL_RETRIES {
            if self.staging.lock().unwrap().len() + samples.len() <= self.staging_cap {
                break;
            }
            thread::sleep(WRITE_FULL_BACKOFF);
        }

        let mut staging = self.staging.lock().unwrap();
        let overflow = (staging.len() + samples.len()).saturating_sub(self.staging_cap);
        if overflow > 0 {
            let drop_count = overflow.min(staging.len());
            staging.drain(..drop_count);
            if !self.drop_warned {
                warn!(dropped = overflow, "staging buffer full, dropping oldest samples");
                self.drop_warned = true;
            }
        }
        staging.extend(samples.iter().copied());
        Ok(())
    }

    fn flush(&mut self) {
        self.staging.lock().unwrap().clear();
    }

    fn set_volume(&mut self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.playing.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(SinkCmd::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.staging.lock().unwrap().clear();
        debug!("audio sink released");
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs on the dedicated device thread: builds the stream, reports
/// readiness, then services play/pause commands until shutdown. The
/// stream lives and dies on this thread.
fn device_thread(
    device_name: Option<String>,
    params: StreamParams,
    staging: Arc<Mutex<VecDeque<i16>>>,
    volume: Arc<Mutex<f32>>,
    cmd_rx: mpsc::Receiver<SinkCmd>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let (device, config, sample_format) = match open_device(device_name, &params) {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let out_channels = config.channels as usize;
    let src_channels = params.channel_count;
    let err_fn = |err| warn!("audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => {
            let staging = Arc::clone(&staging);
            let volume = Arc::clone(&volume);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut staging = staging.lock().unwrap();
                    let gain = *volume.lock().unwrap();
                    for frame in data.chunks_mut(out_channels) {
                        let (left, right) = pop_frame(&mut staging, src_channels);
                        write_frame_f32(frame, left, right, gain);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let staging = Arc::clone(&staging);
            let volume = Arc::clone(&volume);
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut staging = staging.lock().unwrap();
                    let gain = *volume.lock().unwrap();
                    for frame in data.chunks_mut(out_channels) {
                        let (left, right) = pop_frame(&mut staging, src_channels);
                        write_frame_i16(frame, left, right, gain);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(Error::AudioOutput(format!(
                "unsupported device sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::AudioOutput(format!(
                "failed to build stream: {}",
                e
            ))));
            return;
        }
    };

    // Streams start paused; playback begins on the first Play command.
    if let Err(e) = stream.pause() {
        debug!("initial pause failed: {}", e);
    }
    let _ = ready_tx.send(Ok(()));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SinkCmd::Play => {
                if let Err(e) = stream.play() {
                    warn!("failed to start stream: {}", e);
                }
            }
            SinkCmd::Pause => {
                if let Err(e) = stream.pause() {
                    warn!("failed to pause stream: {}", e);
                }
            }
            SinkCmd::Shutdown => break,
        }
    }
    drop(stream);
}

/// Pop one interleaved source frame, silence when the buffer runs dry.
fn pop_frame(staging: &mut VecDeque<i16>, src_channels: usize) -> (i16, i16) {
    let left = staging.pop_front().unwrap_or(0);
    let right = if src_channels > 1 {
        staging.pop_front().unwrap_or(0)
    } else {
        left
    };
    (left, right)
}

fn write_frame_f32(frame: &mut [f32], left: i16, right: i16, gain: f32) {
    let scale = gain / i16::MAX as f32;
    frame[0] = (left as f32 * scale).clamp(-1.0, 1.0);
    if frame.len() > 1 {
        frame[1] = (right as f32 * scale).clamp(-1.0, 1.0);
    }
}

fn write_frame_i16(frame: &mut [i16], left: i16, right: i16, gain: f32) {
    frame[0] = (left as f32 * gain) as i16;
    if frame.len() > 1 {
        frame[1] = (right as f32 * gain) as i16;
    }
}

/// Find the output device and a config matching the negotiated format,
/// falling back to the default device and config.
fn open_device(
    device_name: Option<String>,
    params: &StreamParams,
) -> Result<(Device, StreamConfig, SampleFormat)> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name.as_ref() {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("failed to enumerate devices: {}", e)))?;
        match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            Some(dev) => {
                info!("using requested audio device: {}", name);
                dev
            }
            None => {
                warn!("device '{}' not found, falling back to default", name);
                host.default_output_device().ok_or_else(|| {
                    Error::AudioOutput(format!(
                        "device '{}' not found and no default device available",
                        name
                    ))
                })?
            }
        }
    } else {
        host.default_output_device()
            .ok_or_else(|| Error::AudioOutput("no default output device found".to_string()))?
    };

    let target_rate = params.sample_rate_hz;
    let target_channels = params.channel_count as u16;

    let preferred = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("failed to get device configs: {}", e)))?
        .find(|config| {
            config.channels() == target_channels
                && config.min_sample_rate().0 <= target_rate
                && config.max_sample_rate().0 >= target_rate
                && matches!(config.sample_format(), SampleFormat::F32 | SampleFormat::I16)
        });

    if let Some(supported) = preferred {
        let sample_format = supported.sample_format();
        let config = supported
            .with_sample_rate(cpal::SampleRate(target_rate))
            .config();
        return Ok((device, config, sample_format));
    }

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("failed to get default config: {}", e)))?;
    debug!(
        "no exact config match for {} Hz / {} ch, using device default",
        target_rate, target_channels
    );
    let sample_format = supported.sample_format();
    Ok((device, supported.config(), sample_format))
}

/// Factory for real device sinks.
pub struct CpalSinkFactory {
    device: Option<String>,
}

impl CpalSinkFactory {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn configure(
        &self,
        params: &StreamParams,
        buffer_size_bytes: usize,
    ) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalSink::open(
            self.device.clone(),
            params,
            buffer_size_bytes,
        )?))
    }
}

/// Headless sink that consumes samples at real-time rate.
///
/// Used when no output device exists (CI, servers). Writes sleep for
/// the wall-clock duration of the frame so upstream pacing behaves as
/// it would against hardware.
pub struct SimulatedSink {
    bytes_per_second: usize,
    playing: bool,
    released: bool,
    volume: f32,
}

impl SimulatedSink {
    pub fn new(params: &StreamParams) -> Self {
        Self {
            bytes_per_second: params.bytes_per_second().max(1),
            playing: false,
            released: false,
            volume: 1.0,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioSink for SimulatedSink {
    fn start(&mut self) -> Result<()> {
        if !self.released {
            self.playing = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.playing = false;
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let millis = samples.len() * 2 * 1000 / self.bytes_per_second;
        if millis > 0 {
            thread::sleep(Duration::from_millis(millis as u64));
        }
        Ok(())
    }

    fn flush(&mut self) {}

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn release(&mut self) {
        self.playing = false;
        self.released = true;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Factory for headless sinks.
pub struct SimulatedSinkFactory;

impl SinkFactory for SimulatedSinkFactory {
    fn configure(
        &self,
        params: &StreamParams,
        _buffer_size_bytes: usize,
    ) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(SimulatedSink::new(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::params::{
        ChannelLayout, SampleFormat as StreamSampleFormat, StreamCodec, WriteHeader,
    };
    use crate::protocol::RemoteMessage;

    fn test_params() -> StreamParams {
        StreamParams {
            stream_type: 3,
            sample_rate_hz: 48000,
            channel_layout: ChannelLayout::Stereo,
            sample_format: StreamSampleFormat::Pcm16,
            sample_size_bytes: 2,
            channel_count: 2,
        }
    }

    #[test]
    fn test_simulated_sink_state_machine() {
        let mut sink = SimulatedSink::new(&test_params());
        assert!(!sink.is_playing());
        assert!(sink.is_simulated());

        sink.start().unwrap();
        assert!(sink.is_playing());
        sink.stop().unwrap();
        assert!(!sink.is_playing());

        sink.release();
        sink.start().unwrap();
        // Start after release is a no-op
        assert!(!sink.is_playing());
    }

    #[test]
    fn test_simulated_write_paces_by_wall_clock() {
        let mut sink = SimulatedSink::new(&test_params());
        sink.start().unwrap();
        // 1920 samples at 192000 B/s is 20 ms of audio
        let frame = vec![0i16; 1920];
        let start = std::time::Instant::now();
        sink.write(&frame).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(18));
    }

    #[test]
    fn test_simulated_volume_clamps() {
        let mut sink = SimulatedSink::new(&test_params());
        sink.set_volume(1.5);
        assert_eq!(sink.volume(), 1.0);
        sink.set_volume(-0.2);
        assert_eq!(sink.volume(), 0.0);
        sink.set_volume(0.5);
        assert_eq!(sink.volume(), 0.5);
    }

    #[test]
    fn test_pop_frame_silence_and_mono_duplication() {
        let mut staging: VecDeque<i16> = VecDeque::new();
        assert_eq!(pop_frame(&mut staging, 2), (0, 0));

        staging.extend([100, -100]);
        assert_eq!(pop_frame(&mut staging, 2), (100, -100));

        staging.extend([42]);
        assert_eq!(pop_frame(&mut staging, 1), (42, 42));
    }

    #[test]
    fn test_frame_scaling() {
        let mut f32_frame = [0.0f32; 2];
        write_frame_f32(&mut f32_frame, i16::MAX, i16::MIN, 1.0);
        assert!((f32_frame[0] - 1.0).abs() < 1e-4);
        assert!((f32_frame[1] + 1.0).abs() < 1e-3);

        let mut i16_frame = [0i16; 2];
        write_frame_i16(&mut i16_frame, 1000, -1000, 0.5);
        assert_eq!(i16_frame[0], 500);
        assert_eq!(i16_frame[1], -500);
    }

    #[test]
    fn test_header_drives_sink_pacing() {
        // A parsed header's bytes-per-second feeds the simulated sink
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_be_bytes()); // raw mode
        bytes.push(2);
        bytes.push(16);
        bytes.extend_from_slice(&48000i32.to_be_bytes());
        bytes.extend_from_slice(&10i32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let mut msg = RemoteMessage::with_capacity(120);
        msg.init(&bytes).unwrap();
        let header = WriteHeader::parse(&mut msg).unwrap();
        assert_eq!(header.codec, StreamCodec::Pcm);

        let sink = SimulatedSink::new(&header.params);
        assert_eq!(sink.bytes_per_second, 192000);
    }
}
