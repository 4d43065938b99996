//! Shared test doubles for pipeline integration tests

use nimbus_audio::playback::{AudioSink, SinkFactory, StreamParams};
use nimbus_audio::protocol::AUDIO_PLAY_DATA;
use nimbus_audio::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Observable state shared between a test and every sink the mock
/// factory hands out.
#[derive(Default)]
pub struct MockState {
    pub configures: AtomicUsize,
    pub releases: AtomicUsize,
    pub flushes: AtomicUsize,
    pub playing: AtomicBool,
    pub writes: Mutex<Vec<Vec<i16>>>,
    pub volumes: Mutex<Vec<f32>>,
}

impl MockState {
    pub fn configures(&self) -> usize {
        self.configures.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.volumes.lock().unwrap().last().copied()
    }
}

pub struct MockSink {
    state: Arc<MockState>,
    /// Per-write delay, simulating a slow device
    write_delay: Duration,
}

impl AudioSink for MockSink {
    fn start(&mut self) -> Result<()> {
        self.state.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.state.writes.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    fn flush(&mut self) {
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.volumes.lock().unwrap().push(volume);
    }

    fn release(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }
}

pub struct MockSinkFactory {
    pub state: Arc<MockState>,
    pub write_delay: Duration,
}

impl MockSinkFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            write_delay: Duration::ZERO,
        }
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(MockState::default()),
            write_delay: delay,
        }
    }
}

impl SinkFactory for MockSinkFactory {
    fn configure(
        &self,
        _params: &StreamParams,
        _buffer_size_bytes: usize,
    ) -> Result<Box<dyn AudioSink>> {
        self.state.configures.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSink {
            state: Arc::clone(&self.state),
            write_delay: self.write_delay,
        }))
    }
}

/// Factory whose device never opens; counts the attempts.
pub struct FailingSinkFactory {
    pub attempts: AtomicUsize,
}

impl FailingSinkFactory {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SinkFactory for FailingSinkFactory {
    fn configure(
        &self,
        _params: &StreamParams,
        _buffer_size_bytes: usize,
    ) -> Result<Box<dyn AudioSink>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(nimbus_audio::Error::AudioOutput(
            "no output device".to_string(),
        ))
    }
}

/// Build a complete play-data packet: little-endian outer selector,
/// big-endian header fields, then the payload.
pub fn play_data_packet(codec: i32, sample_rate: i32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&AUDIO_PLAY_DATA.to_le_bytes());
    data.extend_from_slice(&codec.to_be_bytes());
    data.push(2); // stereo
    data.push(16); // 16-bit
    data.extend_from_slice(&sample_rate.to_be_bytes());
    data.extend_from_slice(&10i32.to_be_bytes()); // interval ms
    data.extend_from_slice(&[0u8; 8]); // timestamp
    data.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    data.extend_from_slice(payload);
    data
}

/// Poll `cond` until it holds or the timeout expires.
pub fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
