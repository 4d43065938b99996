//! Fixed slot pool for decoded frames
//!
//! Decoded PCM lands in a preallocated ring of slots so the steady
//! state never allocates. The producer claims slots round-robin; the
//! queue only ever holds slot indices, so its depth is bounded by the
//! pool size by construction.

use std::sync::{Arc, Mutex};

/// One decoded frame: a fixed sample buffer plus the valid length.
pub struct FrameBuffer {
    data: Box<[i16]>,
    len: usize,
}

impl FrameBuffer {
    fn new(samples: usize) -> Self {
        Self {
            data: vec![0i16; samples].into_boxed_slice(),
            len: 0,
        }
    }

    /// Mutable access to the full backing buffer for decode output.
    pub fn storage_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }

    /// Mark how many samples of the backing buffer are valid.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// The valid decoded samples.
    pub fn samples(&self) -> &[i16] {
        &self.data[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// Round-robin arena of frame slots shared between the producer and
/// the consumer thread.
pub struct FramePool {
    slots: Arc<Vec<Mutex<FrameBuffer>>>,
    cursor: usize,
}

impl FramePool {
    pub fn new(slot_count: usize, slot_samples: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| Mutex::new(FrameBuffer::new(slot_samples)))
            .collect();
        Self {
            slots: Arc::new(slots),
            cursor: 0,
        }
    }

    /// Advance the write cursor and return the claimed slot index.
    pub fn advance(&mut self) -> usize {
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.cursor
    }

    /// Rewind the cursor to the initial position. Used on resync so
    /// fresh audio starts from a clean window.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn slot(&self, index: usize) -> &Mutex<FrameBuffer> {
        &self.slots[index]
    }

    /// Clone of the slot arena for the consumer thread.
    pub fn shared_slots(&self) -> Arc<Vec<Mutex<FrameBuffer>>> {
        Arc::clone(&self.slots)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
