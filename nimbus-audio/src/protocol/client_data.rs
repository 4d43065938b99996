//! Outbound client → host reports
//!
//! The queue-size report is the one little-endian message the client
//! sends: 4-byte command word, 4-byte value. The main protocol is
//! big-endian; this micro-protocol is not. Both conventions are kept
//! for interoperability with the host side.

use super::SET_CLIENT_PLAY_QUEUE_SIZE;

/// Client playback state reported upstream for host-side pacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientQueueReport {
    queue_size: i32,
}

impl ClientQueueReport {
    pub fn new(queue_size: i32) -> Self {
        Self { queue_size }
    }

    pub fn set_queue_size(&mut self, queue_size: i32) {
        self.queue_size = queue_size;
    }

    pub fn queue_size(&self) -> i32 {
        self.queue_size
    }

    /// 8-byte little-endian "set client play queue size" message.
    pub fn to_wire(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&SET_CLIENT_PLAY_QUEUE_SIZE.to_le_bytes());
        data[4..].copy_from_slice(&self.queue_size.to_le_bytes());
        data
    }

    /// Compact 2-byte big-endian (network order) queue size.
    pub fn to_short_wire(&self) -> [u8; 2] {
        [(self.queue_size >> 8) as u8, self.queue_size as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_is_little_endian() {
        let report = ClientQueueReport::new(0x0102_0304);
        let wire = report.to_wire();
        // 16777217 = 0x01000001
        assert_eq!(&wire[..4], &[0x01, 0x00, 0x00, 0x01]);
        assert_eq!(&wire[4..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_short_wire_is_big_endian() {
        let report = ClientQueueReport::new(0x1234);
        assert_eq!(report.to_short_wire(), [0x12, 0x34]);
    }
}
