//! Fixed-format binary message reader/writer
//!
//! [`RemoteMessage`] wraps an owned fixed-size buffer with independent
//! read and write cursors. Structured header fields are big-endian.
//!
//! Reads past the logical length return 0 instead of failing, while
//! still advancing the cursor by the field width. Short control frames
//! from the host rely on this; do not tighten it. Truncated reads are
//! counted in `truncated_reads` so transport corruption stays visible.

use crate::{Error, Result};
use bytes::Bytes;

const SIZE_OF_I32: usize = 4;

/// Binary message over a fixed-size byte buffer.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
    payload: Option<Bytes>,
    payload_offset: usize,
    truncated_reads: u32,
}

impl RemoteMessage {
    /// Create an empty message with `size` bytes of capacity.
    ///
    /// The logical length starts at the full capacity, so a freshly
    /// constructed message can be written end to end.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            read_pos: 0,
            write_pos: 0,
            len: size,
            payload: None,
            payload_offset: 0,
            truncated_reads: 0,
        }
    }

    /// Load `bytes` into the buffer and reset both cursors.
    ///
    /// Fails if `bytes` exceeds the buffer capacity. The logical
    /// length becomes `bytes.len()`.
    pub fn init(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.buf.len() {
            return Err(Error::MalformedMessage(format!(
                "message of {} bytes exceeds buffer capacity {}",
                bytes.len(),
                self.buf.len()
            )));
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = bytes.len();
        self.payload = None;
        self.payload_offset = 0;
        self.truncated_reads = 0;
        Ok(())
    }

    /// Read a big-endian i32, advancing the cursor by 4.
    ///
    /// Bytes beyond the logical length contribute 0.
    pub fn read_i32(&mut self) -> i32 {
        let mut data: u32 = 0;
        let mut truncated = false;
        for i in 0..SIZE_OF_I32 {
            let index = self.read_pos + i;
            let byte = if index < self.len {
                self.buf[index]
            } else {
                truncated = true;
                0
            };
            data |= (byte as u32) << ((SIZE_OF_I32 - 1 - i) * 8);
        }
        if truncated {
            self.truncated_reads += 1;
        }
        self.read_pos += SIZE_OF_I32;
        data as i32
    }

    /// Read one byte, advancing the cursor by 1. Past-length reads
    /// yield 0.
    pub fn read_u8(&mut self) -> u8 {
        let data = if self.read_pos < self.len {
            self.buf[self.read_pos]
        } else {
            self.truncated_reads += 1;
            0
        };
        self.read_pos += 1;
        data
    }

    /// Read a 64-bit value composed from two 32-bit reads.
    ///
    /// The first word read is the LOW half, the second the HIGH half:
    /// `(high << 32) | (low & 0xFFFF_FFFF)`. This ordering is a wire
    /// format detail, not an implementation choice.
    pub fn read_i64(&mut self) -> i64 {
        let low = self.read_i32();
        let high = self.read_i32();
        ((high as i64) << 32) | (low as i64 & 0x0000_0000_ffff_ffff)
    }

    /// Read an f32 from the big-endian bit pattern of one i32.
    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_i32() as u32)
    }

    /// Write a big-endian i32 at the write cursor.
    ///
    /// Fails without writing if the value would exceed the logical
    /// length.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        if self.len < self.write_pos + SIZE_OF_I32 {
            return Err(Error::MessageOverflow {
                capacity: self.len,
                needed: self.write_pos + SIZE_OF_I32,
            });
        }
        self.buf[self.write_pos..self.write_pos + SIZE_OF_I32]
            .copy_from_slice(&value.to_be_bytes());
        self.write_pos += SIZE_OF_I32;
        Ok(())
    }

    /// Attach a zero-copy reference to externally owned payload bytes.
    ///
    /// `offset` is where the audio payload begins inside `payload`.
    pub fn set_payload(&mut self, payload: Bytes, offset: usize) {
        self.payload = Some(payload);
        self.payload_offset = offset;
    }

    /// The attached payload reference, if any.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Offset of the audio data inside the payload reference.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Logical message length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of reads that ran past the logical length since init.
    pub fn truncated_reads(&self) -> u32 {
        self.truncated_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_round_trip() {
        let mut msg = RemoteMessage::with_capacity(16);
        msg.write_i32(3).unwrap();
        msg.write_i32(-48000).unwrap();
        msg.write_i32(i32::MIN).unwrap();
        msg.write_i32(i32::MAX).unwrap();

        assert_eq!(msg.read_i32(), 3);
        assert_eq!(msg.read_i32(), -48000);
        assert_eq!(msg.read_i32(), i32::MIN);
        assert_eq!(msg.read_i32(), i32::MAX);
    }

    #[test]
    fn test_write_overflow_leaves_buffer_untouched() {
        let mut msg = RemoteMessage::with_capacity(4);
        msg.write_i32(7).unwrap();
        assert!(msg.write_i32(8).is_err());
        assert_eq!(msg.read_i32(), 7);
    }

    #[test]
    fn test_truncated_reads_return_zero_and_advance() {
        let mut msg = RemoteMessage::with_capacity(8);
        msg.init(&[0x00, 0x00, 0x00, 0x2a]).unwrap();

        assert_eq!(msg.read_i32(), 42);
        // Cursor is now at the logical length; reads keep advancing
        assert_eq!(msg.read_i32(), 0);
        assert_eq!(msg.read_u8(), 0);
        assert_eq!(msg.read_i32(), 0);
        assert_eq!(msg.truncated_reads(), 3);
    }

    #[test]
    fn test_partially_truncated_read() {
        let mut msg = RemoteMessage::with_capacity(8);
        msg.init(&[0x01, 0x02]).unwrap();
        // Missing low bytes contribute zero
        assert_eq!(msg.read_i32(), 0x0102_0000);
        assert_eq!(msg.truncated_reads(), 1);
    }

    #[test]
    fn test_long_composition_low_word_first() {
        let mut msg = RemoteMessage::with_capacity(8);
        msg.init(&[0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01])
            .unwrap();
        // low = 0xFFFFFFFF, high = 0x1 => 0x1FFFFFFFF
        assert_eq!(msg.read_i64(), 0x1_ffff_ffff);
    }

    #[test]
    fn test_byte_then_int_alignment() {
        let mut msg = RemoteMessage::with_capacity(8);
        msg.init(&[0x02, 0x10, 0x00, 0x00, 0xbb, 0x80]).unwrap();
        assert_eq!(msg.read_u8(), 2);
        assert_eq!(msg.read_u8(), 16);
        // Next int is partially past length: high bytes present
        assert_eq!(msg.read_i32(), 0x0000_bb80);
    }

    #[test]
    fn test_init_too_large_fails() {
        let mut msg = RemoteMessage::with_capacity(4);
        assert!(msg.init(&[0; 5]).is_err());
    }

    #[test]
    fn test_payload_reference_is_not_copied() {
        let data = Bytes::from_static(&[1u8, 2, 3, 4, 5, 6]);
        let mut msg = RemoteMessage::with_capacity(4);
        msg.set_payload(data.clone(), 2);
        assert_eq!(msg.payload_offset(), 2);
        assert_eq!(&msg.payload().unwrap()[2..], &[3, 4, 5, 6]);
    }
}
