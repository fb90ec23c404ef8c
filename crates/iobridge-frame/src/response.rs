use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Shared transmit buffer for custom-space replies.
///
/// Handlers append at the running offset; several commands can be chained
/// into one outgoing packet before [`take`](Self::take) hands the bytes to
/// the transport. Writes that would exceed the capacity are refused whole,
/// so the buffer never holds a half-written field.
#[derive(Debug)]
pub struct ResponseBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ResponseBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Running offset: bytes written since the last take.
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn reserve(&self, extra: usize) -> Result<()> {
        if self.buf.len() + extra > self.capacity {
            return Err(FrameError::ResponseOverflow {
                len: self.buf.len(),
                extra,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.reserve(src.len())?;
        self.buf.put_slice(src);
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn put_i8(&mut self, v: i8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_i8(v);
        Ok(())
    }

    pub fn put_i16_le(&mut self, v: i16) -> Result<()> {
        self.reserve(2)?;
        self.buf.put_i16_le(v);
        Ok(())
    }

    pub fn put_u32_le(&mut self, v: u32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_u32_le(v);
        Ok(())
    }

    pub fn put_i32_le(&mut self, v: i32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_i32_le(v);
        Ok(())
    }

    /// Hand out the accumulated bytes and reset the offset to zero.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Discard accumulated bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Roll the running offset back to `offset`, dropping anything written
    /// after it. Has no effect when `offset` is past the current offset.
    pub fn truncate(&mut self, offset: usize) {
        self.buf.truncate(offset);
    }
}
