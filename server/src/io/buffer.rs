//! Bounded byte buffers backing receive and send events.

use crate::config::{RECV_BUFFER_SIZE, SEND_BUFFER_SIZE, SEND_SMALL_BUFFER_SIZE};
use shared::PacketFormat;

/// Fixed-capacity buffer; bytes always start at offset 0.
///
/// `pop` shifts the remaining bytes to the front so the unused tail is
/// the largest contiguous free region.
pub struct IoEventData {
    buf: Box<[u8]>,
    size: usize,
}

impl IoEventData {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            size: 0,
        }
    }

    pub fn recv() -> Self {
        Self::with_capacity(RECV_BUFFER_SIZE)
    }

    pub fn send() -> Self {
        Self::with_capacity(SEND_BUFFER_SIZE)
    }

    pub fn small_send() -> Self {
        Self::with_capacity(SEND_SMALL_BUFFER_SIZE)
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn unused_size(&self) -> usize {
        self.capacity() - self.size
    }

    /// Bytes between begin and end.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// The free tail, starting at `end`.
    pub fn unused_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.size..]
    }

    /// Appends `data`; fails without side effects if it does not fit.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if data.len() > self.unused_size() {
            return false;
        }
        self.buf[self.size..self.size + data.len()].copy_from_slice(data);
        self.size += data.len();
        true
    }

    /// Marks `len` bytes already written into `unused_mut` as data.
    pub fn commit(&mut self, len: usize) -> bool {
        if len > self.unused_size() {
            return false;
        }
        self.size += len;
        true
    }

    pub fn push_packet<'a, P: PacketFormat<'a>>(&mut self, packet: &P) -> bool {
        match shared::packet::encode(packet, self.unused_mut()) {
            Some(written) => self.commit(written),
            None => false,
        }
    }

    /// Drops `len` bytes from the front.
    pub fn pop(&mut self, len: usize) {
        let len = len.min(self.size);
        if len == 0 {
            return;
        }
        self.buf.copy_within(len..self.size, 0);
        self.size -= len;
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }
}
