//! Byte chunk framer
//!
//! Outgoing messages are split into chunks of at most [`CHUNK_LEN`] bytes,
//! one chunk per control transfer. Responses are reassembled into a single
//! fixed-capacity [`TransferBuffer`].

use super::channel::{Result, UsbError};
use super::protocol::{CHUNK_LEN, DATA_LEN};

/// Length-prefixed byte buffer with a fixed capacity of [`DATA_LEN`] bytes
#[derive(Clone)]
pub struct TransferBuffer {
    len: usize,
    data: [u8; DATA_LEN],
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.len)
            .field("data", &self.as_slice())
            .finish()
    }
}

impl TransferBuffer {
    pub const fn new() -> Self {
        Self {
            len: 0,
            data: [0; DATA_LEN],
        }
    }

    pub const fn capacity(&self) -> usize {
        DATA_LEN
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Append one byte, returns `false` when the buffer is full
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    /// Append as much of `bytes` as fits.
    ///
    /// Fails with [`UsbError::BufferOverflow`] when part of `bytes` had to be
    /// discarded; the bytes that fit are kept.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let room = self.capacity() - self.len;
        let taken = bytes.len().min(room);
        self.data[self.len..self.len + taken].copy_from_slice(&bytes[..taken]);
        self.len += taken;

        if taken < bytes.len() {
            return Err(UsbError::BufferOverflow {
                discarded: bytes.len() - taken,
            });
        }
        Ok(())
    }

    /// Consume the contents, leaving the buffer empty
    pub fn take(&mut self) -> Vec<u8> {
        let out = self.as_slice().to_vec();
        self.clear();
        out
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Split `payload` into transfer-sized chunks, in order.
///
/// A non-empty payload yields `ceil(len / 3)` chunks. An empty payload yields
/// a single empty chunk, so a poll still reaches the device.
pub fn split_for_send(payload: &[u8]) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![&payload[..0]];
    }
    payload.chunks(CHUNK_LEN).collect()
}

/// Extract the data bytes from one device response.
///
/// The device answers `[count, data...]`; `count` is clamped to the bytes
/// that actually arrived.
pub fn response_data(response: &[u8]) -> &[u8] {
    match response.split_first() {
        Some((&count, data)) => &data[..data.len().min(count as usize)],
        None => &[],
    }
}

/// Append the data of one response to the reassembly buffer
pub fn accumulate_received(buffer: &mut TransferBuffer, response: &[u8]) -> Result<()> {
    buffer.extend(response_data(response))
}
