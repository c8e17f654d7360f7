//! Reassembly of backend messages from an arbitrarily chunked byte stream.
//!
//! Every backend message is a type byte, a 4-byte big-endian length that
//! counts itself, and `length - 4` payload bytes. The transport feeds
//! whatever the socket returned into [`FrameDecoder::extend`] and asks for
//! the next complete frame; partial frames stay buffered until the rest
//! arrives.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};

/// Upper bound on a single backend message (1 GiB, the server's own limit).
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

const HEADER_LEN: usize = 5;

/// Buffers raw bytes and splits them into complete backend messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pos: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            pos: 0,
        }
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        // Compact before growing so consumed frames don't pin memory.
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > self.buf.capacity() / 2 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet handed out as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take a single raw byte (the SSLRequest reply is not framed).
    pub fn take_byte(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Split off the next complete frame as `(type_byte, payload)`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffered bytes are
    /// left untouched in that case.
    pub fn next_frame(&mut self) -> Result<Option<(u8, &[u8])>> {
        let available = &self.buf[self.pos..];
        let Some((header, rest)) = available.split_first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };

        let type_byte = header[0];
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length < 4 {
            return Err(Error::Protocol(format!(
                "Invalid message length: {}",
                length
            )));
        }
        if length > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!(
                "Message length {} exceeds limit of {} bytes",
                length, MAX_MESSAGE_LEN
            )));
        }

        let payload_len = length - 4;
        let Some(payload) = rest.get(..payload_len) else {
            return Ok(None);
        };

        self.pos += HEADER_LEN + payload_len;
        Ok(Some((type_byte, payload)))
    }

    /// Move the next complete frame into `buffer_set`.
    ///
    /// Returns `Ok(false)` when more bytes are needed.
    pub fn decode_into(&mut self, buffer_set: &mut BufferSet) -> Result<bool> {
        let Some((type_byte, payload)) = self.next_frame()? else {
            return Ok(false);
        };
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
        Ok(true)
    }
}
