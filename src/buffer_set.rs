//! Buffers shared between a connection driver and its state machines.

/// Buffer set for state machine operations.
///
/// The driver reads each backend message into `read_buffer`/`type_byte`
/// and writes out whatever a state machine left in `write_buffer`.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read (type byte and length stripped)
    pub read_buffer: Vec<u8>,
    /// Outgoing frontend messages
    pub write_buffer: Vec<u8>,
    /// Copy of the current RowDescription payload, kept while DataRows arrive
    pub column_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::with_capacity(512),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
