use core::fmt;

/// An owned packet payload.
///
/// The cache queues these behind unresolved entries and hands them back out
/// either for transmission (on resolution) or to the drop sink (on retry
/// exhaustion).
pub struct PacketBuffer {
    pub payload: Vec<u8>,
}

impl PacketBuffer {
    /// Allocate a zeroed buffer of `reserved` bytes.
    pub fn new(reserved: usize) -> PacketBuffer {
        PacketBuffer {
            payload: vec![0; reserved],
        }
    }

    /// Copy `data` into a fresh buffer.
    pub fn from_bytes(data: &[u8]) -> PacketBuffer {
        PacketBuffer {
            payload: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Insert `header` in front of the current payload.
    pub fn prepend(&mut self, header: &[u8]) {
        self.payload.splice(0..0, header.iter().copied());
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketBuffer({} bytes)", self.payload.len())
    }
}
