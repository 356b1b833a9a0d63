//! Raw CAN frame as seen on the bus

use std::time::Instant;

/// Frame-level flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// CAN FD frame (payload up to 64 bytes)
    pub fd: bool,
    /// 29-bit extended identifier
    pub extended: bool,
}

/// A single CAN frame, immutable once recorded.
///
/// The timestamp is monotonic and set when the frame object is created,
/// i.e. at transmit time for outgoing frames and at poll time for
/// incoming ones.
#[derive(Debug, Clone)]
pub struct Frame {
    /// CAN identifier
    pub id: u32,
    /// Payload bytes; `data.len() == dlc as usize`
    pub data: Vec<u8>,
    /// Data length code (8 classic, up to 64 FD)
    pub dlc: u8,
    /// Monotonic capture timestamp
    pub timestamp: Instant,
    /// FD / extended-id flags
    pub flags: FrameFlags,
}

impl Frame {
    /// Create a frame stamped with the current instant.
    pub fn new(id: u32, data: Vec<u8>) -> Self {
        let dlc = data.len() as u8;
        let flags = FrameFlags {
            fd: data.len() > 8,
            extended: id > 0x7FF,
        };
        Self {
            id,
            data,
            dlc,
            timestamp: Instant::now(),
            flags,
        }
    }

    /// Create a frame with explicit flags (FD frames shorter than 8 bytes,
    /// extended ids in the standard range, ...).
    pub fn with_flags(id: u32, data: Vec<u8>, flags: FrameFlags) -> Self {
        let dlc = data.len() as u8;
        Self {
            id,
            data,
            dlc,
            timestamp: Instant::now(),
            flags,
        }
    }
}
