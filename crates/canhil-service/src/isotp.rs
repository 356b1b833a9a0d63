//! ISO-TP (ISO 15765-2) frame layout
//!
//! Builds and parses the four transport frame types. All outgoing frames
//! are padded to the bus frame size with the configured filler byte.
//!
//! Wire layout:
//! - Single Frame: `[0x0N, payload…]` (N = length); on an FD bus payloads
//!   longer than 7 bytes use the escaped form `[0x00, len, payload…]`
//! - First Frame: `[0x10|len_hi, len_lo, payload…]`; lengths above 4095
//!   use the escaped form `[0x10, 0x00, len_be32, payload…]`
//! - Consecutive Frame: `[0x2N, payload…]` (N cycling 1..15)
//! - Flow Control: `[0x30, block_size, st_min_ms]` (block size 0 = unlimited)

use canhil_core::Frame;

/// Frame-type nibble values
const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// Flow status values for Flow Control frames
pub mod flow_status {
    /// Clear to send
    pub const CONTINUE: u8 = 0x0;
    /// Sender must wait for another Flow Control
    pub const WAIT: u8 = 0x1;
    /// Receiver cannot take the message
    pub const OVERFLOW: u8 = 0x2;
}

/// A parsed ISO-TP transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsoTpFrame {
    Single {
        payload: Vec<u8>,
    },
    First {
        total_len: usize,
        payload: Vec<u8>,
    },
    Consecutive {
        seq: u8,
        payload: Vec<u8>,
    },
    FlowControl {
        status: u8,
        block_size: u8,
        st_min_ms: u8,
    },
}

fn pad_to(mut data: Vec<u8>, frame_size: usize, padding: u8) -> Vec<u8> {
    data.resize(frame_size, padding);
    data
}

/// Largest payload that still fits a Single Frame.
pub fn single_frame_capacity(frame_size: usize) -> usize {
    if frame_size > 8 {
        // escaped form: [0x00, len, payload…]
        frame_size - 2
    } else {
        frame_size - 1
    }
}

/// Payload bytes carried by the First Frame for the given total length.
pub fn first_frame_capacity(frame_size: usize, total_len: usize) -> usize {
    if total_len > 0xFFF {
        // escaped form: [0x10, 0x00, len_be32, payload…]
        frame_size - 6
    } else {
        frame_size - 2
    }
}

/// Consecutive Frames needed after the First Frame.
pub fn expected_consecutive(total_len: usize, frame_size: usize) -> usize {
    let rest = total_len.saturating_sub(first_frame_capacity(frame_size, total_len));
    rest.div_ceil(frame_size - 1)
}

/// Build a Single Frame on the given id.
pub fn single_frame(id: u32, payload: &[u8], frame_size: usize, padding: u8) -> Frame {
    let mut data = Vec::with_capacity(frame_size);
    if frame_size > 8 && payload.len() > 7 {
        data.push(0x00);
        data.push(payload.len() as u8);
    } else {
        data.push(payload.len() as u8);
    }
    data.extend_from_slice(payload);
    Frame::new(id, pad_to(data, frame_size, padding))
}

/// Build the First Frame of a segmented transfer; returns the frame and the
/// number of payload bytes it carries.
pub fn first_frame(id: u32, payload: &[u8], frame_size: usize, padding: u8) -> (Frame, usize) {
    let total_len = payload.len();
    let chunk = first_frame_capacity(frame_size, total_len);
    let mut data = Vec::with_capacity(frame_size);
    if total_len > 0xFFF {
        data.push(0x10);
        data.push(0x00);
        data.extend_from_slice(&(total_len as u32).to_be_bytes());
    } else {
        data.push(0x10 | ((total_len >> 8) as u8 & 0x0F));
        data.push((total_len & 0xFF) as u8);
    }
    data.extend_from_slice(&payload[..chunk]);
    (Frame::new(id, pad_to(data, frame_size, padding)), chunk)
}

/// Build one Consecutive Frame.
pub fn consecutive_frame(id: u32, seq: u8, chunk: &[u8], frame_size: usize, padding: u8) -> Frame {
    let mut data = Vec::with_capacity(frame_size);
    data.push(0x20 | (seq & 0x0F));
    data.extend_from_slice(chunk);
    Frame::new(id, pad_to(data, frame_size, padding))
}

/// Build a Flow Control frame granting unlimited blocks at the given
/// separation time.
pub fn flow_control_frame(id: u32, st_min_ms: u8, frame_size: usize, padding: u8) -> Frame {
    Frame::new(
        id,
        pad_to(vec![0x30, 0x00, st_min_ms], frame_size, padding),
    )
}

/// Parse a received payload as an ISO-TP transport frame.
pub fn parse(data: &[u8], frame_size: usize) -> Option<IsoTpFrame> {
    let first = *data.first()?;
    match first >> 4 {
        PCI_SINGLE => {
            let (len, start) = if first == 0x00 && frame_size > 8 {
                (*data.get(1)? as usize, 2)
            } else {
                ((first & 0x0F) as usize, 1)
            };
            if len == 0 || data.len() < start + len {
                return None;
            }
            Some(IsoTpFrame::Single {
                payload: data[start..start + len].to_vec(),
            })
        }
        PCI_FIRST => {
            let short_len = (((first & 0x0F) as usize) << 8) | *data.get(1)? as usize;
            if short_len == 0 {
                // escaped form, 32-bit length
                let len_bytes: [u8; 4] = data.get(2..6)?.try_into().ok()?;
                let total_len = u32::from_be_bytes(len_bytes) as usize;
                Some(IsoTpFrame::First {
                    total_len,
                    payload: data.get(6..)?.to_vec(),
                })
            } else {
                Some(IsoTpFrame::First {
                    total_len: short_len,
                    payload: data.get(2..)?.to_vec(),
                })
            }
        }
        PCI_CONSECUTIVE => Some(IsoTpFrame::Consecutive {
            seq: first & 0x0F,
            payload: data.get(1..)?.to_vec(),
        }),
        PCI_FLOW_CONTROL => Some(IsoTpFrame::FlowControl {
            status: first & 0x0F,
            block_size: *data.get(1)?,
            st_min_ms: *data.get(2)?,
        }),
        _ => None,
    }
}

/// Whether a payload byte sequence starts an ISO-TP First Frame.
pub fn is_first_frame(data: &[u8]) -> bool {
    matches!(data.first(), Some(b) if b & 0xF0 == 0x10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAD: u8 = 0xAA;

    #[test]
    fn single_frame_classic_layout() {
        let frame = single_frame(0x712, &[0x22, 0xF1, 0x90], 8, PAD);
        assert_eq!(frame.data, vec![0x03, 0x22, 0xF1, 0x90, PAD, PAD, PAD, PAD]);
    }

    #[test]
    fn single_frame_fd_uses_escape_above_seven_bytes() {
        let payload: Vec<u8> = (0..20).collect();
        let frame = single_frame(0x712, &payload, 64, PAD);
        assert_eq!(frame.data[0], 0x00);
        assert_eq!(frame.data[1], 20);
        assert_eq!(&frame.data[2..22], payload.as_slice());
        assert_eq!(frame.data.len(), 64);
    }

    #[test]
    fn first_frame_carries_length_and_initial_chunk() {
        let payload: Vec<u8> = (0..20).collect();
        let (frame, chunk) = first_frame(0x712, &payload, 8, PAD);
        assert_eq!(chunk, 6);
        assert_eq!(frame.data[0], 0x10);
        assert_eq!(frame.data[1], 20);
        assert_eq!(&frame.data[2..8], &payload[..6]);
    }

    #[test]
    fn first_frame_escape_for_large_payloads() {
        let payload = vec![0x55u8; 5000];
        let (frame, chunk) = first_frame(0x712, &payload, 8, PAD);
        assert_eq!(chunk, 2);
        assert_eq!(&frame.data[..6], &[0x10, 0x00, 0x00, 0x00, 0x13, 0x88]);
        match parse(&frame.data, 8) {
            Some(IsoTpFrame::First { total_len, payload }) => {
                assert_eq!(total_len, 5000);
                assert_eq!(payload.len(), 2);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn expected_consecutive_matches_ceiling_formula() {
        // 20 bytes on a classic bus: 6 in the FF, 14 left, 2 CFs
        assert_eq!(expected_consecutive(20, 8), 2);
        // exactly one CF worth
        assert_eq!(expected_consecutive(13, 8), 1);
        assert_eq!(expected_consecutive(14, 8), 2);
        // FD bus
        assert_eq!(expected_consecutive(200, 64), 3);
    }

    #[test]
    fn parse_round_trips_all_frame_types() {
        assert_eq!(
            parse(&single_frame(0x712, &[1, 2], 8, PAD).data, 8),
            Some(IsoTpFrame::Single {
                payload: vec![1, 2]
            })
        );
        let cf = consecutive_frame(0x712, 3, &[9, 8, 7], 8, PAD);
        match parse(&cf.data, 8) {
            Some(IsoTpFrame::Consecutive { seq, payload }) => {
                assert_eq!(seq, 3);
                assert_eq!(&payload[..3], &[9, 8, 7]);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
        assert_eq!(
            parse(&flow_control_frame(0x712, 20, 8, PAD).data, 8),
            Some(IsoTpFrame::FlowControl {
                status: flow_status::CONTINUE,
                block_size: 0,
                st_min_ms: 20
            })
        );
    }

    #[test]
    fn first_frame_detection() {
        assert!(is_first_frame(&[0x10, 0x14]));
        assert!(is_first_frame(&[0x1F, 0xFF]));
        assert!(!is_first_frame(&[0x03, 0x22]));
        assert!(!is_first_frame(&[]));
    }
}
