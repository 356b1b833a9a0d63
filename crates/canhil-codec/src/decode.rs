//! Unpacking raw signal values out of frame payloads

use canhil_core::{ByteOrder, CanResult, Frame, Signal};

use crate::error::{CodecError, CodecResult};

/// Read a signal's raw value out of the payload.
pub fn extract_raw(data: &[u8], signal: &Signal) -> CodecResult<u64> {
    let payload_bits = data.len() * 8;
    let start = signal.start_bit as usize;
    let size = signal.bit_length as usize;
    if size == 0 || size > 64 || start + size > payload_bits {
        return Err(CodecError::BitRangeExceeded {
            signal: signal.name.clone(),
            start_bit: signal.start_bit,
            bit_length: signal.bit_length,
            payload_bits,
        });
    }

    let mut result = 0u64;
    match signal.byte_order {
        ByteOrder::Intel => {
            let mut remaining = size;
            let mut byte = start / 8;
            let mut bit_offset = start % 8;
            while remaining > 0 {
                let bits_here = remaining.min(8 - bit_offset);
                let mask = ((1u64 << bits_here) - 1) << bit_offset;
                let chunk = (data[byte] as u64 & mask) >> bit_offset;
                result |= chunk << (size - remaining);
                remaining -= bits_here;
                byte += 1;
                bit_offset = 0;
            }
        }
        ByteOrder::Motorola => {
            let mut bit_pos = start;
            for _ in 0..size {
                let byte = bit_pos / 8;
                let bit = 7 - (bit_pos % 8);
                result = (result << 1) | ((data[byte] >> bit) & 1) as u64;
                bit_pos += 1;
            }
        }
    }
    Ok(result)
}

/// Unpack a signal from a payload, returning `(raw, physical)`.
pub fn unpack(data: &[u8], signal: &Signal) -> CanResult<(u64, f64)> {
    let raw = extract_raw(data, signal)?;
    Ok((raw, signal.to_physical(raw)))
}

/// Decode one signal's physical value from a recorded frame.
pub fn decode_physical(frame: &Frame, signal: &Signal) -> CanResult<f64> {
    unpack(&frame.data, signal).map(|(_, physical)| physical)
}
