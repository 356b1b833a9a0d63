//! Packing raw signal values into frame payloads

use canhil_core::{ByteOrder, CanResult, Message, Signal};

use crate::error::{CodecError, CodecResult};

/// Validate that a signal's bit span lies inside the payload.
fn check_span(signal: &Signal, payload_len: usize) -> CodecResult<()> {
    let payload_bits = payload_len * 8;
    let start = signal.start_bit as usize;
    let length = signal.bit_length as usize;
    if length == 0 || length > 64 || start + length > payload_bits {
        return Err(CodecError::BitRangeExceeded {
            signal: signal.name.clone(),
            start_bit: signal.start_bit,
            bit_length: signal.bit_length,
            payload_bits,
        });
    }
    Ok(())
}

/// Write a raw value into the payload at the signal's bit position.
///
/// Intel signals grow LSB-first from `start_bit`; Motorola signals are
/// written MSB-first walking the payload's big-endian bit raster.
pub fn insert_raw(data: &mut [u8], signal: &Signal, raw: u64) -> CodecResult<()> {
    check_span(signal, data.len())?;
    let size = signal.bit_length as usize;
    let raw = raw & signal.raw_mask();

    match signal.byte_order {
        ByteOrder::Intel => {
            let mut remaining = size;
            let mut byte = signal.start_bit as usize / 8;
            let mut bit_offset = signal.start_bit as usize % 8;
            while remaining > 0 {
                let bits_here = remaining.min(8 - bit_offset);
                let mask = (((1u64 << bits_here) - 1) << bit_offset) as u8;
                let chunk = ((raw >> (size - remaining)) as u8) << bit_offset;
                data[byte] = (data[byte] & !mask) | (chunk & mask);
                remaining -= bits_here;
                byte += 1;
                bit_offset = 0;
            }
        }
        ByteOrder::Motorola => {
            let mut bit_pos = signal.start_bit as usize;
            for i in 0..size {
                let byte = bit_pos / 8;
                let bit = 7 - (bit_pos % 8);
                let value = ((raw >> (size - 1 - i)) & 1) as u8;
                data[byte] = (data[byte] & !(1 << bit)) | (value << bit);
                bit_pos += 1;
            }
        }
    }
    Ok(())
}

/// Clamp and convert a physical value, then write it into the payload.
///
/// Returns the raw value that was written.
pub fn pack(data: &mut [u8], signal: &Signal, physical: f64) -> CanResult<u64> {
    let raw = signal.to_raw(physical)?;
    insert_raw(data, signal, raw)?;
    Ok(raw)
}

/// Re-encode a message's payload from every signal's stored raw value.
///
/// The payload is sized to the DLC; signals that were never written keep
/// their default raw of the catalogue load. Clears the dirty flag.
pub fn refresh_data(message: &mut Message) -> CanResult<()> {
    message.data.resize(message.dlc as usize, 0);
    // Borrow the payload separately from the signal map.
    let mut data = std::mem::take(&mut message.data);
    let mut result = Ok(());
    for signal in message.signals.values() {
        if let Err(e) = insert_raw(&mut data, signal, signal.raw) {
            result = Err(e);
            break;
        }
    }
    message.data = data;
    result?;
    message.dirty = false;
    Ok(())
}
