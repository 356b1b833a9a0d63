//! Signal definition and physical/raw value conversion

use serde::{Deserialize, Serialize};

use crate::error::{CanError, CanResult};

/// Bit ordering of a signal inside the frame payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Little-endian (Intel); `start_bit` is the LSB
    #[default]
    Intel,
    /// Big-endian (Motorola); bits are read MSB-first from `start_bit`
    Motorola,
}

/// One bit-packed signal of a catalogue message.
///
/// `raw` holds the last raw value written through the codec; it always fits
/// in `bit_length` bits. The physical value is `raw * factor + offset`,
/// clamped to `[min, max]` before any physical-to-raw conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub start_bit: u16,
    pub bit_length: u8,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Last raw value, updated by the codec
    #[serde(skip)]
    pub raw: u64,
}

impl Signal {
    /// Bit mask covering `bit_length` bits.
    pub fn raw_mask(&self) -> u64 {
        if self.bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        }
    }

    /// Largest raw value representable in `bit_length` bits.
    pub fn max_raw(&self) -> u64 {
        self.raw_mask()
    }

    /// Convert a physical value to its raw representation.
    ///
    /// The value is clamped to `[min, max]` first, then scaled with
    /// `round((v - offset) / factor)`. Signed signals are stored as
    /// two's complement within `bit_length` bits.
    pub fn to_raw(&self, physical: f64) -> CanResult<u64> {
        if self.factor == 0.0 {
            return Err(CanError::Config(format!(
                "signal '{}' has factor 0",
                self.name
            )));
        }
        let clamped = physical.clamp(self.min, self.max);
        let scaled = ((clamped - self.offset) / self.factor).round();
        let raw = if self.signed {
            (scaled as i64 as u64) & self.raw_mask()
        } else if scaled <= 0.0 {
            0
        } else {
            (scaled as u64) & self.raw_mask()
        };
        Ok(raw)
    }

    /// Convert a raw value back to its physical representation, applying
    /// sign extension for signed signals.
    pub fn to_physical(&self, raw: u64) -> f64 {
        let value = if self.signed && self.bit_length < 64 {
            let sign_bit = 1u64 << (self.bit_length - 1);
            if raw & sign_bit != 0 {
                (raw | !self.raw_mask()) as i64 as f64
            } else {
                raw as f64
            }
        } else if self.signed {
            raw as i64 as f64
        } else {
            raw as f64
        };
        value * self.factor + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(bits: u8, signed: bool, factor: f64, offset: f64, min: f64, max: f64) -> Signal {
        Signal {
            name: "TestSig".to_string(),
            start_bit: 0,
            bit_length: bits,
            byte_order: ByteOrder::Intel,
            signed,
            factor,
            offset,
            min,
            max,
            unit: None,
            raw: 0,
        }
    }

    #[test]
    fn round_trip_equals_clamped_within_one_step() {
        let sig = signal(10, false, 0.5, -10.0, -10.0, 500.0);
        for &v in &[-10.0, 0.0, 12.3, 499.9, 600.0] {
            let raw = sig.to_raw(v).unwrap();
            let clamped = v.clamp(sig.min, sig.max);
            assert!((sig.to_physical(raw) - clamped).abs() <= sig.factor);
        }
    }

    #[test]
    fn signed_values_sign_extend() {
        let sig = signal(8, true, 1.0, 0.0, -128.0, 127.0);
        let raw = sig.to_raw(-5.0).unwrap();
        assert_eq!(raw, 0xFB);
        assert_eq!(sig.to_physical(raw), -5.0);
    }

    #[test]
    fn zero_factor_is_a_configuration_error() {
        let sig = signal(8, false, 0.0, 0.0, 0.0, 255.0);
        assert!(matches!(sig.to_raw(1.0), Err(CanError::Config(_))));
    }

    #[test]
    fn clamping_applies_before_raw_conversion() {
        let sig = signal(2, false, 1.0, 0.0, 0.0, 3.0);
        assert_eq!(sig.to_raw(250.0).unwrap(), 3);
        assert_eq!(sig.to_raw(-7.0).unwrap(), 0);
    }
}
