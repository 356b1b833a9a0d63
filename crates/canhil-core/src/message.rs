//! Catalogue message model

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CanError, CanResult};
use crate::frame::{Frame, FrameFlags};
use crate::signal::Signal;

/// Transmission policy of a catalogue message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendType {
    /// Retransmitted on a fixed period (`cycle_time_ms`)
    #[default]
    Cyclic,
    /// Sent `event_repeat_count` times at `event_cycle_time_ms` spacing
    Event,
    /// Cyclic baseline with event bursts on demand
    CyclicAndEvent,
}

/// Reference to a catalogue message, by id or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    Id(u32),
    Name(String),
}

impl From<u32> for MessageRef {
    fn from(id: u32) -> Self {
        MessageRef::Id(id)
    }
}

impl From<&str> for MessageRef {
    fn from(name: &str) -> Self {
        MessageRef::Name(name.to_string())
    }
}

/// A catalogue entry: identifier, signals, transmission policy and the
/// current payload bytes.
///
/// Messages are created once at catalogue load and mutated in place by
/// sends; the catalogue keeps a deep-copied backup for restoring defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u32,
    pub name: String,
    pub sender: String,
    /// 8 for classic CAN, up to 64 for CAN FD
    pub dlc: u8,
    pub signals: HashMap<String, Signal>,
    /// Current payload; `data.len() == dlc as usize`
    pub data: Vec<u8>,
    #[serde(default)]
    pub send_type: SendType,
    #[serde(default)]
    pub cycle_time_ms: u64,
    #[serde(default)]
    pub event_cycle_time_ms: u64,
    #[serde(default)]
    pub event_repeat_count: u32,
    /// Cooperative stop flag observed by the periodic transmit task
    #[serde(skip)]
    pub stop_flag: bool,
    /// Diagnostic request/response message (excluded from random stimulus)
    #[serde(default)]
    pub is_diagnostic: bool,
    /// Network-management message (excluded from random stimulus)
    #[serde(default)]
    pub is_network_management: bool,
    /// Set by signal writes until the payload is re-encoded
    #[serde(skip)]
    pub dirty: bool,
}

impl Message {
    /// Store a physical value into one signal and mark the message dirty.
    ///
    /// The payload bytes are not touched here; call the codec's
    /// `refresh_data` to re-pack `data` from the stored raw values.
    pub fn set_signal_physical(&mut self, name: &str, value: f64) -> CanResult<u64> {
        let message_name = self.name.clone();
        let signal = self
            .signals
            .get_mut(name)
            .ok_or_else(|| CanError::UnknownSignal {
                message: message_name,
                signal: name.to_string(),
            })?;
        let raw = signal.to_raw(value)?;
        signal.raw = raw;
        self.dirty = true;
        Ok(raw)
    }

    /// Validate the message before a send.
    ///
    /// In raw mode the payload length must match the DLC; otherwise every
    /// referenced signal name must exist in the message.
    pub fn check_message(&self, raw_mode: bool, signal_names: &[String]) -> CanResult<()> {
        if raw_mode {
            if self.data.len() != self.dlc as usize {
                return Err(CanError::Value(format!(
                    "message {} payload is {} bytes, dlc is {}",
                    self.name,
                    self.data.len(),
                    self.dlc
                )));
            }
            return Ok(());
        }
        for name in signal_names {
            if !self.signals.contains_key(name) {
                return Err(CanError::UnknownSignal {
                    message: self.name.clone(),
                    signal: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Snapshot the current payload as a transmit-ready frame.
    pub fn to_frame(&self) -> Frame {
        Frame::with_flags(
            self.id,
            self.data.clone(),
            FrameFlags {
                fd: self.dlc > 8,
                extended: self.id > 0x7FF,
            },
        )
    }

    /// Whether the message participates in random stimulus generation.
    pub fn is_stimulus_candidate(&self) -> bool {
        !self.is_diagnostic && !self.is_network_management
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ByteOrder;

    fn light_status_message() -> Message {
        let mut signals = HashMap::new();
        signals.insert(
            "BCM_LeftLightSt".to_string(),
            Signal {
                name: "BCM_LeftLightSt".to_string(),
                start_bit: 0,
                bit_length: 2,
                byte_order: ByteOrder::Intel,
                signed: false,
                factor: 1.0,
                offset: 0.0,
                min: 0.0,
                max: 3.0,
                unit: None,
                raw: 0,
            },
        );
        Message {
            id: 0x152,
            name: "BCM_Status".to_string(),
            sender: "BCM".to_string(),
            dlc: 8,
            signals,
            data: vec![0; 8],
            send_type: SendType::Cyclic,
            cycle_time_ms: 100,
            event_cycle_time_ms: 0,
            event_repeat_count: 0,
            stop_flag: false,
            is_diagnostic: false,
            is_network_management: false,
            dirty: false,
        }
    }

    #[test]
    fn set_signal_physical_stores_raw_and_marks_dirty() {
        let mut msg = light_status_message();
        let raw = msg.set_signal_physical("BCM_LeftLightSt", 2.0).unwrap();
        assert_eq!(raw, 2);
        assert!(msg.dirty);
        assert_eq!(msg.signals["BCM_LeftLightSt"].raw, 2);
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let mut msg = light_status_message();
        assert!(matches!(
            msg.set_signal_physical("NoSuchSignal", 1.0),
            Err(CanError::UnknownSignal { .. })
        ));
    }

    #[test]
    fn check_message_raw_mode_validates_length() {
        let mut msg = light_status_message();
        assert!(msg.check_message(true, &[]).is_ok());
        msg.data.truncate(4);
        assert!(msg.check_message(true, &[]).is_err());
    }

    #[test]
    fn check_message_signal_mode_validates_names() {
        let msg = light_status_message();
        assert!(msg
            .check_message(false, &["BCM_LeftLightSt".to_string()])
            .is_ok());
        assert!(msg
            .check_message(false, &["Missing".to_string()])
            .is_err());
    }
}
