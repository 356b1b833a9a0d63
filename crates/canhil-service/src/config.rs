//! Service configuration
//!
//! Deserializable settings for the service layer: device selection,
//! receive-history sizing, shutdown behavior and UDS timing.

use canhil_bus::BusConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::CanService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Device selection
    #[serde(default)]
    pub bus: BusConfig,
    /// Receive history capacity (frames, drop-oldest)
    #[serde(default = "default_stack_capacity")]
    pub stack_capacity: usize,
    /// Bound on waiting for worker tasks at close
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// UDS timing parameters
    #[serde(default)]
    pub uds: UdsTimingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            stack_capacity: default_stack_capacity(),
            close_timeout_ms: default_close_timeout_ms(),
            uds: UdsTimingConfig::default(),
        }
    }
}

fn default_stack_capacity() -> usize {
    500_000
}

fn default_close_timeout_ms() -> u64 {
    2_000
}

/// UDS / ISO-TP timing and layout parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UdsTimingConfig {
    /// Diagnostics over CAN FD (64-byte transport frames)
    #[serde(default)]
    pub fd: bool,
    /// Bound on waiting for the peer's Flow Control
    #[serde(default = "default_flow_control_timeout_ms")]
    pub flow_control_timeout_ms: u64,
    /// Bound on waiting for the first response frame
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Separation time granted in our Flow Control frames
    #[serde(default = "default_st_min_ms")]
    pub st_min_ms: u8,
    /// Filler byte for transport frame padding
    #[serde(default = "default_padding")]
    pub padding: u8,
}

impl Default for UdsTimingConfig {
    fn default() -> Self {
        Self {
            fd: false,
            flow_control_timeout_ms: default_flow_control_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            st_min_ms: default_st_min_ms(),
            padding: default_padding(),
        }
    }
}

impl UdsTimingConfig {
    /// Transport frame size in bytes: 8 classic, 64 FD.
    pub fn frame_size(&self) -> usize {
        if self.fd {
            64
        } else {
            8
        }
    }
}

fn default_flow_control_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_st_min_ms() -> u8 {
    10
}

fn default_padding() -> u8 {
    0xAA
}
