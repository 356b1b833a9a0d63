//! Device layer errors

use canhil_core::CanError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DeviceError {
    #[error("failed to open channel: {0}")]
    OpenFailed(String),

    #[error("device is not open")]
    NotOpen,

    #[error("transmit failed: {0}")]
    TransmitFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    #[error("device not supported: {0}")]
    Unsupported(String),
}

impl From<DeviceError> for CanError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotOpen => CanError::NotOpen,
            DeviceError::InvalidConfig(msg) => CanError::Config(msg),
            DeviceError::Unsupported(msg) => CanError::Config(msg),
            other => CanError::Device(other.to_string()),
        }
    }
}
