//! Common error type for the canhil stack

use thiserror::Error;

/// Result type for CAN stack operations
pub type CanResult<T> = Result<T, CanError>;

/// Errors that can occur across the CAN stack
#[derive(Debug, Error, Clone)]
pub enum CanError {
    /// Catalogue or call-site configuration problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Physical value or data length outside the declared range
    #[error("value error: {0}")]
    Value(String),

    /// Message id or name not present in the catalogue
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// Signal name not present in the message
    #[error("unknown signal '{signal}' in message {message}")]
    UnknownSignal { message: String, signal: String },

    /// Operation requires an open CAN channel
    #[error("CAN channel is not open")]
    NotOpen,

    /// UDS exchange attempted before `init_uds`
    #[error("UDS parameters are not initialized")]
    UdsNotInitialized,

    /// Hardware transmit/receive failure
    #[error("device error: {0}")]
    Device(String),
}

impl CanError {
    /// Whether the error is recoverable inside a transmit/receive loop.
    ///
    /// Transient device failures are logged and the loop continues to its
    /// next tick; every other class is fatal to the calling operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, CanError::Device(_))
    }
}
