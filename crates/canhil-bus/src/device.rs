//! CAN device trait

use async_trait::async_trait;
use canhil_core::Frame;

use crate::error::DeviceError;

/// Transport-agnostic interface to a CAN channel.
///
/// This is the only seam through which the service layer touches hardware.
/// `receive` is a non-blocking poll; the receive pipeline drives it in a
/// loop with its own idle cadence.
#[async_trait]
pub trait CanDevice: Send + Sync {
    /// Bring the channel up with the configured bit timing.
    async fn open(&self) -> Result<(), DeviceError>;

    /// Tear the channel down. Idempotent.
    async fn close(&self) -> Result<(), DeviceError>;

    /// Put one frame on the wire.
    async fn transmit(&self, frame: &Frame) -> Result<(), DeviceError>;

    /// Poll for one received frame; `None` when the RX queue is empty.
    async fn receive(&self) -> Result<Option<Frame>, DeviceError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}
