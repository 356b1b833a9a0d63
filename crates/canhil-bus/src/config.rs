//! Bus configuration and device selection

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::CanDevice;
use crate::error::DeviceError;
use crate::mock::MockCanDevice;

/// Device selection, tagged by transport type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    /// SocketCAN channel (Linux only)
    SocketCan(SocketCanConfig),
    /// Mock device for tests and dry runs
    Mock(MockConfig),
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// SocketCAN channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// Interface name (e.g. "can0")
    pub channel: String,
    /// Arbitration bitrate; the interface must already be configured with it
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// FD data-phase bitrate; presence selects an FD socket
    #[serde(default)]
    pub data_rate: Option<u32>,
}

fn default_baud_rate() -> u32 {
    500_000
}

/// Mock device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {}

/// Create a device from configuration.
pub fn create_device(config: &BusConfig) -> Result<Arc<dyn CanDevice>, DeviceError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        BusConfig::SocketCan(cfg) => Ok(Arc::new(crate::socketcan::SocketCanDevice::new(cfg))),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        BusConfig::SocketCan(_) => Err(DeviceError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        BusConfig::Mock(_) => Ok(Arc::new(MockCanDevice::new())),
    }
}
