//! canhil-bus - Frame bus abstraction for the canhil stack
//!
//! The service layer talks to hardware only through the [`CanDevice`]
//! trait: `open`/`close`/`transmit`/`receive`/`is_open`. Implementations:
//! - [`mock::MockCanDevice`] for tests and dry runs
//! - `socketcan::SocketCanDevice` on Linux with the `socketcan` feature
//!
//! Vendor-specific register programming and hardware auto-detection are out
//! of scope; a channel is expected to be configured before `open`.

pub mod config;
pub mod device;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use config::{create_device, BusConfig, MockConfig, SocketCanConfig};
pub use device::CanDevice;
pub use error::DeviceError;
pub use mock::MockCanDevice;
