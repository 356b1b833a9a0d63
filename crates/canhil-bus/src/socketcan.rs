//! SocketCAN device adapter (Linux)
//!
//! Adapts a raw SocketCAN socket to the [`CanDevice`] trait. The interface
//! is expected to be up and configured with the requested bitrates before
//! `open`; bit-timing programming needs netlink privileges and is left to
//! the host system.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use canhil_core::{Frame, FrameFlags};
use parking_lot::Mutex;
use socketcan::{
    CanAnyFrame, CanFdFrame, CanFdSocket, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id,
    Socket, StandardId,
};

use crate::config::SocketCanConfig;
use crate::device::CanDevice;
use crate::error::DeviceError;

enum SocketKind {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

/// SocketCAN adapter; FD sockets are selected when `data_rate` is set.
pub struct SocketCanDevice {
    config: SocketCanConfig,
    socket: Arc<Mutex<Option<SocketKind>>>,
    opened: AtomicBool,
}

impl SocketCanDevice {
    pub fn new(config: &SocketCanConfig) -> Self {
        Self {
            config: config.clone(),
            socket: Arc::new(Mutex::new(None)),
            opened: AtomicBool::new(false),
        }
    }

    fn make_id(id: u32) -> Result<Id, DeviceError> {
        if id <= 0x7FF {
            StandardId::new(id as u16)
                .map(Id::Standard)
                .ok_or_else(|| DeviceError::InvalidConfig(format!("invalid CAN id 0x{:X}", id)))
        } else {
            ExtendedId::new(id)
                .map(Id::Extended)
                .ok_or_else(|| DeviceError::InvalidConfig(format!("invalid CAN id 0x{:X}", id)))
        }
    }

    fn raw_id(id: Id) -> u32 {
        match id {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }
}

#[async_trait]
impl CanDevice for SocketCanDevice {
    async fn open(&self) -> Result<(), DeviceError> {
        let channel = self.config.channel.clone();
        let fd = self.config.data_rate.is_some();
        let kind = tokio::task::spawn_blocking(move || -> Result<SocketKind, DeviceError> {
            if fd {
                let socket = CanFdSocket::open(&channel)
                    .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;
                socket
                    .set_nonblocking(true)
                    .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;
                Ok(SocketKind::Fd(socket))
            } else {
                let socket = CanSocket::open(&channel)
                    .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;
                socket
                    .set_nonblocking(true)
                    .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;
                Ok(SocketKind::Classic(socket))
            }
        })
        .await
        .map_err(|e| DeviceError::OpenFailed(format!("task join error: {}", e)))??;

        *self.socket.lock() = Some(kind);
        self.opened.store(true, Ordering::SeqCst);
        tracing::info!(channel = %self.config.channel, fd, "SocketCAN channel opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.opened.store(false, Ordering::SeqCst);
        *self.socket.lock() = None;
        Ok(())
    }

    async fn transmit(&self, frame: &Frame) -> Result<(), DeviceError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(DeviceError::NotOpen);
        }
        let socket = self.socket.clone();
        let id = Self::make_id(frame.id)?;
        let data = frame.data.clone();
        let fd = frame.flags.fd;

        tokio::task::spawn_blocking(move || -> Result<(), DeviceError> {
            let guard = socket.lock();
            match guard.as_ref() {
                Some(SocketKind::Classic(socket)) => {
                    let frame = CanFrame::new(id, &data).ok_or_else(|| {
                        DeviceError::TransmitFailed("payload exceeds 8 bytes".to_string())
                    })?;
                    socket
                        .write_frame(&frame)
                        .map_err(|e| DeviceError::TransmitFailed(e.to_string()))
                }
                Some(SocketKind::Fd(socket)) => {
                    if fd || data.len() > 8 {
                        let frame = CanFdFrame::new(id, &data).ok_or_else(|| {
                            DeviceError::TransmitFailed("payload exceeds 64 bytes".to_string())
                        })?;
                        socket
                            .write_frame(&frame)
                            .map_err(|e| DeviceError::TransmitFailed(e.to_string()))
                    } else {
                        let frame = CanFrame::new(id, &data).ok_or_else(|| {
                            DeviceError::TransmitFailed("payload exceeds 8 bytes".to_string())
                        })?;
                        socket
                            .write_frame(&frame)
                            .map_err(|e| DeviceError::TransmitFailed(e.to_string()))
                    }
                }
                None => Err(DeviceError::NotOpen),
            }
        })
        .await
        .map_err(|e| DeviceError::TransmitFailed(format!("task join error: {}", e)))?
    }

    async fn receive(&self) -> Result<Option<Frame>, DeviceError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(DeviceError::NotOpen);
        }
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<Frame>, DeviceError> {
            let guard = socket.lock();
            match guard.as_ref() {
                Some(SocketKind::Classic(socket)) => match socket.read_frame() {
                    Ok(frame) => Ok(Some(Frame::with_flags(
                        Self::raw_id(frame.id()),
                        frame.data().to_vec(),
                        FrameFlags {
                            fd: false,
                            extended: frame.is_extended(),
                        },
                    ))),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(DeviceError::ReceiveFailed(e.to_string())),
                },
                Some(SocketKind::Fd(socket)) => match socket.read_frame() {
                    Ok(CanAnyFrame::Normal(frame)) => Ok(Some(Frame::with_flags(
                        Self::raw_id(frame.id()),
                        frame.data().to_vec(),
                        FrameFlags {
                            fd: false,
                            extended: frame.is_extended(),
                        },
                    ))),
                    Ok(CanAnyFrame::Fd(frame)) => Ok(Some(Frame::with_flags(
                        Self::raw_id(frame.id()),
                        frame.data().to_vec(),
                        FrameFlags {
                            fd: true,
                            extended: frame.is_extended(),
                        },
                    ))),
                    // Remote and error frames carry no payload of interest
                    Ok(_) => Ok(None),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(DeviceError::ReceiveFailed(e.to_string())),
                },
                None => Err(DeviceError::NotOpen),
            }
        })
        .await
        .map_err(|e| DeviceError::ReceiveFailed(format!("task join error: {}", e)))?
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }
}
