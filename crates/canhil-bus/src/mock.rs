//! Mock CAN device for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use canhil_core::Frame;
use parking_lot::{Mutex, RwLock};

use crate::device::CanDevice;
use crate::error::DeviceError;

type Responder = Box<dyn Fn(&Frame) -> Vec<Frame> + Send + Sync>;

/// Mock CAN device: records transmitted frames and serves scripted
/// incoming traffic.
///
/// An optional auto-responder closure maps each transmitted frame to a
/// list of frames queued for reception, which lets tests emulate an ECU's
/// flow-control and response behavior.
#[derive(Default)]
pub struct MockCanDevice {
    open: AtomicBool,
    sent: Mutex<Vec<Frame>>,
    incoming: Mutex<VecDeque<Frame>>,
    responder: RwLock<Option<Responder>>,
    fail_transmit: AtomicBool,
}

impl MockCanDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next `receive` polls.
    pub fn push_incoming(&self, frame: Frame) {
        self.incoming.lock().push_back(frame);
    }

    /// Install an auto-responder invoked on every transmit.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Frame) -> Vec<Frame> + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Box::new(responder));
    }

    /// Make subsequent transmits fail until reset (transient-error tests).
    pub fn set_fail_transmit(&self, fail: bool) {
        self.fail_transmit.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of everything transmitted so far.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Number of transmitted frames carrying the given id.
    pub fn sent_count_for(&self, id: u32) -> usize {
        self.sent.lock().iter().filter(|f| f.id == id).count()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl CanDevice for MockCanDevice {
    async fn open(&self) -> Result<(), DeviceError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn transmit(&self, frame: &Frame) -> Result<(), DeviceError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DeviceError::NotOpen);
        }
        if self.fail_transmit.load(Ordering::SeqCst) {
            return Err(DeviceError::TransmitFailed("mock failure".to_string()));
        }
        tracing::trace!(id = format_args!("0x{:X}", frame.id), data = %hex::encode(&frame.data), "mock transmit");
        self.sent.lock().push(frame.clone());
        if let Some(responder) = self.responder.read().as_ref() {
            let replies = responder(frame);
            let mut incoming = self.incoming.lock();
            for reply in replies {
                incoming.push_back(reply);
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Frame>, DeviceError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DeviceError::NotOpen);
        }
        Ok(self.incoming.lock().pop_front())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
