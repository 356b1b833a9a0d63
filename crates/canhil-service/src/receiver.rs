//! Receive pipeline: drains the device into the history and fans frames out

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canhil_bus::CanDevice;
use canhil_core::Frame;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::UdsTimingConfig;
use crate::isotp;
use crate::stack::ReceiveStack;
use crate::uds::UdsLink;

/// Background task polling `device.receive()`.
///
/// Every received frame updates the latest-by-id table, is appended to the
/// bounded history and broadcast to subscribers (the UDS engine). When UDS
/// is initialized and a First Frame arrives on the diagnostic response id,
/// the pipeline immediately answers with a Flow Control grant on the
/// request id so the peer can stream its Consecutive Frames.
pub struct ReceivePipeline {
    need_receive: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ReceivePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivePipeline {
    pub fn new() -> Self {
        Self {
            need_receive: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the pipeline task. A second call while running is a no-op.
    pub fn start(
        &self,
        device: Arc<dyn CanDevice>,
        stack: Arc<ReceiveStack>,
        frames_tx: broadcast::Sender<Frame>,
        uds_link: Arc<RwLock<Option<UdsLink>>>,
        timing: UdsTimingConfig,
    ) {
        let mut handle = self.handle.lock();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        self.need_receive.store(true, Ordering::SeqCst);

        let need_receive = self.need_receive.clone();
        *handle = Some(tokio::spawn(async move {
            while need_receive.load(Ordering::SeqCst) {
                match device.receive().await {
                    Ok(Some(frame)) => {
                        stack.push(frame.clone());
                        // Flow Control response for an inbound First Frame
                        let link = { *uds_link.read() };
                        if let Some(link) = link {
                            if frame.id == link.response_id && isotp::is_first_frame(&frame.data) {
                                let fc = isotp::flow_control_frame(
                                    link.request_id,
                                    timing.st_min_ms,
                                    link.frame_size,
                                    timing.padding,
                                );
                                if let Err(e) = device.transmit(&fc).await {
                                    tracing::warn!(error = %e, "flow control transmit failed");
                                }
                            }
                        }
                        let _ = frames_tx.send(frame);
                    }
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "device receive failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            tracing::debug!("receive pipeline stopped");
        }));
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the task to stop and wait for it, bounded by `close_timeout`.
    pub async fn stop(&self, close_timeout: Duration) {
        self.need_receive.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(close_timeout, handle).await.is_err() {
                tracing::warn!("receive pipeline did not stop within close timeout");
            }
        }
    }
}
