//! UDS diagnostic exchange over ISO-TP
//!
//! One request-response cycle: segment the outbound payload (Single Frame,
//! or First Frame + Flow-Control-gated Consecutive Frames), then collect and
//! reassemble the response. Protocol timeouts never escape: a flow-control
//! timeout resolves to an empty result, a reassembly timeout to whatever was
//! collected so far. Callers must treat a short or empty result as failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use canhil_bus::CanDevice;
use canhil_core::{CanError, CanResult, Frame};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::config::UdsTimingConfig;
use crate::isotp::{self, flow_status, IsoTpFrame};
use crate::stack::ReceiveStack;

/// Addressing of an initialized diagnostic session
#[derive(Debug, Clone, Copy)]
pub struct UdsLink {
    /// Tester request id
    pub request_id: u32,
    /// ECU response id
    pub response_id: u32,
    /// Functional broadcast id. Reserved addressing: captured at `init`
    /// for functionally addressed requests; every exchange here goes out
    /// physically on `request_id`.
    pub function_id: u32,
    /// Transport frame size: 8 classic, 64 FD
    pub frame_size: usize,
}

/// ISO-TP/UDS engine.
///
/// `init` must be called once before any exchange. The engine shares the
/// link parameters with the receive pipeline, which answers inbound First
/// Frames with Flow Control grants on its behalf.
pub struct UdsEngine {
    device: Arc<dyn CanDevice>,
    stack: Arc<ReceiveStack>,
    link: Arc<RwLock<Option<UdsLink>>>,
    frames_tx: broadcast::Sender<Frame>,
    timing: UdsTimingConfig,
}

impl UdsEngine {
    pub fn new(
        device: Arc<dyn CanDevice>,
        stack: Arc<ReceiveStack>,
        link: Arc<RwLock<Option<UdsLink>>>,
        frames_tx: broadcast::Sender<Frame>,
        timing: UdsTimingConfig,
    ) -> Self {
        Self {
            device,
            stack,
            link,
            frames_tx,
            timing,
        }
    }

    /// Store the diagnostic addressing. Frame size follows the configured
    /// transport (classic or FD).
    pub fn init(&self, request_id: u32, response_id: u32, function_id: u32) {
        let link = UdsLink {
            request_id,
            response_id,
            function_id,
            frame_size: self.timing.frame_size(),
        };
        tracing::info!(
            request_id = format_args!("0x{:X}", request_id),
            response_id = format_args!("0x{:X}", response_id),
            function_id = format_args!("0x{:X}", function_id),
            frame_size = link.frame_size,
            "UDS initialized"
        );
        *self.link.write() = Some(link);
    }

    pub fn is_initialized(&self) -> bool {
        self.link.read().is_some()
    }

    /// Perform one diagnostic request-response exchange.
    ///
    /// Returns the reassembled response payload; empty on protocol timeout.
    pub async fn send_and_receive(&self, payload: &[u8]) -> CanResult<Vec<u8>> {
        let link = self.link.read().ok_or(CanError::UdsNotInitialized)?;
        if !self.device.is_open() {
            return Err(CanError::NotOpen);
        }
        if payload.is_empty() {
            return Err(CanError::Value("empty UDS payload".to_string()));
        }

        tracing::debug!(
            request_id = format_args!("0x{:X}", link.request_id),
            payload = %hex::encode(payload),
            "UDS request"
        );

        // Subscribe before sending so no response frame can be missed.
        let mut rx = self.frames_tx.subscribe();

        if payload.len() <= isotp::single_frame_capacity(link.frame_size) {
            let frame =
                isotp::single_frame(link.request_id, payload, link.frame_size, self.timing.padding);
            self.device.transmit(&frame).await.map_err(CanError::from)?;
        } else if !self.send_segmented(&link, payload, &mut rx).await? {
            // flow-control timeout: the exchange failed before any
            // consecutive frame went out
            return Ok(Vec::new());
        }

        self.collect_response(&link, &mut rx).await
    }

    /// First Frame + Flow-Control wait + paced Consecutive Frames.
    ///
    /// Returns `Ok(false)` on a flow-control timeout or overflow.
    async fn send_segmented(
        &self,
        link: &UdsLink,
        payload: &[u8],
        rx: &mut broadcast::Receiver<Frame>,
    ) -> CanResult<bool> {
        // Stale frames would confuse response counting.
        self.stack.clear();

        let (first, mut offset) =
            isotp::first_frame(link.request_id, payload, link.frame_size, self.timing.padding);
        self.device.transmit(&first).await.map_err(CanError::from)?;

        let Some((mut block_size, mut st_min_ms)) = self.wait_flow_control(link, rx).await else {
            tracing::warn!("flow control timeout, aborting UDS transmit");
            return Ok(false);
        };

        let chunk_len = link.frame_size - 1;
        let mut seq: u8 = 0;
        let mut sent_in_block: u8 = 0;
        while offset < payload.len() {
            seq = if seq >= 15 { 1 } else { seq + 1 };
            let end = (offset + chunk_len).min(payload.len());
            let frame = isotp::consecutive_frame(
                link.request_id,
                seq,
                &payload[offset..end],
                link.frame_size,
                self.timing.padding,
            );
            self.device.transmit(&frame).await.map_err(CanError::from)?;
            offset = end;
            if offset >= payload.len() {
                break;
            }
            sent_in_block += 1;
            if block_size > 0 && sent_in_block >= block_size {
                let Some((bs, st)) = self.wait_flow_control(link, rx).await else {
                    tracing::warn!("flow control timeout mid-stream, aborting UDS transmit");
                    return Ok(false);
                };
                block_size = bs;
                st_min_ms = st;
                sent_in_block = 0;
            }
            tokio::time::sleep(Duration::from_millis(st_min_ms as u64)).await;
        }
        Ok(true)
    }

    /// Wait for a clear-to-send Flow Control on the response id.
    async fn wait_flow_control(
        &self,
        link: &UdsLink,
        rx: &mut broadcast::Receiver<Frame>,
    ) -> Option<(u8, u8)> {
        let deadline = Instant::now() + Duration::from_millis(self.timing.flow_control_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(frame)) if frame.id == link.response_id => {
                    match isotp::parse(&frame.data, link.frame_size) {
                        Some(IsoTpFrame::FlowControl {
                            status: flow_status::CONTINUE,
                            block_size,
                            st_min_ms,
                        }) => return Some((block_size, st_min_ms)),
                        Some(IsoTpFrame::FlowControl {
                            status: flow_status::WAIT,
                            ..
                        }) => continue,
                        Some(IsoTpFrame::FlowControl { status, .. }) => {
                            tracing::warn!(status, "flow control aborted the transfer");
                            return None;
                        }
                        _ => continue,
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!(skipped = n, "UDS receiver lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Wait for the response and reassemble it if segmented.
    async fn collect_response(
        &self,
        link: &UdsLink,
        rx: &mut broadcast::Receiver<Frame>,
    ) -> CanResult<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_millis(self.timing.response_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("timeout waiting for UDS response");
                return Ok(Vec::new());
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(frame)) if frame.id == link.response_id => {
                    match isotp::parse(&frame.data, link.frame_size) {
                        Some(IsoTpFrame::Single { payload }) => return Ok(payload),
                        Some(IsoTpFrame::First { total_len, payload }) => {
                            return self.reassemble(link, total_len, payload, rx).await;
                        }
                        // flow control or stray consecutive frames are not
                        // the start of a response
                        _ => continue,
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!(skipped = n, "UDS receiver lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    tracing::warn!("receive pipeline stopped during UDS exchange");
                    return Ok(Vec::new());
                }
                Err(_) => {
                    tracing::warn!("timeout waiting for UDS response");
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// Collect Consecutive Frames after an inbound First Frame.
    ///
    /// The timeout is derived from the expected frame count and the
    /// separation time we granted in our Flow Control:
    /// `(expected + 10) * st_min_ms * 1.2`. On timeout the partial payload
    /// is returned as-is.
    async fn reassemble(
        &self,
        link: &UdsLink,
        total_len: usize,
        first_chunk: Vec<u8>,
        rx: &mut broadcast::Receiver<Frame>,
    ) -> CanResult<Vec<u8>> {
        let expected = isotp::expected_consecutive(total_len, link.frame_size);
        let st_ms = self.timing.st_min_ms.max(1) as u64;
        let timeout_ms = ((expected as u64 + 10) * st_ms) as f64 * 1.2;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

        let mut payload = first_chunk;
        let mut received = 0usize;
        while received < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    total_len,
                    received,
                    expected,
                    "reassembly timeout, returning partial response"
                );
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(frame)) if frame.id == link.response_id => {
                    if let Some(IsoTpFrame::Consecutive { payload: chunk, .. }) =
                        isotp::parse(&frame.data, link.frame_size)
                    {
                        payload.extend_from_slice(&chunk);
                        received += 1;
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!(skipped = n, "UDS receiver lagged during reassembly");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => {
                    tracing::warn!(
                        total_len,
                        received,
                        expected,
                        "reassembly timeout, returning partial response"
                    );
                    break;
                }
            }
        }
        payload.truncate(total_len);
        Ok(payload)
    }
}
