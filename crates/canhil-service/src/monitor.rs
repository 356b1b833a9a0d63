//! Bus-health sampling primitives
//!
//! Each primitive clears the receive history, sleeps for the sampling
//! window, then inspects a point-in-time snapshot. They are deliberately
//! synchronous observations, not continuous watchdogs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use canhil_core::{CanError, CanResult, Signal};

use crate::stack::ReceiveStack;

/// Samples the receive history for bus-loss, message-loss and
/// value-change conditions.
pub struct BusMonitor {
    stack: Arc<ReceiveStack>,
}

impl BusMonitor {
    pub fn new(stack: Arc<ReceiveStack>) -> Self {
        Self { stack }
    }

    /// True iff no frame of any id arrived within the window.
    pub async fn is_bus_lost(&self, window: Duration) -> bool {
        self.stack.clear();
        tokio::time::sleep(window).await;
        self.stack.is_empty()
    }

    /// True iff fewer frames of `id` than `window / cycle_time` arrived in
    /// the window.
    ///
    /// With `lost_period`, loss additionally requires the last two frames
    /// to be spaced more than `cycle_time * lost_period` apart (fewer than
    /// two frames counts as spaced apart); a healthy tail cadence vetoes
    /// the count check.
    pub async fn is_message_lost(
        &self,
        id: u32,
        cycle_time: Duration,
        window: Duration,
        lost_period: Option<f64>,
    ) -> CanResult<bool> {
        if cycle_time.is_zero() {
            return Err(CanError::Config(
                "is_message_lost requires a non-zero cycle time".to_string(),
            ));
        }
        self.stack.clear();
        tokio::time::sleep(window).await;
        let frames = self.stack.frames_for(id);

        let expected = (window.as_secs_f64() / cycle_time.as_secs_f64()) as usize;
        let count_lost = frames.len() < expected;

        match lost_period {
            None => Ok(count_lost),
            Some(period) => {
                let tail_gap_exceeded = match frames.as_slice() {
                    [.., prev, last] => {
                        let gap = last.timestamp.duration_since(prev.timestamp);
                        gap.as_secs_f64() > cycle_time.as_secs_f64() * period
                    }
                    _ => true,
                };
                Ok(count_lost && tail_gap_exceeded)
            }
        }
    }

    /// True iff more than one distinct value for `id` appears in the
    /// window: decoded raw values when a signal is given, whole payloads
    /// otherwise.
    pub async fn is_value_changed(
        &self,
        id: u32,
        signal: Option<&Signal>,
        window: Duration,
    ) -> CanResult<bool> {
        self.stack.clear();
        tokio::time::sleep(window).await;
        let frames = self.stack.frames_for(id);

        match signal {
            Some(signal) => {
                let mut values = HashSet::new();
                for frame in &frames {
                    let raw = canhil_codec::extract_raw(&frame.data, signal)
                        .map_err(canhil_core::CanError::from)?;
                    values.insert(raw);
                }
                Ok(values.len() > 1)
            }
            None => {
                let mut payloads = HashSet::new();
                for frame in &frames {
                    payloads.insert(frame.data.clone());
                }
                Ok(payloads.len() > 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canhil_core::{ByteOrder, Frame};

    fn stack_with(frames: Vec<Frame>) -> Arc<ReceiveStack> {
        let stack = Arc::new(ReceiveStack::new(100));
        for frame in frames {
            stack.push(frame);
        }
        stack
    }

    #[tokio::test(start_paused = true)]
    async fn bus_lost_when_nothing_arrives() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        assert!(monitor.is_bus_lost(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn bus_not_lost_when_any_frame_arrives() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let sampler = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                stack.push(Frame::new(0x300, vec![0; 8]));
            }
        });
        assert!(!monitor.is_bus_lost(Duration::from_millis(50)).await);
        sampler.await.unwrap();
    }

    #[tokio::test]
    async fn message_lost_counts_frames_in_window() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                for _ in 0..10 {
                    stack.push(Frame::new(0x152, vec![0; 8]));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });
        // 10 frames at 5 ms cadence comfortably covers 40 ms / 10 ms = 4
        let lost = monitor
            .is_message_lost(0x152, Duration::from_millis(10), Duration::from_millis(40), None)
            .await
            .unwrap();
        assert!(!lost);
        feeder.await.unwrap();

        // nothing arriving at all is a loss
        let lost = monitor
            .is_message_lost(0x152, Duration::from_millis(10), Duration::from_millis(40), None)
            .await
            .unwrap();
        assert!(lost);
    }

    #[tokio::test]
    async fn healthy_tail_cadence_vetoes_the_count_check() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                // two late frames back on cadence: far below the expected
                // count for the window, but the tail gap is well under
                // 20 ms * 1.0
                tokio::time::sleep(Duration::from_millis(80)).await;
                stack.push(Frame::new(0x152, vec![0; 8]));
                tokio::time::sleep(Duration::from_millis(5)).await;
                stack.push(Frame::new(0x152, vec![0; 8]));
            }
        });
        let lost = monitor
            .is_message_lost(
                0x152,
                Duration::from_millis(20),
                Duration::from_millis(120),
                Some(1.0),
            )
            .await
            .unwrap();
        assert!(!lost);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn stale_tail_gap_confirms_message_loss() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                stack.push(Frame::new(0x152, vec![0; 8]));
                tokio::time::sleep(Duration::from_millis(70)).await;
                stack.push(Frame::new(0x152, vec![0; 8]));
            }
        });
        // two frames in a 120 ms window, 70 ms apart: both the count and
        // the tail gap say lost
        let lost = monitor
            .is_message_lost(
                0x152,
                Duration::from_millis(20),
                Duration::from_millis(120),
                Some(1.0),
            )
            .await
            .unwrap();
        assert!(lost);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn single_frame_counts_as_stale_tail() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                stack.push(Frame::new(0x152, vec![0; 8]));
            }
        });
        let lost = monitor
            .is_message_lost(
                0x152,
                Duration::from_millis(20),
                Duration::from_millis(100),
                Some(1.0),
            )
            .await
            .unwrap();
        assert!(lost);
        feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cycle_time_is_rejected() {
        let monitor = BusMonitor::new(stack_with(vec![]));
        assert!(monitor
            .is_message_lost(0x152, Duration::ZERO, Duration::from_millis(10), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn value_changed_detects_distinct_payloads() {
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                stack.push(Frame::new(0x152, vec![1; 8]));
                stack.push(Frame::new(0x152, vec![2; 8]));
            }
        });
        let changed = monitor
            .is_value_changed(0x152, None, Duration::from_millis(30))
            .await
            .unwrap();
        assert!(changed);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn value_changed_decodes_signal_raw() {
        let signal = Signal {
            name: "S".to_string(),
            start_bit: 0,
            bit_length: 8,
            byte_order: ByteOrder::Intel,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 255.0,
            unit: None,
            raw: 0,
        };
        let stack = Arc::new(ReceiveStack::new(100));
        let monitor = BusMonitor::new(stack.clone());
        let feeder = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                // same first byte, different elsewhere: signal did not change
                stack.push(Frame::new(0x152, vec![7, 1, 0, 0, 0, 0, 0, 0]));
                stack.push(Frame::new(0x152, vec![7, 2, 0, 0, 0, 0, 0, 0]));
            }
        });
        let changed = monitor
            .is_value_changed(0x152, Some(&signal), Duration::from_millis(30))
            .await
            .unwrap();
        assert!(!changed);
        feeder.await.unwrap();
    }
}
