//! Transmission scheduler: periodic tasks and event bursts per message id

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canhil_bus::CanDevice;
use canhil_core::{CanError, CanResult, Frame, Message, SendType};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

struct PeriodicEntry {
    message: Arc<RwLock<Message>>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct EventEntry {
    /// Frames paired with the spacing of the burst that queued them.
    queue: Arc<Mutex<VecDeque<(Frame, Duration)>>>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the per-id transmit workers.
///
/// Invariant: at most one active, non-stopped periodic task per message id.
/// A transmit for an id whose task is already running only swaps the shared
/// message in place; the running loop picks the new payload up on its next
/// tick. Cancellation is cooperative: `stop_transmit` raises a flag the
/// task observes on its own cadence, never preempting a transmit.
pub struct TransmitScheduler {
    device: Arc<dyn CanDevice>,
    running: Arc<AtomicBool>,
    periodic: Mutex<HashMap<u32, PeriodicEntry>>,
    events: Mutex<HashMap<u32, EventEntry>>,
    close_timeout: Duration,
}

impl TransmitScheduler {
    pub fn new(device: Arc<dyn CanDevice>, close_timeout: Duration) -> Self {
        Self {
            device,
            running: Arc::new(AtomicBool::new(true)),
            periodic: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            close_timeout,
        }
    }

    /// Dispatch a message according to its send type.
    pub async fn transmit(&self, message: Message) -> CanResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CanError::Config("scheduler is shut down".to_string()));
        }
        match message.send_type {
            SendType::Event => self.transmit_event(&message),
            SendType::CyclicAndEvent => self.transmit_cyclic_and_event(message).await,
            SendType::Cyclic => self.transmit_cyclic(message).await,
        }
    }

    /// Cyclic path: one-shot when no cycle time is configured, otherwise
    /// register (or update in place) the periodic task for this id.
    async fn transmit_cyclic(&self, message: Message) -> CanResult<()> {
        if message.cycle_time_ms == 0 {
            // direct one-shot: errors propagate to the caller
            return self
                .device
                .transmit(&message.to_frame())
                .await
                .map_err(CanError::from);
        }
        let id = message.id;
        let mut periodic = self.periodic.lock();
        if let Some(entry) = periodic.get(&id) {
            if !entry.stop.load(Ordering::SeqCst) && !entry.handle.is_finished() {
                *entry.message.write() = message;
                return Ok(());
            }
        }
        let entry = self.spawn_periodic(message);
        periodic.insert(id, entry);
        Ok(())
    }

    fn spawn_periodic(&self, message: Message) -> PeriodicEntry {
        let id = message.id;
        let cycle = Duration::from_millis(message.cycle_time_ms);
        let shared = Arc::new(RwLock::new(message));
        let stop = Arc::new(AtomicBool::new(false));

        let device = self.device.clone();
        let running = self.running.clone();
        let task_message = shared.clone();
        let task_stop = stop.clone();
        let handle = tokio::spawn(async move {
            while device.is_open()
                && running.load(Ordering::SeqCst)
                && !task_stop.load(Ordering::SeqCst)
            {
                let frame = task_message.read().to_frame();
                log_transient(device.transmit(&frame).await, id);
                tokio::time::sleep(cycle).await;
            }
            tracing::debug!(id = format_args!("0x{:X}", id), "periodic task stopped");
        });

        PeriodicEntry {
            message: shared,
            stop,
            handle,
        }
    }

    /// Event path: enqueue `max(event_repeat_count, 1)` copies of the
    /// current frame and make sure a drain worker is running for the id.
    fn transmit_event(&self, message: &Message) -> CanResult<()> {
        let repeats = message.event_repeat_count.max(1);
        let frame = message.to_frame();
        let spacing = Duration::from_millis(message.event_cycle_time_ms);
        let id = message.id;

        let mut events = self.events.lock();
        let entry = events.entry(id).or_insert_with(|| EventEntry {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            handle: None,
        });
        {
            let mut queue = entry.queue.lock();
            for _ in 0..repeats {
                queue.push_back((frame.clone(), spacing));
            }
        }
        let worker_alive = entry
            .handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        if !worker_alive {
            let queue = entry.queue.clone();
            let device = self.device.clone();
            let running = self.running.clone();
            entry.handle = Some(tokio::spawn(async move {
                loop {
                    if !running.load(Ordering::SeqCst) || !device.is_open() {
                        break;
                    }
                    let Some((frame, spacing)) = queue.lock().pop_front() else {
                        break;
                    };
                    log_transient(device.transmit(&frame).await, id);
                    tokio::time::sleep(spacing).await;
                }
                tracing::debug!(id = format_args!("0x{:X}", id), "event worker drained");
            }));
        }
        Ok(())
    }

    /// Combined path: pause the periodic task for this id, run the event
    /// burst to completion with the new data, then resume the cycle.
    async fn transmit_cyclic_and_event(&self, message: Message) -> CanResult<()> {
        let id = message.id;
        let paused = self.take_periodic(id);
        if let Some(entry) = paused {
            entry.stop.store(true, Ordering::SeqCst);
            if tokio::time::timeout(self.close_timeout, entry.handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    id = format_args!("0x{:X}", id),
                    "periodic task did not pause in time"
                );
            }
        }

        self.transmit_event(&message)?;
        self.wait_event_drained(id).await;

        let mut resumed = message;
        resumed.send_type = SendType::Cyclic;
        resumed.stop_flag = false;
        self.transmit_cyclic(resumed).await
    }

    fn take_periodic(&self, id: u32) -> Option<PeriodicEntry> {
        self.periodic.lock().remove(&id)
    }

    async fn wait_event_drained(&self, id: u32) {
        loop {
            let drained = {
                let events = self.events.lock();
                match events.get(&id) {
                    Some(entry) => {
                        entry.queue.lock().is_empty()
                            && entry
                                .handle
                                .as_ref()
                                .map(|h| h.is_finished())
                                .unwrap_or(true)
                    }
                    None => true,
                }
            };
            if drained {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Raise the stop flag on the matching periodic task(s); `None` stops
    /// all. The tasks observe the flag on their own cadence.
    pub fn stop_transmit(&self, id: Option<u32>) {
        let periodic = self.periodic.lock();
        for (msg_id, entry) in periodic.iter() {
            if id.map_or(true, |i| i == *msg_id) {
                entry.stop.store(true, Ordering::SeqCst);
                entry.message.write().stop_flag = true;
                tracing::debug!(id = format_args!("0x{:X}", msg_id), "periodic transmit stopped");
            }
        }
    }

    /// Clear the stop flag and restart periodic sending for the matching
    /// stopped message(s), keeping the last signal values.
    pub async fn resume_transmit(&self, id: Option<u32>) -> CanResult<()> {
        let to_resume: Vec<Message> = {
            let periodic = self.periodic.lock();
            periodic
                .iter()
                .filter(|(msg_id, entry)| {
                    id.map_or(true, |i| i == **msg_id) && entry.stop.load(Ordering::SeqCst)
                })
                .map(|(_, entry)| {
                    let mut message = entry.message.read().clone();
                    message.stop_flag = false;
                    message
                })
                .collect()
        };
        for message in to_resume {
            self.transmit_cyclic(message).await?;
        }
        Ok(())
    }

    /// Whether an active (non-stopped, unfinished) periodic task exists.
    pub fn has_active_periodic(&self, id: u32) -> bool {
        self.periodic
            .lock()
            .get(&id)
            .map(|e| !e.stop.load(Ordering::SeqCst) && !e.handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting work and wait (bounded) for every outstanding task.
    ///
    /// A task missing the close timeout is logged, not escalated.
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let periodic: Vec<(u32, PeriodicEntry)> = self.periodic.lock().drain().collect();
        let events: Vec<(u32, EventEntry)> = self.events.lock().drain().collect();

        for (id, entry) in periodic {
            if tokio::time::timeout(self.close_timeout, entry.handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    id = format_args!("0x{:X}", id),
                    "periodic task did not stop within close timeout"
                );
            }
        }
        for (id, mut entry) in events {
            if let Some(handle) = entry.handle.take() {
                if tokio::time::timeout(self.close_timeout, handle).await.is_err() {
                    tracing::warn!(
                        id = format_args!("0x{:X}", id),
                        "event worker did not stop within close timeout"
                    );
                }
            }
        }
        tracing::debug!("transmit scheduler closed");
    }
}

/// Log a transient in-loop transmit failure; the loop continues.
fn log_transient(result: Result<(), canhil_bus::DeviceError>, id: u32) {
    if let Err(e) = result {
        tracing::warn!(
            id = format_args!("0x{:X}", id),
            error = %e,
            "transmit failed, continuing on next tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canhil_bus::MockCanDevice;
    use std::time::Instant;

    fn event_message(id: u32, marker: u8, repeats: u32, spacing_ms: u64) -> Message {
        Message {
            id,
            name: format!("Burst_{marker:02X}"),
            sender: "TST".to_string(),
            dlc: 8,
            signals: HashMap::new(),
            data: vec![marker; 8],
            send_type: SendType::Event,
            cycle_time_ms: 0,
            event_cycle_time_ms: spacing_ms,
            event_repeat_count: repeats,
            stop_flag: false,
            is_diagnostic: false,
            is_network_management: false,
            dirty: false,
        }
    }

    #[tokio::test]
    async fn queued_bursts_keep_their_own_spacing() {
        let mock = Arc::new(MockCanDevice::new());
        mock.open().await.unwrap();
        let scheduler = TransmitScheduler::new(mock.clone(), Duration::from_millis(500));

        // The second burst lands on the live worker; its 1ms spacing
        // must apply to its own frames, not the 60ms of the first.
        scheduler
            .transmit(event_message(0x300, 0x01, 2, 60))
            .await
            .unwrap();
        scheduler
            .transmit(event_message(0x300, 0x02, 2, 1))
            .await
            .unwrap();

        let start = Instant::now();
        while mock.sent_count_for(0x300) < 4 {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "event queue never drained"
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        // 60 + 60 + 1 ms of pacing for the fixed behavior; inheriting
        // the first spacing would push the last frame past 180ms.
        assert!(
            start.elapsed() < Duration::from_millis(160),
            "second burst inherited the first burst's spacing: {:?}",
            start.elapsed()
        );

        let markers: Vec<u8> = mock.sent_frames().iter().map(|f| f.data[0]).collect();
        assert_eq!(markers, vec![0x01, 0x01, 0x02, 0x02]);
        scheduler.close().await;
    }
}
