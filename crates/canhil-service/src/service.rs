//! The `CanService` facade
//!
//! Composes device, catalogue, scheduler, receive pipeline, monitor and
//! UDS engine behind the operations a test script calls. Construction is
//! explicit: the caller injects the device (or lets `from_config` build
//! one) and the loaded catalogue. No global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canhil_bus::{create_device, CanDevice};
use canhil_core::{CanError, CanResult, Frame, Message, MessageCatalogue, MessageRef, Signal};
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::broadcast;

use crate::config::ServiceConfig;
use crate::monitor::BusMonitor;
use crate::receiver::ReceivePipeline;
use crate::scheduler::TransmitScheduler;
use crate::stack::ReceiveStack;
use crate::uds::{UdsEngine, UdsLink};

/// Capacity of the broadcast channel fanning received frames out to
/// in-flight UDS exchanges.
const FRAME_FANOUT_CAPACITY: usize = 1024;

pub struct CanService {
    config: ServiceConfig,
    device: Arc<dyn CanDevice>,
    catalogue: Arc<RwLock<MessageCatalogue>>,
    stack: Arc<ReceiveStack>,
    scheduler: TransmitScheduler,
    pipeline: ReceivePipeline,
    monitor: BusMonitor,
    uds: UdsEngine,
    frames_tx: broadcast::Sender<Frame>,
    uds_link: Arc<RwLock<Option<UdsLink>>>,
}

impl CanService {
    /// Build a service around an injected device.
    pub fn new(
        device: Arc<dyn CanDevice>,
        catalogue: MessageCatalogue,
        config: ServiceConfig,
    ) -> Self {
        let stack = Arc::new(ReceiveStack::new(config.stack_capacity));
        let (frames_tx, _) = broadcast::channel(FRAME_FANOUT_CAPACITY);
        let uds_link = Arc::new(RwLock::new(None));
        let close_timeout = Duration::from_millis(config.close_timeout_ms);

        Self {
            scheduler: TransmitScheduler::new(device.clone(), close_timeout),
            pipeline: ReceivePipeline::new(),
            monitor: BusMonitor::new(stack.clone()),
            uds: UdsEngine::new(
                device.clone(),
                stack.clone(),
                uds_link.clone(),
                frames_tx.clone(),
                config.uds.clone(),
            ),
            device,
            catalogue: Arc::new(RwLock::new(catalogue)),
            stack,
            frames_tx,
            uds_link,
            config,
        }
    }

    /// Build the device described by the configuration, then the service.
    pub fn from_config(catalogue: MessageCatalogue, config: ServiceConfig) -> CanResult<Self> {
        let device = create_device(&config.bus)?;
        Ok(Self::new(device, catalogue, config))
    }

    /// Open the device and start the receive pipeline.
    pub async fn open_can(&self) -> CanResult<()> {
        self.device.open().await?;
        self.pipeline.start(
            self.device.clone(),
            self.stack.clone(),
            self.frames_tx.clone(),
            self.uds_link.clone(),
            self.config.uds.clone(),
        );
        tracing::info!("CAN service opened");
        Ok(())
    }

    /// Stop every transmit task and the pipeline, then close the device.
    pub async fn close_can(&self) -> CanResult<()> {
        let close_timeout = Duration::from_millis(self.config.close_timeout_ms);
        self.scheduler.close().await;
        self.pipeline.stop(close_timeout).await;
        self.device.close().await?;
        tracing::info!("CAN service closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Send a catalogue message with its current payload bytes.
    pub async fn send_message(&self, msg: impl Into<MessageRef>) -> CanResult<()> {
        self.ensure_open()?;
        let msg = msg.into();
        let message = {
            let mut catalogue = self.catalogue.write();
            let id = catalogue.resolve(&msg)?;
            let message = catalogue.get_mut(id)?;
            if message.dirty {
                canhil_codec::refresh_data(message)?;
            }
            message.check_message(true, &[])?;
            message.clone()
        };
        self.scheduler.transmit(message).await
    }

    /// Pack the given physical values into the message, then hand it to
    /// the scheduler (one-shot, periodic or event per its send type).
    pub async fn send_signal(
        &self,
        msg: impl Into<MessageRef>,
        values: &HashMap<String, f64>,
    ) -> CanResult<()> {
        self.ensure_open()?;
        let msg = msg.into();
        let message = {
            let mut catalogue = self.catalogue.write();
            let id = catalogue.resolve(&msg)?;
            let message = catalogue.get_mut(id)?;
            let names: Vec<String> = values.keys().cloned().collect();
            message.check_message(false, &names)?;
            for (name, value) in values {
                message.set_signal_physical(name, *value)?;
            }
            canhil_codec::refresh_data(message)?;
            message.clone()
        };
        self.scheduler.transmit(message).await
    }

    /// Decode a signal's physical value from the most recent frame of its
    /// message id.
    pub fn receive_signal(&self, msg: impl Into<MessageRef>, signal: &str) -> CanResult<f64> {
        let (id, signal) = self.resolve_signal(&msg.into(), signal)?;
        let frame = self.stack.latest(id).ok_or_else(|| {
            CanError::Value(format!("no frame received yet for id 0x{id:X}"))
        })?;
        canhil_codec::decode_physical(&frame, &signal)
    }

    /// Count frames in `frames` whose decode of `signal` matches
    /// `expected` within half a scaling step. With `count`, `exact`
    /// selects `== count` versus `>= count`; without it one match
    /// suffices. Frames of other ids or too short to decode never match.
    pub fn check_signal_value(
        &self,
        frames: &[Frame],
        msg: impl Into<MessageRef>,
        signal: &str,
        expected: f64,
        count: Option<usize>,
        exact: bool,
    ) -> CanResult<bool> {
        let (id, signal) = self.resolve_signal(&msg.into(), signal)?;
        let tolerance = (signal.factor / 2.0).abs();
        let matches = frames
            .iter()
            .filter(|frame| frame.id == id)
            .filter(|frame| {
                canhil_codec::decode_physical(frame, &signal)
                    .map(|physical| (physical - expected).abs() <= tolerance)
                    .unwrap_or(false)
            })
            .count();
        Ok(match count {
            Some(count) if exact => matches == count,
            Some(count) => matches >= count,
            None => matches >= 1,
        })
    }

    /// Blast randomized payloads over the whole catalogue.
    ///
    /// Messages from `filter_senders`, diagnostic messages and network
    /// management messages are skipped. Every signal without an override
    /// gets a uniform raw value over its full bit range; overrides are
    /// fixed physical values applied by signal name across all messages.
    /// Runs `cycles` rounds, or until the device closes when `None`.
    pub async fn send_random(
        &self,
        filter_senders: &[String],
        cycles: Option<u32>,
        interval: Duration,
        overrides: &HashMap<String, f64>,
    ) -> CanResult<()> {
        self.ensure_open()?;
        let mut remaining = cycles;
        loop {
            if !self.device.is_open() {
                return Ok(());
            }
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Ok(());
                }
                *n -= 1;
            }
            let batch = self.randomize_catalogue(filter_senders, overrides)?;
            for message in batch {
                self.device.transmit(&message.to_frame()).await?;
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn randomize_catalogue(
        &self,
        filter_senders: &[String],
        overrides: &HashMap<String, f64>,
    ) -> CanResult<Vec<Message>> {
        let mut rng = rand::thread_rng();
        let mut catalogue = self.catalogue.write();
        let ids: Vec<u32> = catalogue
            .iter()
            .filter(|m| m.is_stimulus_candidate() && !filter_senders.contains(&m.sender))
            .map(|m| m.id)
            .collect();

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            let message = catalogue.get_mut(id)?;
            for signal in message.signals.values_mut() {
                signal.raw = match overrides.get(&signal.name) {
                    Some(value) => signal.to_raw(*value)?,
                    None => rng.gen_range(0..=signal.max_raw()),
                };
            }
            message.dirty = true;
            canhil_codec::refresh_data(message)?;
            batch.push(message.clone());
        }
        Ok(batch)
    }

    /// All frames currently in the receive history, oldest first.
    pub fn get_stack(&self) -> Vec<Frame> {
        self.stack.snapshot()
    }

    pub fn clear_stack_data(&self) {
        self.stack.clear();
    }

    pub fn stack(&self) -> Arc<ReceiveStack> {
        self.stack.clone()
    }

    /// Pause periodic sending for one message, or all with `None`.
    pub fn stop_transmit(&self, msg: Option<MessageRef>) -> CanResult<()> {
        let id = self.resolve_optional(msg)?;
        self.scheduler.stop_transmit(id);
        Ok(())
    }

    /// Restart stopped periodic sending, keeping the last signal values.
    pub async fn resume_transmit(&self, msg: Option<MessageRef>) -> CanResult<()> {
        let id = self.resolve_optional(msg)?;
        self.scheduler.resume_transmit(id).await
    }

    /// Reset message payloads and signal raws to their catalogue-load
    /// state; `None` restores everything.
    pub fn restore_default_messages(&self, ids: Option<&[u32]>) -> CanResult<()> {
        self.catalogue.write().restore_defaults(ids)
    }

    /// Clone of one catalogue message in its current state.
    pub fn get_message(&self, msg: impl Into<MessageRef>) -> CanResult<Message> {
        let msg = msg.into();
        let catalogue = self.catalogue.read();
        let id = catalogue.resolve(&msg)?;
        catalogue.get(id).map(|m| m.clone())
    }

    pub async fn is_bus_lost(&self, window: Duration) -> bool {
        self.monitor.is_bus_lost(window).await
    }

    /// Message-loss check over a sampling window, using the catalogue's
    /// cycle time for the expected frame count.
    pub async fn is_message_lost(
        &self,
        msg: impl Into<MessageRef>,
        window: Duration,
        lost_period: Option<f64>,
    ) -> CanResult<bool> {
        let (id, cycle_time) = {
            let catalogue = self.catalogue.read();
            let id = catalogue.resolve(&msg.into())?;
            let message = catalogue.get(id)?;
            (id, Duration::from_millis(message.cycle_time_ms))
        };
        self.monitor
            .is_message_lost(id, cycle_time, window, lost_period)
            .await
    }

    /// Whether a message's payload, or one signal of it, took more than
    /// one distinct value during the window.
    pub async fn is_value_changed(
        &self,
        msg: impl Into<MessageRef>,
        signal: Option<&str>,
        window: Duration,
    ) -> CanResult<bool> {
        let msg = msg.into();
        let (id, signal) = match signal {
            Some(name) => {
                let (id, signal) = self.resolve_signal(&msg, name)?;
                (id, Some(signal))
            }
            None => (self.catalogue.read().resolve(&msg)?, None),
        };
        self.monitor.is_value_changed(id, signal.as_ref(), window).await
    }

    /// Set the diagnostic addressing for UDS exchanges. Must be called
    /// before `send_and_receive_uds_message`.
    pub fn init_uds(&self, request_id: u32, response_id: u32, function_id: u32) {
        self.uds.init(request_id, response_id, function_id);
    }

    /// One diagnostic request-response exchange over ISO-TP.
    pub async fn send_and_receive_uds_message(&self, payload: &[u8]) -> CanResult<Vec<u8>> {
        self.uds.send_and_receive(payload).await
    }

    fn ensure_open(&self) -> CanResult<()> {
        if self.device.is_open() {
            Ok(())
        } else {
            Err(CanError::NotOpen)
        }
    }

    fn resolve_optional(&self, msg: Option<MessageRef>) -> CanResult<Option<u32>> {
        match msg {
            Some(msg) => Ok(Some(self.catalogue.read().resolve(&msg)?)),
            None => Ok(None),
        }
    }

    fn resolve_signal(&self, msg: &MessageRef, signal: &str) -> CanResult<(u32, Signal)> {
        let catalogue = self.catalogue.read();
        let id = catalogue.resolve(msg)?;
        let message = catalogue.get(id)?;
        let signal = message
            .signals
            .get(signal)
            .ok_or_else(|| CanError::UnknownSignal {
                message: message.name.clone(),
                signal: signal.to_string(),
            })?
            .clone();
        Ok((id, signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canhil_bus::MockCanDevice;
    use canhil_core::{ByteOrder, SendType};
    use std::collections::HashMap as Map;

    fn signal(name: &str, start_bit: u16, bit_length: u8, max: f64) -> Signal {
        Signal {
            name: name.to_string(),
            start_bit,
            bit_length,
            byte_order: ByteOrder::Intel,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max,
            unit: None,
            raw: 0,
        }
    }

    fn light_message(send_type: SendType, cycle_time_ms: u64) -> Message {
        let mut signals = HashMap::new();
        signals.insert(
            "BCM_LeftLightSt".to_string(),
            signal("BCM_LeftLightSt", 0, 2, 3.0),
        );
        Message {
            id: 0x152,
            name: "BCM_Status".to_string(),
            sender: "BCM".to_string(),
            dlc: 8,
            signals,
            data: vec![0; 8],
            send_type,
            cycle_time_ms,
            event_cycle_time_ms: 0,
            event_repeat_count: 0,
            stop_flag: false,
            is_diagnostic: false,
            is_network_management: false,
            dirty: false,
        }
    }

    fn service_with(messages: Vec<Message>) -> (Arc<MockCanDevice>, CanService) {
        let mock = Arc::new(MockCanDevice::new());
        let catalogue = MessageCatalogue::from_messages(messages);
        let service = CanService::new(mock.clone(), catalogue, ServiceConfig::default());
        (mock, service)
    }

    #[tokio::test]
    async fn send_signal_then_receive_signal_round_trip() {
        let (mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        // echo everything sent back onto the bus
        mock.set_responder(|frame| vec![frame.clone()]);
        service.open_can().await.unwrap();

        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 2.0)].into();
        service.send_signal(0x152, &values).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let value = service.receive_signal(0x152, "BCM_LeftLightSt").unwrap();
        assert_eq!(value, 2.0);
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn send_signal_resolves_by_name() {
        let (mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        service.open_can().await.unwrap();

        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 1.0)].into();
        service.send_signal("BCM_Status", &values).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(mock.sent_count_for(0x152), 1);
        assert_eq!(mock.sent_frames()[0].data[0], 0x01);
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let (_mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 1.0)].into();
        assert!(matches!(
            service.send_signal(0x152, &values).await,
            Err(CanError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn unknown_message_and_signal_are_configuration_errors() {
        let (_mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        service.open_can().await.unwrap();

        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 1.0)].into();
        assert!(matches!(
            service.send_signal(0x999, &values).await,
            Err(CanError::UnknownMessage(_))
        ));
        let bad: Map<String, f64> = [("NoSuchSignal".to_string(), 1.0)].into();
        assert!(matches!(
            service.send_signal(0x152, &bad).await,
            Err(CanError::UnknownSignal { .. })
        ));
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn cyclic_message_keeps_sending_until_stopped() {
        let (mock, service) = service_with(vec![light_message(SendType::Cyclic, 10)]);
        service.open_can().await.unwrap();

        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 2.0)].into();
        service.send_signal(0x152, &values).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let sent_while_running = mock.sent_count_for(0x152);
        assert!(sent_while_running >= 2, "got {sent_while_running}");

        service.stop_transmit(Some(MessageRef::Id(0x152))).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let sent_after_stop = mock.sent_count_for(0x152);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(mock.sent_count_for(0x152), sent_after_stop);

        // resume keeps the last packed value
        service.resume_transmit(Some(MessageRef::Id(0x152))).await.unwrap();
        mock.clear_sent();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let resumed = mock.sent_frames();
        assert!(!resumed.is_empty());
        assert_eq!(resumed[0].data[0], 0x02);
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn check_signal_value_counts_matches() {
        let (_mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);

        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(Frame::new(0x152, vec![0x01, 0, 0, 0, 0, 0, 0, 0]));
        }
        frames.push(Frame::new(0x152, vec![0x02, 0, 0, 0, 0, 0, 0, 0]));
        frames.push(Frame::new(0x300, vec![0x01, 0, 0, 0, 0, 0, 0, 0]));

        assert!(service
            .check_signal_value(&frames, 0x152, "BCM_LeftLightSt", 1.0, Some(3), true)
            .unwrap());
        assert!(!service
            .check_signal_value(&frames, 0x152, "BCM_LeftLightSt", 1.0, Some(2), true)
            .unwrap());
        assert!(service
            .check_signal_value(&frames, 0x152, "BCM_LeftLightSt", 1.0, Some(2), false)
            .unwrap());
        assert!(service
            .check_signal_value(&frames, 0x152, "BCM_LeftLightSt", 2.0, None, false)
            .unwrap());
    }

    #[tokio::test]
    async fn send_random_skips_filtered_and_diagnostic_messages() {
        let mut diag = light_message(SendType::Cyclic, 0);
        diag.id = 0x700;
        diag.name = "Diag".to_string();
        diag.is_diagnostic = true;
        let mut filtered = light_message(SendType::Cyclic, 0);
        filtered.id = 0x200;
        filtered.name = "Filtered".to_string();
        filtered.sender = "TBOX".to_string();

        let (mock, service) =
            service_with(vec![light_message(SendType::Cyclic, 0), diag, filtered]);
        service.open_can().await.unwrap();

        service
            .send_random(
                &["TBOX".to_string()],
                Some(3),
                Duration::from_millis(1),
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(mock.sent_count_for(0x152), 3);
        assert_eq!(mock.sent_count_for(0x700), 0);
        assert_eq!(mock.sent_count_for(0x200), 0);
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn send_random_applies_fixed_overrides() {
        let (mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        service.open_can().await.unwrap();

        let overrides: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 3.0)].into();
        service
            .send_random(&[], Some(2), Duration::from_millis(1), &overrides)
            .await
            .unwrap();

        for frame in mock.sent_frames() {
            assert_eq!(frame.data[0] & 0x03, 0x03);
        }
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn restore_default_messages_resets_payloads() {
        let (mock, service) = service_with(vec![light_message(SendType::Cyclic, 0)]);
        service.open_can().await.unwrap();

        let values: Map<String, f64> = [("BCM_LeftLightSt".to_string(), 3.0)].into();
        service.send_signal(0x152, &values).await.unwrap();
        assert_eq!(service.get_message(0x152).unwrap().data[0], 0x03);

        service.restore_default_messages(None).unwrap();
        assert_eq!(service.get_message(0x152).unwrap().data[0], 0x00);

        let _ = mock;
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn uds_single_frame_layout_on_classic_bus() {
        let (mock, service) = service_with(vec![]);
        // scripted ECU: positive response to ReadDataByIdentifier F190
        mock.set_responder(|frame| {
            if frame.id == 0x7E0 && frame.data[0] == 0x03 {
                vec![Frame::new(
                    0x7E8,
                    vec![0x04, 0x62, 0xF1, 0x90, 0x41, 0xAA, 0xAA, 0xAA],
                )]
            } else {
                vec![]
            }
        });
        service.open_can().await.unwrap();
        service.init_uds(0x7E0, 0x7E8, 0x7DF);

        let response = service
            .send_and_receive_uds_message(&[0x22, 0xF1, 0x90])
            .await
            .unwrap();

        let request = mock
            .sent_frames()
            .into_iter()
            .find(|f| f.id == 0x7E0)
            .unwrap();
        assert_eq!(
            request.data,
            vec![0x03, 0x22, 0xF1, 0x90, 0xAA, 0xAA, 0xAA, 0xAA]
        );
        assert_eq!(response, vec![0x62, 0xF1, 0x90, 0x41]);
        service.close_can().await.unwrap();
    }

    #[tokio::test]
    async fn uds_without_init_fails_fast() {
        let (_mock, service) = service_with(vec![]);
        service.open_can().await.unwrap();
        assert!(matches!(
            service.send_and_receive_uds_message(&[0x22, 0xF1, 0x90]).await,
            Err(CanError::UdsNotInitialized)
        ));
        service.close_can().await.unwrap();
    }
}
