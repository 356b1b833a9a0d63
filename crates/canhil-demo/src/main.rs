//! canhil-demo - runnable tour of the CAN HIL service
//!
//! Builds a CANService over the mock device with a scripted ECU on the
//! other end, then walks through the main operations: cyclic signal
//! sending, signal readback, bus-health checks and a UDS exchange.
//!
//! Usage:
//!   canhil-demo
//!   canhil-demo --config service.toml

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canhil_bus::MockCanDevice;
use canhil_core::{ByteOrder, Frame, Message, MessageCatalogue, SendType, Signal};
use canhil_service::{CanService, ServiceConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    config_path: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    anyhow::bail!("Missing argument for --config");
                }
            }
            "--help" | "-h" => {
                println!("Usage: canhil-demo [--config <service.toml>]");
                std::process::exit(0);
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
    }
    Ok(Args { config_path })
}

fn load_config(path: Option<&str>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&raw)?)
        }
        None => Ok(ServiceConfig::default()),
    }
}

/// A two-message catalogue: body status and engine data.
fn demo_catalogue() -> MessageCatalogue {
    let mut status_signals = HashMap::new();
    status_signals.insert(
        "BCM_LeftLightSt".to_string(),
        Signal {
            name: "BCM_LeftLightSt".to_string(),
            start_bit: 0,
            bit_length: 2,
            byte_order: ByteOrder::Intel,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 3.0,
            unit: None,
            raw: 0,
        },
    );
    let mut engine_signals = HashMap::new();
    engine_signals.insert(
        "EMS_EngineSpeed".to_string(),
        Signal {
            name: "EMS_EngineSpeed".to_string(),
            start_bit: 8,
            bit_length: 16,
            byte_order: ByteOrder::Intel,
            signed: false,
            factor: 0.25,
            offset: 0.0,
            min: 0.0,
            max: 16383.75,
            unit: Some("rpm".to_string()),
            raw: 0,
        },
    );
    MessageCatalogue::from_messages(vec![
        Message {
            id: 0x152,
            name: "BCM_Status".to_string(),
            sender: "BCM".to_string(),
            dlc: 8,
            signals: status_signals,
            data: vec![0; 8],
            send_type: SendType::Cyclic,
            cycle_time_ms: 100,
            event_cycle_time_ms: 0,
            event_repeat_count: 0,
            stop_flag: false,
            is_diagnostic: false,
            is_network_management: false,
            dirty: false,
        },
        Message {
            id: 0x1A0,
            name: "EngineData".to_string(),
            sender: "EMS".to_string(),
            dlc: 8,
            signals: engine_signals,
            data: vec![0; 8],
            send_type: SendType::Cyclic,
            cycle_time_ms: 50,
            event_cycle_time_ms: 0,
            event_repeat_count: 0,
            stop_flag: false,
            is_diagnostic: false,
            is_network_management: false,
            dirty: false,
        },
    ])
}

/// Script the ECU side: echo every frame back onto the bus and answer
/// ReadDataByIdentifier 0xF190 (VIN) on the diagnostic pair.
fn script_ecu(mock: &MockCanDevice) {
    mock.set_responder(|frame| {
        if frame.id == 0x7E0 && frame.data.starts_with(&[0x03, 0x22, 0xF1, 0x90]) {
            return vec![Frame::new(
                0x7E8,
                vec![0x06, 0x62, 0xF1, 0x90, 0x56, 0x49, 0x4E, 0xAA],
            )];
        }
        vec![frame.clone()]
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let config = load_config(args.config_path.as_deref())?;

    let mock = Arc::new(MockCanDevice::new());
    script_ecu(&mock);
    let service = CanService::new(mock, demo_catalogue(), config);
    service.open_can().await?;

    // cyclic signal send and readback
    let values: HashMap<String, f64> = [("EMS_EngineSpeed".to_string(), 3000.5)].into();
    service.send_signal("EngineData", &values).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let speed = service.receive_signal(0x1A0, "EMS_EngineSpeed")?;
    tracing::info!(speed, "EngineData readback");

    // bus health while the cyclic task runs
    let lost = service.is_bus_lost(Duration::from_millis(500)).await;
    tracing::info!(lost, "bus-loss check");

    // one UDS exchange
    service.init_uds(0x7E0, 0x7E8, 0x7DF);
    let vin = service.send_and_receive_uds_message(&[0x22, 0xF1, 0x90]).await?;
    tracing::info!(response = %hex::encode(&vin), "UDS ReadDataByIdentifier F190");

    service.close_can().await?;
    Ok(())
}
