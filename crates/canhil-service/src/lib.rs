//! canhil-service - Transmission scheduling, receive pipeline, bus health
//! monitoring and the ISO-TP/UDS diagnostic engine, composed behind the
//! [`CanService`] facade.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CanService                            │
//! │                                                              │
//! │  ┌────────────────┐  ┌─────────────────┐  ┌──────────────┐   │
//! │  │TransmitScheduler│  │ ReceivePipeline │  │  UdsEngine   │  │
//! │  │ periodic/event │  │ stack + latest  │  │ ISO-TP seg/  │   │
//! │  │ tasks per id   │  │ + FC responder  │  │ reassembly   │   │
//! │  └───────┬────────┘  └───────┬─────────┘  └──────┬───────┘   │
//! │          └───────────────────┴───────────────────┘           │
//! │                        CanDevice                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod isotp;
pub mod monitor;
pub mod receiver;
pub mod scheduler;
pub mod service;
pub mod stack;
pub mod uds;

pub use config::{ServiceConfig, UdsTimingConfig};
pub use monitor::BusMonitor;
pub use receiver::ReceivePipeline;
pub use scheduler::TransmitScheduler;
pub use service::CanService;
pub use stack::ReceiveStack;
pub use uds::{UdsEngine, UdsLink};
