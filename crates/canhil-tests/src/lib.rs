//! Integration tests for the CAN HIL service
//!
//! This crate contains end-to-end tests that exercise the full stack:
//! - CANService facade
//! - Transmission scheduler and receive pipeline
//! - UDS/ISO-TP segmentation against a scripted mock ECU
//!
//! All tests run against the mock device, so no CAN hardware or vcan
//! interface is needed:
//!
//! ```bash
//! cargo test -p canhil-tests
//! ```
//!
//! # Test Structure
//!
//! - `service_e2e_test.rs` - signal round trips, scheduler behavior,
//!   receive history and bus-health monitoring
//! - `uds_e2e_test.rs` - ISO-TP frame layout, segmentation and
//!   reassembly against a scripted ECU

// This crate only contains tests, no library code
