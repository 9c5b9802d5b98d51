//! # wiz_bridge
//!
//! A device manager bridging a home-automation controller to WiZ smart
//! bulbs over their UDP/JSON protocol.
//!
//! The bridge keeps an authoritative on/off model of every bulb, issues
//! commands (including timed pulses), discovers bulbs passively from their
//! heartbeats and reconciles its model when someone else switches a bulb.
//!
//! ## Quick Start
//!
//! ```ignore
//! use serde_json::json;
//! use wiz_bridge::{Bridge, BridgeConfig};
//!
//! async fn serve() -> Result<(), wiz_bridge::Error> {
//!     let config = json!({"wiz": {"devices": [
//!         {"name": "porch", "address": "a8bb50000001", "description": "front door"}
//!     ]}});
//!     let mut bridge = Bridge::initialize(BridgeConfig::default(), &config).await?;
//!
//!     // Turn the porch light on for five minutes.
//!     bridge.set(0, true, 300).await?;
//!     bridge.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`DeviceManager`] holds the registry and the per-device state machine.
//!   It performs no I/O: datagrams and clock ticks are fed in, messages to
//!   send are queued as [`protocol::Outbound`].
//! - [`Bridge`] owns the UDP socket and drives the manager from a single
//!   task, receiving device reports and ticking once per second.
//! - Every meaningful transition is recorded as a [`DeviceEvent`] in the
//!   manager's [`EventLog`] and logged through the `log` facade.
//!
//! ## Communication
//!
//! Bulbs listen for commands on UDP port 38899 and report to the bridge on
//! port 38900. The protocol is unauthenticated; the bridge and the bulbs
//! must share a local network.
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod bridge;
mod config;
mod device;
mod errors;
mod events;
mod manager;
mod network;
pub mod protocol;
mod registry;
pub mod runtime;
mod scheduler;

// Re-export public API
pub use bridge::Bridge;
pub use config::{
    BridgeConfig, DEVICES_POINTER, DeviceEntry, LiveConfig, Timing, WizSection, device_entries,
    read_document, write_document,
};
pub use device::{Device, Observation, Timestamp, device_id, unix_now};
pub use errors::Error;
pub use events::{
    CONFIG_CATEGORY, DEVICE_CATEGORY, DeviceEvent, Diagnostic, EventAction, EventLog,
    EventSummary, Severity,
};
pub use manager::DeviceManager;
pub use network::{InterfaceScanner, InterfaceTable, MAX_INTERFACES, NetworkInterface, SystemScanner};
pub use registry::Registry;
pub use scheduler::{Gate, Scheduler};
