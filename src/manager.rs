//! The device manager: registry, state machine and scheduler in one owner.
//!
//! The manager performs no I/O. Inbound datagrams and clock ticks are fed
//! in by the caller, and everything the manager wants to transmit is queued
//! as [`Outbound`] messages for the caller to send. This keeps a single
//! owner of all mutable state, driven from one event loop.

use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};

use log::debug;
use serde_json::Value;

use crate::config::{BridgeConfig, LiveConfig};
use crate::device::{Device, Effects, Observation, Timestamp, registrations};
use crate::errors::Error;
use crate::events::{CONFIG_CATEGORY, DEVICE_CATEGORY, EventAction, EventLog, Severity};
use crate::network::{InterfaceScanner, NetworkInterface, SystemScanner};
use crate::protocol::{BROADCAST_ID, Outbound, Report};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

type Result<T> = std::result::Result<T, Error>;

/// Owns every device record and decides what to send and when.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use wiz_bridge::{BridgeConfig, DeviceManager};
///
/// let mut manager = DeviceManager::new(BridgeConfig::default());
/// let config = json!({"wiz": {"devices": [
///     {"name": "lamp1", "address": "a8bb50000001", "description": "desk"}
/// ]}});
/// manager.refresh("ON STARTUP", &config, 1000).unwrap();
///
/// // The bulb was never heard from: the command is recorded, not sent.
/// manager.set(0, true, 0, 1000).unwrap();
/// assert!(manager.commanded(0));
/// assert!(manager.take_outbound().is_empty());
/// assert_eq!(manager.failure(0), Some("silent"));
/// ```
pub struct DeviceManager {
    config: BridgeConfig,
    registry: Registry,
    scanner: Box<dyn InterfaceScanner>,
    interfaces: Vec<NetworkInterface>,
    scheduler: Scheduler,
    outbox: VecDeque<Outbound>,
    log: EventLog,
}

impl DeviceManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_scanner(config, SystemScanner)
    }

    pub fn with_scanner(config: BridgeConfig, scanner: impl InterfaceScanner + 'static) -> Self {
        DeviceManager {
            scheduler: Scheduler::new(&config.timing),
            config,
            registry: Registry::new(),
            scanner: Box::new(scanner),
            interfaces: Vec::new(),
            outbox: VecDeque::new(),
            log: EventLog::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Reload the device list from a configuration document.
    ///
    /// On failure the registry is left empty and the manager keeps running.
    pub fn refresh(&mut self, reason: &str, document: &Value, now: Timestamp) -> Result<()> {
        self.log
            .record(now, CONFIG_CATEGORY, "wiz", EventAction::Activating, reason);
        let result = self.registry.reload(document, self.config.timing.headroom);
        if let Err(e) = &result {
            self.log
                .diagnose(now, Severity::Failure, CONFIG_CATEGORY, e.to_string());
        }
        result
    }

    /// The device list to persist after self-announced devices were added.
    pub fn live_config(&self) -> LiveConfig {
        self.registry.export()
    }

    /// True once after the registry grew since the last call.
    pub fn changed(&mut self) -> bool {
        self.registry.changed()
    }

    pub fn count(&self) -> usize {
        self.registry.len()
    }

    pub fn device(&self, index: usize) -> Option<&Device> {
        self.registry.get(index)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.registry.iter()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.device(index).map(Device::name)
    }

    pub fn commanded(&self, index: usize) -> bool {
        self.device(index).is_some_and(Device::commanded)
    }

    /// When the active pulse of the device ends, if any.
    pub fn deadline(&self, index: usize) -> Option<Timestamp> {
        self.device(index).and_then(Device::pulse_deadline)
    }

    /// Last state reported by the device.
    pub fn get(&self, index: usize) -> bool {
        self.device(index).is_some_and(Device::status)
    }

    pub fn failure(&self, index: usize) -> Option<&'static str> {
        self.device(index).and_then(Device::failure)
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut EventLog {
        &mut self.log
    }

    /// Messages queued for transmission, oldest first.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        self.outbox.drain(..).collect()
    }

    /// Command a device on or off, for `pulse` seconds when not zero.
    pub fn set(&mut self, index: usize, state: bool, pulse: u64, now: Timestamp) -> Result<()> {
        let Some(device) = self.registry.get_mut(index) else {
            return Err(Error::UnknownDevice(index));
        };
        debug!(
            "set {} to {} at {now} (pulse {pulse}s)",
            device.name(),
            state
        );
        let mut fx = Effects {
            now,
            timing: &self.config.timing,
            device_port: self.config.device_port,
            log: &mut self.log,
            outbox: &mut self.outbox,
        };
        device.set(index, state, pulse, &mut fx);
        Ok(())
    }

    /// Process one inbound datagram. Malformed input is reported as a
    /// diagnostic and otherwise ignored.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Timestamp) {
        debug!("Received from {from}: {}", String::from_utf8_lossy(data));

        let report = match Report::parse(data) {
            Ok(report) => report,
            Err(e) => {
                self.log
                    .diagnose(now, Severity::Failure, DEVICE_CATEGORY, e.to_string());
                return;
            }
        };
        let SocketAddr::V4(from) = from else {
            self.log.diagnose(
                now,
                Severity::Warning,
                DEVICE_CATEGORY,
                format!("ignoring report from non-IPv4 address {from}"),
            );
            return;
        };
        self.handle_report(report, from, now);
    }

    /// Apply a decoded report from `from`.
    pub fn handle_report(&mut self, report: Report, from: SocketAddrV4, now: Timestamp) {
        let (mac, observation) = match report {
            Report::FirstBeat { mac } => (mac, Observation::Manual),
            Report::SyncPilot { mac, state } => (mac, Observation::State(state)),
            Report::Ignored { method } => {
                self.log.diagnose(
                    now,
                    Severity::Info,
                    DEVICE_CATEGORY,
                    format!("ignoring method {method} from {from}"),
                );
                return;
            }
        };

        let index = match self.registry.find(&mac) {
            Some(index) => index,
            None => match self.registry.synthesize(&mac, now) {
                Some(index) => {
                    let name = self.registry.get(index).map(Device::name).unwrap_or_default();
                    self.log.record(
                        now,
                        DEVICE_CATEGORY,
                        name,
                        EventAction::Added,
                        format!("MAC ADDRESS {mac}"),
                    );
                    index
                }
                None => {
                    self.log.diagnose(
                        now,
                        Severity::Warning,
                        DEVICE_CATEGORY,
                        format!("no room for new device {mac}"),
                    );
                    return;
                }
            },
        };

        let Some(device) = self.registry.get_mut(index) else {
            return;
        };
        let mut fx = Effects {
            now,
            timing: &self.config.timing,
            device_port: self.config.device_port,
            log: &mut self.log,
            outbox: &mut self.outbox,
        };
        device.report(index, observation, *from.ip(), &mut fx);
    }

    /// Drive discovery, probing and the retry sweep. Meant to be called
    /// about once per second; extra calls are harmless.
    pub fn periodic(&mut self, now: Timestamp) {
        if self.scheduler.discovery.due(now) {
            self.interfaces = self.scanner.scan();
            let target = SocketAddrV4::new(self.config.broadcast_address, self.config.device_port);
            self.outbox.extend(
                registrations(&self.interfaces, BROADCAST_ID)
                    .map(|command| Outbound { target, command }),
            );
        }

        let sweep = self.scheduler.sweep.due(now);
        let mut fx = Effects {
            now,
            timing: &self.config.timing,
            device_port: self.config.device_port,
            log: &mut self.log,
            outbox: &mut self.outbox,
        };
        for (index, device) in self.registry.iter_mut().enumerate() {
            device.probe(index, &self.interfaces, &mut fx);
            if sweep {
                device.evaluate(index, &mut fx);
            }
        }
    }
}
