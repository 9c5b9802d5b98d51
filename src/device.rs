//! Device records and the per-device state machine.
//!
//! A device is never in an explicit state; its behavior follows from the
//! combination of the observed `status`, the `commanded` state and the two
//! deadlines. The transitions below keep these invariants:
//!
//! - a mismatch between `status` and `commanded` always has a pending
//!   deadline until the mismatch is resolved or abandoned,
//! - a pulse deadline only exists while the device is commanded on.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{DESCRIPTION_CAPACITY, DeviceEntry, NAME_CAPACITY, Timing};
use crate::events::{DEVICE_CATEGORY, EventAction, EventLog};
use crate::network::NetworkInterface;
use crate::protocol::{Command, ID_OFFSET, Outbound};

/// Wall-clock time in whole seconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// What a device reported about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The device powered up: someone switched it on by hand.
    Manual,
    /// The device reported its actual state.
    State(bool),
}

/// One WiZ bulb known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    name: String,
    mac: String,
    description: String,
    endpoint: Option<SocketAddrV4>,
    detected_at: Option<Timestamp>,
    status: bool,
    commanded: bool,
    pending_until: Option<Timestamp>,
    pulse_deadline: Option<Timestamp>,
    last_probe_at: Timestamp,
}

/// Everything a transition may touch besides the device itself.
pub(crate) struct Effects<'a> {
    pub now: Timestamp,
    pub timing: &'a Timing,
    pub device_port: u16,
    pub log: &'a mut EventLog,
    pub outbox: &'a mut VecDeque<Outbound>,
}

impl Effects<'_> {
    fn event(&mut self, device: &Device, action: EventAction, detail: impl Into<String>) {
        self.log
            .record(self.now, DEVICE_CATEGORY, &device.name, action, detail);
    }
}

impl Device {
    /// A device read from the configuration.
    pub fn configured(entry: &DeviceEntry) -> Self {
        Device {
            name: bounded(&entry.name, NAME_CAPACITY),
            mac: entry.address.clone(),
            description: bounded(&entry.description, DESCRIPTION_CAPACITY),
            endpoint: None,
            detected_at: None,
            status: false,
            commanded: false,
            pending_until: None,
            pulse_deadline: None,
            last_probe_at: 0,
        }
    }

    /// A device that announced itself without being configured.
    pub fn announced(name: &str, mac: &str, now: Timestamp) -> Self {
        Device {
            name: bounded(name, NAME_CAPACITY),
            mac: mac.to_string(),
            description: String::new(),
            endpoint: None,
            detected_at: Some(now),
            status: false,
            commanded: false,
            pending_until: None,
            pulse_deadline: None,
            last_probe_at: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn endpoint(&self) -> Option<SocketAddrV4> {
        self.endpoint
    }

    pub fn detected_at(&self) -> Option<Timestamp> {
        self.detected_at
    }

    pub fn is_detected(&self) -> bool {
        self.detected_at.is_some()
    }

    /// Last state reported by the device.
    pub fn status(&self) -> bool {
        self.status
    }

    /// Last state requested by the controller.
    pub fn commanded(&self) -> bool {
        self.commanded
    }

    pub fn pending_until(&self) -> Option<Timestamp> {
        self.pending_until
    }

    pub fn pulse_deadline(&self) -> Option<Timestamp> {
        self.pulse_deadline
    }

    pub fn last_probe_at(&self) -> Timestamp {
        self.last_probe_at
    }

    /// `"silent"` while the device has not been heard from.
    pub fn failure(&self) -> Option<&'static str> {
        if self.is_detected() { None } else { Some("silent") }
    }

    pub fn entry(&self) -> DeviceEntry {
        DeviceEntry {
            name: self.name.clone(),
            address: self.mac.clone(),
            description: self.description.clone(),
        }
    }

    /// Carry the runtime state of the same device over a configuration reload.
    pub(crate) fn inherit(&mut self, previous: &Device) {
        self.endpoint = previous.endpoint;
        self.detected_at = previous.detected_at;
        self.last_probe_at = previous.last_probe_at;
        self.reset(previous.status);
    }

    fn reset(&mut self, status: bool) {
        self.status = status;
        self.commanded = status;
        self.pending_until = None;
        self.pulse_deadline = None;
    }

    fn control(&self, index: usize, state: bool, fx: &mut Effects<'_>) {
        if let Some(target) = self.endpoint {
            fx.outbox.push_back(Outbound {
                target,
                command: Command::SetPilot {
                    id: device_id(index),
                    state,
                },
            });
        }
    }

    /// Apply a report received from `from`.
    pub(crate) fn report(
        &mut self,
        index: usize,
        observation: Observation,
        from: Ipv4Addr,
        fx: &mut Effects<'_>,
    ) {
        if !self.is_detected() {
            fx.event(self, EventAction::Detected, format!("MAC ADDRESS {}", self.mac));
        }
        self.detected_at = Some(fx.now);
        self.endpoint = Some(SocketAddrV4::new(from, fx.device_port));

        match observation {
            Observation::Manual => {
                // Someone just turned it on by hand: never contest it.
                self.commanded = true;
                self.pending_until = None;
                self.control(index, true, fx);
                if !self.status {
                    fx.event(self, EventAction::Operated, transition(false, true));
                    self.status = true;
                }
            }
            Observation::State(observed) => {
                if self.pending_until.is_some() && observed == self.commanded {
                    if observed != self.status {
                        fx.event(self, EventAction::Confirmed, transition(self.status, observed));
                    }
                    self.pending_until = None;
                } else if observed != self.status {
                    fx.event(self, EventAction::Changed, transition(self.status, observed));
                    self.commanded = observed;
                    self.pending_until = None;
                    if !observed {
                        self.pulse_deadline = None;
                    }
                }
                self.status = observed;
            }
        }
    }

    /// Record a new commanded state, sending it if the device was detected.
    pub(crate) fn set(&mut self, index: usize, state: bool, pulse: u64, fx: &mut Effects<'_>) {
        let named = on_off(state);
        if state && pulse > 0 {
            self.pulse_deadline = Some(fx.now.saturating_add(pulse));
            fx.event(self, EventAction::Set, format!("{named} FOR {pulse} SECONDS"));
        } else {
            self.pulse_deadline = None;
            fx.event(self, EventAction::Set, named);
        }
        self.commanded = state;
        self.pending_until = Some(fx.now.saturating_add(fx.timing.grace_period));

        if self.is_detected() {
            self.control(index, state, fx);
        }
    }

    /// Send registration probes to the device when its probe is due.
    pub(crate) fn probe(
        &mut self,
        index: usize,
        interfaces: &[NetworkInterface],
        fx: &mut Effects<'_>,
    ) {
        let Some(target) = self.endpoint else { return };
        if fx.now < self.last_probe_at.saturating_add(fx.timing.probe_interval) {
            return;
        }
        fx.outbox
            .extend(registrations(interfaces, device_id(index)).map(|command| Outbound {
                target,
                command,
            }));
        self.last_probe_at = fx.now;
    }

    /// Periodic evaluation: silence detection, pulse expiry, then retry or
    /// abandon an unconfirmed command.
    pub(crate) fn evaluate(&mut self, index: usize, fx: &mut Effects<'_>) {
        let now = fx.now;

        if let Some(detected) = self.detected_at
            && now.saturating_sub(detected) > fx.timing.silence_threshold
        {
            fx.event(self, EventAction::Silent, format!("MAC ADDRESS {}", self.mac));
            self.reset(false);
            self.detected_at = None;
        }

        if let Some(deadline) = self.pulse_deadline
            && now >= deadline
        {
            fx.event(self, EventAction::Reset, "END OF PULSE");
            self.commanded = false;
            self.pending_until = Some(now.saturating_add(fx.timing.grace_period));
            self.pulse_deadline = None;
        }

        if self.status == self.commanded {
            return;
        }
        let pending = self.pending_until;
        match pending {
            Some(until) if until > now => {
                if self.is_detected() {
                    fx.event(self, EventAction::Retry, on_off(self.commanded));
                    self.control(index, self.commanded, fx);
                }
            }
            _ => {
                if pending.is_some() {
                    fx.event(self, EventAction::Timeout, "");
                }
                self.reset(self.status);
            }
        }
    }
}

/// Correlation id of the messages sent to the device at `index`.
pub fn device_id(index: usize) -> u32 {
    ID_OFFSET.saturating_add(u32::try_from(index).unwrap_or(u32::MAX))
}

/// One registration per interface that has an IPv4 address.
pub(crate) fn registrations(
    interfaces: &[NetworkInterface],
    id: u32,
) -> impl Iterator<Item = Command> + '_ {
    interfaces.iter().filter_map(move |i| {
        i.ip.map(|ip| Command::Registration {
            id,
            phone_ip: ip.to_string(),
            phone_mac: i.mac.clone().unwrap_or_default(),
        })
    })
}

fn bounded(value: &str, capacity: usize) -> String {
    value.chars().take(capacity).collect()
}

fn on_off(state: bool) -> &'static str {
    if state { "on" } else { "off" }
}

fn transition(from: bool, to: bool) -> String {
    format!("FROM {} TO {}", on_off(from), on_off(to))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        timing: Timing,
        log: EventLog,
        outbox: VecDeque<Outbound>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                timing: Timing::default(),
                log: EventLog::new(),
                outbox: VecDeque::new(),
            }
        }

        fn fx(&mut self, now: Timestamp) -> Effects<'_> {
            Effects {
                now,
                timing: &self.timing,
                device_port: 38899,
                log: &mut self.log,
                outbox: &mut self.outbox,
            }
        }

        fn actions(&mut self) -> Vec<EventAction> {
            self.log.drain_events().into_iter().map(|e| e.action).collect()
        }
    }

    const BULB: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    fn lamp() -> Device {
        Device::configured(&DeviceEntry {
            name: "lamp1".into(),
            address: "AA:BB:CC:DD:EE:FF".into(),
            description: "desk".into(),
        })
    }

    #[test]
    fn test_configured_fields_are_bounded() {
        let device = Device::configured(&DeviceEntry {
            name: "n".repeat(40),
            address: "a8bb50000001".into(),
            description: "é".repeat(300),
        });
        assert_eq!(device.name().chars().count(), NAME_CAPACITY);
        assert_eq!(device.description().chars().count(), DESCRIPTION_CAPACITY);
        assert_eq!(device.mac(), "a8bb50000001");
        assert_eq!(device.failure(), Some("silent"));
    }

    #[test]
    fn test_set_undetected_records_without_sending() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.set(0, true, 0, &mut h.fx(1000));

        assert!(device.commanded());
        assert_eq!(device.pending_until(), Some(1005));
        assert_eq!(device.pulse_deadline(), None);
        assert!(h.outbox.is_empty());
        assert_eq!(h.actions(), [EventAction::Set]);
    }

    #[test]
    fn test_first_beat_forces_on_and_acknowledges() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::Manual, BULB, &mut h.fx(1000));

        assert!(device.commanded() && device.status());
        assert_eq!(device.detected_at(), Some(1000));
        assert_eq!(device.endpoint(), Some(SocketAddrV4::new(BULB, 38899)));
        assert_eq!(
            h.outbox.pop_front(),
            Some(Outbound {
                target: SocketAddrV4::new(BULB, 38899),
                command: Command::SetPilot {
                    id: 12000,
                    state: true
                },
            })
        );
        assert_eq!(h.actions(), [EventAction::Detected, EventAction::Operated]);
    }

    #[test]
    fn test_confirmation_is_absorbed() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(false), BULB, &mut h.fx(1000));
        device.set(0, true, 0, &mut h.fx(1001));
        h.actions();

        device.report(0, Observation::State(true), BULB, &mut h.fx(1002));
        assert_eq!(device.pending_until(), None);
        assert!(device.status());
        assert_eq!(h.actions(), [EventAction::Confirmed]);
    }

    #[test]
    fn test_confirmation_without_change_clears_pending() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(false), BULB, &mut h.fx(1000));
        device.set(0, false, 0, &mut h.fx(1001));
        h.actions();

        device.report(0, Observation::State(false), BULB, &mut h.fx(1002));
        assert_eq!(device.pending_until(), None);
        assert!(h.actions().is_empty());
    }

    #[test]
    fn test_external_change_is_adopted() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(false), BULB, &mut h.fx(1000));
        device.report(0, Observation::State(true), BULB, &mut h.fx(1010));

        assert!(device.commanded() && device.status());
        assert_eq!(device.pending_until(), None);
        assert_eq!(h.actions(), [EventAction::Detected, EventAction::Changed]);
        assert!(h.outbox.is_empty());
    }

    #[test]
    fn test_external_off_cancels_pulse() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(true), BULB, &mut h.fx(1000));
        device.set(0, true, 30, &mut h.fx(1001));
        device.report(0, Observation::State(true), BULB, &mut h.fx(1002));
        assert_eq!(device.pulse_deadline(), Some(1031));

        device.report(0, Observation::State(false), BULB, &mut h.fx(1003));
        assert!(!device.commanded());
        assert_eq!(device.pulse_deadline(), None);
    }

    #[test]
    fn test_retry_then_timeout() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(false), BULB, &mut h.fx(1000));
        device.set(0, true, 0, &mut h.fx(1000));
        h.outbox.clear();
        h.actions();

        device.evaluate(0, &mut h.fx(1003));
        assert_eq!(h.actions(), [EventAction::Retry]);
        assert_eq!(h.outbox.len(), 1);

        device.evaluate(0, &mut h.fx(1005));
        assert_eq!(h.actions(), [EventAction::Timeout]);
        assert!(!device.commanded());
        assert_eq!(device.pending_until(), None);
    }

    #[test]
    fn test_pulse_expires_at_deadline() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::State(true), BULB, &mut h.fx(1000));
        device.set(0, true, 10, &mut h.fx(1000));
        device.report(0, Observation::State(true), BULB, &mut h.fx(1001));
        h.actions();

        device.evaluate(0, &mut h.fx(1009));
        assert!(device.commanded());
        assert!(h.actions().is_empty());

        device.evaluate(0, &mut h.fx(1010));
        assert!(!device.commanded());
        assert_eq!(device.pulse_deadline(), None);
        assert_eq!(device.pending_until(), Some(1015));
        assert_eq!(h.actions(), [EventAction::Reset, EventAction::Retry]);
    }

    #[test]
    fn test_pulse_ignored_when_commanding_off() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.set(0, true, 30, &mut h.fx(1000));
        assert_eq!(device.pulse_deadline(), Some(1030));

        device.set(0, false, 10, &mut h.fx(1001));
        assert!(!device.commanded());
        assert_eq!(device.pulse_deadline(), None);
        let last = h.log.events().last().map(|e| e.detail.as_str());
        assert_eq!(last, Some("off"));
    }

    #[test]
    fn test_huge_pulse_saturates() {
        let mut h = Harness::new();
        h.timing.grace_period = u64::MAX;
        let mut device = lamp();
        device.report(0, Observation::State(false), BULB, &mut h.fx(1000));
        device.set(0, true, u64::MAX, &mut h.fx(1000));
        assert_eq!(device.pulse_deadline(), Some(u64::MAX));
        assert_eq!(device.pending_until(), Some(u64::MAX));

        device.evaluate(0, &mut h.fx(2000));
        assert!(device.commanded());
        assert_eq!(device.pulse_deadline(), Some(u64::MAX));
    }

    #[test]
    fn test_silence_resets_device() {
        let mut h = Harness::new();
        let mut device = lamp();
        device.report(0, Observation::Manual, BULB, &mut h.fx(1000));
        h.actions();

        device.evaluate(0, &mut h.fx(1100));
        assert!(device.is_detected());

        device.evaluate(0, &mut h.fx(1101));
        assert!(!device.is_detected());
        assert!(!device.commanded() && !device.status());
        assert_eq!(device.failure(), Some("silent"));
        assert_eq!(h.actions(), [EventAction::Silent]);
    }

    #[test]
    fn test_probe_requires_endpoint_and_interval() {
        let mut h = Harness::new();
        let interfaces = vec![
            NetworkInterface {
                name: "eth0".into(),
                ip: Some(Ipv4Addr::new(192, 168, 1, 10)),
                mac: Some("a8bb500a0bff".into()),
            },
            NetworkInterface {
                name: "wlan0".into(),
                ip: None,
                mac: Some("010203040506".into()),
            },
        ];
        let mut device = lamp();
        device.probe(2, &interfaces, &mut h.fx(1000));
        assert!(h.outbox.is_empty());

        device.report(2, Observation::State(false), BULB, &mut h.fx(1000));
        device.probe(2, &interfaces, &mut h.fx(1000));
        assert_eq!(h.outbox.len(), 1);
        assert_eq!(
            h.outbox[0].command,
            Command::Registration {
                id: 12002,
                phone_ip: "192.168.1.10".into(),
                phone_mac: "a8bb500a0bff".into(),
            }
        );
        assert_eq!(device.last_probe_at(), 1000);

        device.probe(2, &interfaces, &mut h.fx(1034));
        assert_eq!(h.outbox.len(), 1);
        device.probe(2, &interfaces, &mut h.fx(1035));
        assert_eq!(h.outbox.len(), 2);
    }
}
