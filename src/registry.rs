//! The table of known devices.

use std::collections::HashMap;

use log::debug;
use serde_json::Value;

use crate::config::{self, LiveConfig};
use crate::device::{Device, Timestamp};
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Devices indexed by position, with a MAC address lookup.
///
/// The registry only grows at runtime, when an unknown device announces
/// itself; it shrinks only through a full [`Registry::reload`].
#[derive(Debug, Default)]
pub struct Registry {
    devices: Vec<Device>,
    by_mac: HashMap<String, usize>,
    capacity: usize,
    changed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry content with the device list of `document`.
    ///
    /// Devices matching a previous record by MAC address keep their last
    /// known runtime state. On error the registry is left empty, with room
    /// for `headroom` announced devices.
    pub fn reload(&mut self, document: &Value, headroom: usize) -> Result<()> {
        let previous: HashMap<String, Device> = self
            .devices
            .drain(..)
            .map(|d| (mac_key(d.mac()), d))
            .collect();
        self.by_mac.clear();
        // An unreadable device list still leaves room for announced devices.
        self.capacity = headroom;

        let entries = config::device_entries(document)?;
        debug!("found {} devices", entries.len());

        let capacity = entries.len().saturating_add(headroom);
        let mut devices = Vec::new();
        devices.try_reserve_exact(capacity).map_err(Error::OutOfMemory)?;

        for entry in &entries {
            let mut device = Device::configured(entry);
            if let Some(known) = previous.get(&mac_key(device.mac())) {
                device.inherit(known);
            }
            debug!(
                "load device {}, MAC address {} ({})",
                device.name(),
                device.mac(),
                device.description()
            );
            devices.push(device);
        }

        for (index, device) in devices.iter().enumerate() {
            if !device.mac().is_empty() {
                self.by_mac.entry(mac_key(device.mac())).or_insert(index);
            }
        }
        self.devices = devices;
        self.capacity = capacity;
        Ok(())
    }

    /// Find a device by MAC address, ignoring case.
    pub fn find(&self, mac: &str) -> Option<usize> {
        self.by_mac.get(&mac_key(mac)).copied()
    }

    /// Add a record for a device that announced itself.
    ///
    /// Returns `None` when the registry has no room left.
    pub fn synthesize(&mut self, mac: &str, now: Timestamp) -> Option<usize> {
        if self.devices.len() >= self.capacity {
            return None;
        }
        let index = self.devices.len();
        let name = format!("wiz{}", index + 1);
        self.devices.push(Device::announced(&name, mac, now));
        self.by_mac.insert(mac_key(mac), index);
        self.changed = true;
        Some(index)
    }

    /// True once after a device was added since the last call.
    pub fn changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// The device list to persist, skipping unnamed or unaddressed records.
    pub fn export(&self) -> LiveConfig {
        LiveConfig::new(
            self.devices
                .iter()
                .filter(|d| !d.name().is_empty() && !d.mac().is_empty())
                .map(Device::entry)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of records the registry can hold before the next reload.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }
}

fn mac_key(mac: &str) -> String {
    mac.to_ascii_lowercase()
}
