//! Configuration documents and timing parameters.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// JSON pointer to the device list inside a configuration document.
pub const DEVICES_POINTER: &str = "/wiz/devices";

/// Longest device name kept in the registry, in characters.
pub const NAME_CAPACITY: usize = 31;

/// Longest device description kept in the registry, in characters.
pub const DESCRIPTION_CAPACITY: usize = 255;

/// One device entry of the configuration device list.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: String,
    /// MAC address of the bulb.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

/// Exported device list, shaped like the configuration input.
///
/// ```
/// use wiz_bridge::{DeviceEntry, LiveConfig};
///
/// let config = LiveConfig::new(vec![DeviceEntry {
///     name: "lamp1".into(),
///     address: "a8bb50000001".into(),
///     description: String::new(),
/// }]);
/// let json = serde_json::to_value(&config).unwrap();
/// assert_eq!(json["wiz"]["devices"][0]["name"], "lamp1");
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LiveConfig {
    pub wiz: WizSection,
}

/// The `wiz` section of a configuration document.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WizSection {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl LiveConfig {
    pub fn new(devices: Vec<DeviceEntry>) -> Self {
        LiveConfig {
            wiz: WizSection { devices },
        }
    }

    pub fn devices(&self) -> &[DeviceEntry] {
        &self.wiz.devices
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::JsonDump)
    }
}

/// Locate and decode the device list of a configuration document.
///
/// A `null` or empty document means nothing was configured yet and yields
/// an empty list. Any other document must carry the list at
/// [`DEVICES_POINTER`].
pub fn device_entries(document: &Value) -> Result<Vec<DeviceEntry>> {
    let empty = match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(Vec::new());
    }

    let Some(list) = document.pointer(DEVICES_POINTER) else {
        return Err(Error::DevicesNotFound {
            path: DEVICES_POINTER.to_string(),
        });
    };
    if !list.is_array() {
        return Err(Error::DevicesNotFound {
            path: DEVICES_POINTER.to_string(),
        });
    }
    serde_json::from_value(list.clone()).map_err(Error::JsonLoad)
}

/// Read a configuration document from disk.
///
/// A missing file is not an error: it reads as an empty document.
pub fn read_document(path: &Path) -> Result<Value> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(Value::Null),
        Ok(text) => serde_json::from_str(&text).map_err(Error::JsonLoad),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
        Err(e) => Err(Error::config_file(path, e)),
    }
}

/// Write a configuration document to disk, pretty printed.
pub fn write_document(path: &Path, document: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(document).map_err(Error::JsonDump)?;
    fs::write(path, text).map_err(|e| Error::config_file(path, e))
}

/// Pacing of the periodic activities, in seconds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Timing {
    /// Interface rescan and registration broadcast.
    pub discovery_interval: u64,
    /// Per-device registration probe.
    pub probe_interval: u64,
    /// Retry, timeout, pulse and silence sweep.
    pub sweep_interval: u64,
    /// How long a command may stay unconfirmed before it is abandoned.
    pub grace_period: u64,
    /// Silence after which a detected device is considered gone.
    pub silence_threshold: u64,
    /// Registry slots reserved for self-announced devices.
    pub headroom: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            discovery_interval: 60,
            probe_interval: 35,
            sweep_interval: 5,
            grace_period: 5,
            silence_threshold: 100,
            headroom: 32,
        }
    }
}

/// Settings of the UDP transport and the device manager.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Port the bridge listens on for device reports.
    pub listen_port: u16,
    /// Port the bulbs listen on for commands.
    pub device_port: u16,
    pub bind_address: Ipv4Addr,
    pub broadcast_address: Ipv4Addr,
    pub timing: Timing,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            listen_port: 38900,
            device_port: 38899,
            bind_address: Ipv4Addr::UNSPECIFIED,
            broadcast_address: Ipv4Addr::BROADCAST,
            timing: Timing::default(),
        }
    }
}
