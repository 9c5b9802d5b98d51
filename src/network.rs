//! Local network interface enumeration.
//!
//! Registration announcements carry the controller's own IPv4 and MAC
//! address, one announcement per local interface. The list is rebuilt from
//! scratch on every discovery cycle.

use std::net::{IpAddr, Ipv4Addr};

use log::{debug, warn};

/// Most interfaces kept per scan; extra ones overwrite the last slot.
pub const MAX_INTERFACES: usize = 8;

/// A local network interface as seen by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: Option<Ipv4Addr>,
    /// Lowercase hex without separators, as the bulbs expect it.
    pub mac: Option<String>,
}

impl NetworkInterface {
    fn new(name: &str) -> Self {
        NetworkInterface {
            name: name.to_string(),
            ip: None,
            mac: None,
        }
    }
}

/// Source of the local interface list.
pub trait InterfaceScanner: Send {
    /// Enumerate the non-loopback interfaces. Failures yield an empty or
    /// partial list, never an error.
    fn scan(&mut self) -> Vec<NetworkInterface>;
}

/// Builds an interface list, merging address entries by interface name.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    entries: Vec<NetworkInterface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ipv4(&mut self, name: &str, ip: Ipv4Addr) {
        let idx = self.slot(name);
        self.entries[idx].ip = Some(ip);
    }

    pub fn add_mac(&mut self, name: &str, bytes: &[u8]) {
        let idx = self.slot(name);
        self.entries[idx].mac = Some(format_mac(bytes));
    }

    pub fn into_interfaces(self) -> Vec<NetworkInterface> {
        self.entries
    }

    fn slot(&mut self, name: &str) -> usize {
        if let Some(idx) = self.entries.iter().position(|e| e.name == name) {
            return idx;
        }
        if self.entries.len() >= MAX_INTERFACES {
            self.entries.truncate(MAX_INTERFACES - 1);
        }
        self.entries.push(NetworkInterface::new(name));
        self.entries.len() - 1
    }
}

/// Scans the host interfaces through the operating system.
#[derive(Debug, Default)]
pub struct SystemScanner;

impl InterfaceScanner for SystemScanner {
    fn scan(&mut self) -> Vec<NetworkInterface> {
        let addresses = match local_ip_address::list_afinet_netifas() {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("cannot enumerate network interfaces: {e}");
                return Vec::new();
            }
        };

        let mut table = InterfaceTable::new();
        for (name, ip) in addresses {
            let IpAddr::V4(ip) = ip else { continue };
            if ip.is_loopback() {
                continue;
            }
            table.add_ipv4(&name, ip);
            match mac_address::mac_address_by_name(&name) {
                Ok(Some(mac)) => table.add_mac(&name, &mac.bytes()),
                Ok(None) => {}
                Err(e) => debug!("no MAC address for {name}: {e}"),
            }
        }

        let interfaces = table.into_interfaces();
        for i in &interfaces {
            debug!("Interface {}: IP {:?}, MAC {:?}", i.name, i.ip, i.mac);
        }
        interfaces
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_by_name() {
        let mut table = InterfaceTable::new();
        table.add_ipv4("eth0", Ipv4Addr::new(192, 168, 1, 10));
        table.add_mac("wlan0", &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        table.add_mac("eth0", &[0xa8, 0xbb, 0x50, 0x0a, 0x0b, 0xff]);

        let interfaces = table.into_interfaces();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(interfaces[0].ip, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(interfaces[0].mac.as_deref(), Some("a8bb500a0bff"));
        assert_eq!(interfaces[1].ip, None);
        assert_eq!(interfaces[1].mac.as_deref(), Some("010203040506"));
    }

    #[test]
    fn test_overflow_overwrites_last_slot() {
        let mut table = InterfaceTable::new();
        for i in 0..MAX_INTERFACES + 2 {
            table.add_ipv4(&format!("if{i}"), Ipv4Addr::new(10, 0, 0, i as u8));
        }
        let interfaces = table.into_interfaces();
        assert_eq!(interfaces.len(), MAX_INTERFACES);
        assert_eq!(interfaces[MAX_INTERFACES - 2].name, "if6");
        assert_eq!(interfaces[MAX_INTERFACES - 1].name, "if9");
    }
}
