//! Wire format of the WiZ UDP protocol.
//!
//! Datagrams are single-line JSON objects terminated by a NUL byte. Field
//! names and casing must match what the bulb firmware expects.

use std::net::SocketAddrV4;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Offset added to a registry index to tag per-device messages.
///
/// Replies are matched by MAC address; the tag only helps correlate traffic
/// when debugging or simulating bulbs.
pub const ID_OFFSET: u32 = 12000;

/// Message id used by the global registration broadcast.
pub const BROADCAST_ID: u32 = 1;

/// Largest datagram the bridge reads.
pub const MAX_DATAGRAM: usize = 4096;

/// Protocol methods the bridge knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Method {
    Registration,
    SetPilot,
    FirstBeat,
    SyncPilot,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
struct Request<P> {
    method: Method,
    id: u32,
    env: Option<&'static str>,
    params: P,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationParams<'a> {
    phone_ip: &'a str,
    register: bool,
    phone_mac: &'a str,
}

#[derive(Debug, Serialize)]
struct StateParams {
    state: bool,
}

/// A message sent by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Announce the controller so bulbs start sending heartbeats to it.
    Registration {
        id: u32,
        phone_ip: String,
        phone_mac: String,
    },
    /// Switch a bulb on or off.
    SetPilot { id: u32, state: bool },
}

impl Command {
    pub fn method(&self) -> Method {
        match self {
            Command::Registration { .. } => Method::Registration,
            Command::SetPilot { .. } => Method::SetPilot,
        }
    }

    /// Render the message as JSON.
    ///
    /// ```
    /// use wiz_bridge::protocol::Command;
    ///
    /// let json = Command::SetPilot { id: 12000, state: true }.to_json().unwrap();
    /// assert_eq!(
    ///     json,
    ///     r#"{"method":"setPilot","id":12000,"env":"pro","params":{"state":true}}"#
    /// );
    /// ```
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            Command::Registration {
                id,
                phone_ip,
                phone_mac,
            } => serde_json::to_string(&Request {
                method: Method::Registration,
                id: *id,
                env: None,
                params: RegistrationParams {
                    phone_ip,
                    register: true,
                    phone_mac,
                },
            }),
            Command::SetPilot { id, state } => serde_json::to_string(&Request {
                method: Method::SetPilot,
                id: *id,
                env: Some("pro"),
                params: StateParams { state: *state },
            }),
        };
        json.map_err(Error::JsonDump)
    }

    /// Encode the message as a NUL-terminated datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = self.to_json()?.into_bytes();
        bytes.push(0);
        Ok(bytes)
    }
}

/// A command waiting to be sent, with its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: SocketAddrV4,
    pub command: Command,
}

/// A message received from a bulb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// The bulb just powered up, which means someone switched it on.
    FirstBeat { mac: String },
    /// Heartbeat or acknowledgement carrying the actual on/off state.
    SyncPilot { mac: String, state: bool },
    /// A well-formed message the bridge has no use for.
    Ignored { method: String },
}

impl Report {
    /// Decode an inbound datagram.
    pub fn parse(data: &[u8]) -> Result<Report> {
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        let text = String::from_utf8(data[..end].to_vec()).map_err(Error::Utf8Decode)?;
        let json: Value = serde_json::from_str(&text).map_err(Error::JsonLoad)?;

        let Some(method) = json.get("method").and_then(|m| m.as_str()) else {
            return Err(Error::protocol("no valid method", &text));
        };
        let method = match Method::from_str(method) {
            Ok(m @ (Method::FirstBeat | Method::SyncPilot)) => m,
            _ => {
                return Ok(Report::Ignored {
                    method: method.to_string(),
                });
            }
        };

        let params = json.get("params");
        let Some(mac) = params.and_then(|p| p.get("mac")).and_then(|m| m.as_str()) else {
            return Err(Error::protocol("no valid MAC address", &text));
        };
        let mac = mac.to_string();

        if method == Method::FirstBeat {
            return Ok(Report::FirstBeat { mac });
        }

        let Some(state) = params.and_then(|p| p.get("state")).and_then(|s| s.as_bool()) else {
            return Err(Error::protocol("no valid state", &text));
        };
        Ok(Report::SyncPilot { mac, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_shape() {
        let cmd = Command::Registration {
            id: BROADCAST_ID,
            phone_ip: "192.168.1.10".into(),
            phone_mac: "a8bb500a0bff".into(),
        };
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"method":"registration","id":1,"params":{"phoneIp":"192.168.1.10","register":true,"phoneMac":"a8bb500a0bff"}}"#
        );
    }

    #[test]
    fn test_set_pilot_is_nul_terminated() {
        let bytes = Command::SetPilot {
            id: ID_OFFSET + 3,
            state: false,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes.last(), Some(&0));
        let value: Value = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(
            value,
            json!({"method": "setPilot", "id": 12003, "env": "pro", "params": {"state": false}})
        );
    }

    #[test]
    fn test_parse_sync_pilot() {
        let data = br#"{"method":"syncPilot","env":"pro","params":{"mac":"a8bb50000001","rssi":-60,"src":"","state":true,"sceneId":0}}"#;
        assert_eq!(
            Report::parse(data).unwrap(),
            Report::SyncPilot {
                mac: "a8bb50000001".into(),
                state: true
            }
        );
    }

    #[test]
    fn test_parse_first_beat_with_trailing_nul() {
        let mut data = br#"{"method":"firstBeat","env":"pro","params":{"mac":"a8bb50000001","homeId":1,"fwVersion":"1.21.0"}}"#.to_vec();
        data.push(0);
        assert_eq!(
            Report::parse(&data).unwrap(),
            Report::FirstBeat {
                mac: "a8bb50000001".into()
            }
        );
    }

    #[test]
    fn test_parse_stops_at_first_nul() {
        let mut data = br#"{"method":"syncPilot","params":{"mac":"a8bb50000001","state":false}}"#.to_vec();
        data.push(0);
        data.extend_from_slice(b"junk\xff");
        assert_eq!(
            Report::parse(&data).unwrap(),
            Report::SyncPilot {
                mac: "a8bb50000001".into(),
                state: false
            }
        );
    }

    #[test]
    fn test_parse_ignored_method() {
        let data = br#"{"method":"getPilot","env":"pro","result":{"mac":"a8bb50000001"}}"#;
        assert_eq!(
            Report::parse(data).unwrap(),
            Report::Ignored {
                method: "getPilot".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            Report::parse(b"not json"),
            Err(Error::JsonLoad(_))
        ));
        assert!(matches!(
            Report::parse(br#"{"params":{"mac":"x"}}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Report::parse(br#"{"method":"syncPilot","params":{"state":true}}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Report::parse(br#"{"method":"syncPilot","params":{"mac":"x","state":"on"}}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Report::parse(&[0xff, 0xfe]),
            Err(Error::Utf8Decode(_))
        ));
    }
}
