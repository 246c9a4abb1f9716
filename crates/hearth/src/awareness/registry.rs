//! Peer awareness: who is connected, and is anyone running a newer protocol.
//!
//! Raw awareness states are untrusted JSON published by peers. Anything that
//! does not decode as a [`PeerSession`] is left out of the device list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What each session publishes in its awareness state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSession {
    pub device_id: String,
    pub session_id: String,
    pub display_name: String,
    pub protocol_version: u32,
    /// Epoch millis.
    pub last_seen_at: i64,
}

impl PeerSession {
    pub fn from_state(state: &Value) -> Option<Self> {
        let session: Self = serde_json::from_value(state.clone()).ok()?;
        (!session.device_id.is_empty()).then_some(session)
    }

    pub fn to_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One device, aggregated over its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevice {
    pub device_id: String,
    pub display_name: String,
    /// Highest protocol version among the device's sessions.
    pub protocol_version: u32,
    pub last_seen_at: i64,
    pub tab_count: usize,
    pub is_current_device: bool,
}

/// Group raw states by device. The local device, if present, comes first;
/// the rest are ordered by display name, then device id.
pub fn get_connected_devices(
    states: &BTreeMap<u64, Value>,
    local_device_id: &str,
) -> Vec<ConnectedDevice> {
    let mut devices: BTreeMap<String, ConnectedDevice> = BTreeMap::new();

    for session in states.values().filter_map(PeerSession::from_state) {
        devices
            .entry(session.device_id.clone())
            .and_modify(|d| {
                d.tab_count += 1;
                d.protocol_version = d.protocol_version.max(session.protocol_version);
                if session.last_seen_at > d.last_seen_at {
                    d.last_seen_at = session.last_seen_at;
                    d.display_name = session.display_name.clone();
                }
            })
            .or_insert_with(|| ConnectedDevice {
                is_current_device: session.device_id == local_device_id,
                device_id: session.device_id.clone(),
                display_name: session.display_name.clone(),
                protocol_version: session.protocol_version,
                last_seen_at: session.last_seen_at,
                tab_count: 1,
            });
    }

    let mut list: Vec<ConnectedDevice> = devices.into_values().collect();
    list.sort_by(|a, b| {
        b.is_current_device
            .cmp(&a.is_current_device)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.device_id.cmp(&b.device_id))
    });
    list
}

/// Number of other devices connected.
pub fn remote_peer_count(devices: &[ConnectedDevice]) -> usize {
    devices.iter().filter(|d| !d.is_current_device).count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMismatch {
    pub detected: bool,
    pub local_version: u32,
    pub peer_version: u32,
    pub peer_device_name: String,
}

/// The first peer, in client-id order, advertising a protocol newer than
/// `local_version`.
///
/// Only `protocolVersion` is required here. A newer peer may publish a state
/// this build cannot fully decode, and that is exactly the peer to report.
pub fn check_version_mismatch(
    states: &BTreeMap<u64, Value>,
    local_version: u32,
) -> Option<VersionMismatch> {
    states.values().find_map(|state| {
        let peer_version = state
            .get("protocolVersion")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())?;
        (peer_version > local_version).then(|| VersionMismatch {
            detected: true,
            local_version,
            peer_version,
            peer_device_name: advertised_name(state),
        })
    })
}

fn advertised_name(state: &Value) -> String {
    ["displayName", "deviceId"]
        .iter()
        .filter_map(|field| state.get(*field).and_then(Value::as_str))
        .find(|name| !name.trim().is_empty())
        .unwrap_or("unknown device")
        .to_string()
}
