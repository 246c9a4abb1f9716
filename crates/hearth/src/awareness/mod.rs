//! Peer awareness registry.

pub mod registry;

pub use registry::{
    check_version_mismatch, get_connected_devices, remote_peer_count, ConnectedDevice,
    PeerSession, VersionMismatch,
};
