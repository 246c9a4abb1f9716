//! Device sync surface.
//!
//! - [`invite`]: [`RoomCredentials`] and the invite token/link codec.
//! - [`settings`]: persisted [`DeviceSettings`].
//! - [`controller`]: [`SyncController`] and [`SyncState`].

pub mod controller;
pub mod invite;
pub mod settings;

pub use controller::{SyncController, SyncState};
pub use invite::RoomCredentials;
pub use settings::{normalize_device_name, DeviceSettings, SettingsStore, SETTINGS_KEY};
