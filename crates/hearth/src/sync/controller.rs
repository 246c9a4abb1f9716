//! SyncController: owns the replicated document and bridge of a session.
//!
//! Enabling connects to the configured room, attaches a [`ReplicationBridge`]
//! and publishes this session's awareness state. Every awareness change
//! recomputes the connected devices and checks protocol versions; a peer on a
//! newer protocol makes the controller tear the bridge down and disconnect in
//! that same callback. Disabling, or switching rooms, discards the document
//! and bridge entirely; enabling builds new ones.
//!
//! The controller's locks are never held while calling into the document or
//! its awareness, since those may call straight back into the controller.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;

use crate::awareness::{check_version_mismatch, get_connected_devices, ConnectedDevice, PeerSession, VersionMismatch};
use crate::error::SyncError;
use crate::options::HearthOptions;
use crate::reactive::{Notifier, Unsubscribe};
use crate::replication::{Awareness, DocConnector, ObserverId, ReplicationBridge, SyncEvent};
use crate::storage::GenerationStore;
use crate::types::now_iso;

use super::invite::RoomCredentials;
use super::settings::{DeviceSettings, SettingsStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_enabled: bool,
    pub is_online: bool,
    pub is_syncing: bool,
    pub connected_devices: Vec<ConnectedDevice>,
    pub version_mismatch: Option<VersionMismatch>,
    pub sync_error: Option<String>,
    pub last_sync_time: Option<String>,
    pub recent_sync_events: Vec<SyncEvent>,
}

struct ActiveSync {
    bridge: ReplicationBridge,
    awareness: Arc<dyn Awareness>,
    observer: ObserverId,
}

struct ControllerInner {
    store: Arc<GenerationStore>,
    settings: Arc<SettingsStore>,
    connector: Arc<dyn DocConnector>,
    options: HearthOptions,
    session_id: String,
    collections: Vec<String>,
    state: Mutex<SyncState>,
    active: Mutex<Option<ActiveSync>>,
    notifier: Arc<Notifier<SyncState>>,
    /// Serializes enable/disable/create/join.
    op_lock: TokioMutex<()>,
}

pub struct SyncController {
    inner: Arc<ControllerInner>,
}

impl SyncController {
    pub fn new(
        store: Arc<GenerationStore>,
        settings: Arc<SettingsStore>,
        connector: Arc<dyn DocConnector>,
        options: HearthOptions,
        session_id: impl Into<String>,
    ) -> Self {
        let collections = store.catalog().names();
        Self {
            inner: Arc::new(ControllerInner {
                store,
                settings,
                connector,
                options,
                session_id: session_id.into(),
                collections,
                state: Mutex::new(SyncState::default()),
                active: Mutex::new(None),
                notifier: Arc::new(Notifier::new()),
                op_lock: TokioMutex::new(()),
            }),
        }
    }

    /// Current state, including the live bridge's recent events.
    pub fn state(&self) -> SyncState {
        self.inner.snapshot()
    }

    pub fn on_state_change(
        &self,
        callback: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.notifier.subscribe(callback)
    }

    pub fn settings(&self) -> Result<DeviceSettings, SyncError> {
        Ok(self.inner.settings.get()?)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Connect to the configured room and start replicating.
    pub async fn enable_sync(&self) -> Result<SyncState, SyncError> {
        let _op = self.inner.op_lock.lock().await;
        self.inner.enable().await
    }

    pub async fn disable_sync(&self) -> Result<SyncState, SyncError> {
        let _op = self.inner.op_lock.lock().await;
        self.inner.settings.set_sync_enabled(false)?;
        self.inner.disconnect_active();
        self.inner.update(|s| {
            s.is_enabled = false;
            s.is_online = false;
            s.is_syncing = false;
            s.connected_devices.clear();
        });
        tracing::info!("sync disabled");
        Ok(self.state())
    }

    /// Generate a new space, make it this device's room and connect to it.
    pub async fn create_space(&self) -> Result<RoomCredentials, SyncError> {
        let _op = self.inner.op_lock.lock().await;
        let room = RoomCredentials::generate();
        self.inner.switch_room(room.clone()).await?;
        Ok(room)
    }

    /// Join the space named by an invite link or token, then connect.
    pub async fn join_space(&self, invite: &str) -> Result<RoomCredentials, SyncError> {
        let room = RoomCredentials::parse(invite)?;
        let _op = self.inner.op_lock.lock().await;
        self.inner.switch_room(room.clone()).await?;
        Ok(room)
    }

    pub fn set_device_name(&self, name: &str) -> Result<DeviceSettings, SyncError> {
        let settings = self.inner.settings.set_device_name(name)?;
        self.inner.publish_presence(&settings);
        Ok(settings)
    }

    /// Hide the mismatch notice. Sync stays disconnected.
    pub fn dismiss_version_mismatch(&self) {
        self.inner.update(|s| s.version_mismatch = None);
    }

    /// Invite link for the current room.
    pub fn invite_url(&self, base: &str) -> Result<String, SyncError> {
        let room = self.inner.settings.get()?.room.ok_or(SyncError::NoRoom)?;
        Ok(room.to_url(base))
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.inner.disconnect_active();
    }
}

impl ControllerInner {
    fn update(&self, f: impl FnOnce(&mut SyncState)) {
        {
            let mut state = self.state.lock();
            f(&mut state);
        }
        self.notifier.notify(&self.snapshot());
    }

    fn snapshot(&self) -> SyncState {
        let mut state = self.state.lock().clone();
        if let Some(active) = self.active.lock().as_ref() {
            state.recent_sync_events = active.bridge.recent_events();
            state.last_sync_time = active.bridge.last_sync_time().or(state.last_sync_time);
            state.sync_error = active.bridge.last_error().or(state.sync_error);
        }
        state
    }

    async fn switch_room(self: &Arc<Self>, room: RoomCredentials) -> Result<SyncState, SyncError> {
        self.settings.set_room(Some(room))?;
        self.disconnect_active();
        self.update(|s| {
            s.version_mismatch = None;
            s.connected_devices.clear();
        });
        self.enable().await
    }

    async fn enable(self: &Arc<Self>) -> Result<SyncState, SyncError> {
        let settings = self.settings.load_or_init()?;
        let room = settings.room.clone().ok_or(SyncError::NoRoom)?;
        self.settings.set_sync_enabled(true)?;

        if self.active.lock().is_some() {
            return Ok(self.snapshot());
        }

        self.update(|s| {
            s.is_enabled = true;
            s.is_syncing = true;
            s.sync_error = None;
        });

        let doc = match self.connector.connect(&room).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(room = %room.room_id, error = %e, "sync connect failed");
                self.update(|s| {
                    s.is_online = false;
                    s.is_syncing = false;
                    s.sync_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let attached = ReplicationBridge::attach(
            Arc::clone(&self.store),
            Arc::clone(&doc),
            &self.collections,
            self.options.recent_event_capacity,
        );
        let (bridge, report) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                doc.disconnect();
                self.update(|s| {
                    s.is_online = false;
                    s.is_syncing = false;
                    s.sync_error = Some(e.to_string());
                });
                return Err(e.into());
            }
        };

        let awareness = doc.awareness();
        let weak: Weak<Self> = Arc::downgrade(self);
        let observer = awareness.on_change(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_awareness_change();
            }
        }));

        *self.active.lock() = Some(ActiveSync {
            bridge,
            awareness: Arc::clone(&awareness),
            observer,
        });

        self.update(|s| {
            s.is_online = true;
            s.is_syncing = false;
            s.version_mismatch = None;
            s.last_sync_time = Some(now_iso());
        });
        tracing::info!(
            room = %room.room_id,
            pushed = report.pushed,
            pulled = report.pulled,
            "sync enabled"
        );

        self.publish_presence(&settings);
        self.on_awareness_change();
        Ok(self.snapshot())
    }

    fn current_awareness(&self) -> Option<Arc<dyn Awareness>> {
        self.active
            .lock()
            .as_ref()
            .map(|a| Arc::clone(&a.awareness))
    }

    fn publish_presence(&self, settings: &DeviceSettings) {
        let Some(awareness) = self.current_awareness() else {
            return;
        };
        let presence = PeerSession {
            device_id: settings.device_id.clone(),
            session_id: self.session_id.clone(),
            display_name: settings.device_name.clone(),
            protocol_version: self.options.protocol_version,
            last_seen_at: chrono::Utc::now().timestamp_millis(),
        };
        awareness.set_local_state(Some(presence.to_state()));
    }

    fn on_awareness_change(&self) {
        let Some(awareness) = self.current_awareness() else {
            return;
        };
        let states = awareness.states();
        let device_id = match self.settings.get() {
            Ok(settings) => settings.device_id,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read device settings");
                return;
            }
        };

        if let Some(mismatch) = check_version_mismatch(&states, self.options.protocol_version) {
            tracing::warn!(
                local = mismatch.local_version,
                peer = mismatch.peer_version,
                peer_device = %mismatch.peer_device_name,
                "peer runs a newer protocol, disconnecting"
            );
            self.disconnect_active();
            self.update(|s| {
                s.is_online = false;
                s.is_syncing = false;
                s.connected_devices.clear();
                s.version_mismatch = Some(mismatch);
            });
            return;
        }

        let devices = get_connected_devices(&states, &device_id);
        self.update(|s| s.connected_devices = devices);
    }

    /// Tear down the bridge and leave the room, keeping the bridge's last
    /// events in the state.
    fn disconnect_active(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };
        {
            let mut state = self.state.lock();
            state.recent_sync_events = active.bridge.recent_events();
            state.last_sync_time = active.bridge.last_sync_time().or(state.last_sync_time.take());
            if let Some(error) = active.bridge.last_error() {
                state.sync_error = Some(error);
            }
        }
        active.awareness.off_change(active.observer);
        active.awareness.set_local_state(None);
        active.bridge.teardown();
    }
}
