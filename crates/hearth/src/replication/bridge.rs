//! ReplicationBridge: keeps a generation's collections and a room's
//! replicated maps in step.
//!
//! Each replicated collection maps one-to-one onto the replicated map of the
//! same name, keyed by record id. Both directions apply last-write-wins by
//! `updatedAt`. Echo loops are cut per record: while a remote value for
//! `(collection, id)` is being applied locally, local change events for that
//! record are not mirrored back, and while a local record is being mirrored,
//! remote events for that same record are ignored. Events for other records
//! flow normally, even when they arrive in the middle of a write.
//!
//! Errors never escape a subscription callback. They are logged and kept as
//! the bridge's last error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReplicationError, StorageError};
use crate::reactive::{ChangeEvent, Unsubscribe};
use crate::storage::GenerationStore;
use crate::types::{now_iso, record_id};

use super::doc::{ChangeOrigin, MapChange, MapEvent, ObserverId, ReplicatedDoc, ReplicatedMap};
use super::lww::incoming_wins;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Pushed,
    Pulled,
    LocalDeleted,
    RemoteDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub at: String,
    pub collection: String,
    pub id: String,
    pub kind: SyncEventKind,
}

/// Counts from the initial reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pushed: usize,
    pub pulled: usize,
}

type RecordKey = (String, String);

/// Records with a write in flight in one direction. Counted, so nested holds
/// on the same record release correctly.
#[derive(Default)]
struct InFlight(Mutex<HashMap<RecordKey, usize>>);

impl InFlight {
    fn hold(&self, collection: &str, id: &str) -> InFlightGuard<'_> {
        let key = (collection.to_string(), id.to_string());
        *self.0.lock().entry(key.clone()).or_insert(0) += 1;
        InFlightGuard { set: self, key }
    }

    fn contains(&self, collection: &str, id: &str) -> bool {
        self.0
            .lock()
            .contains_key(&(collection.to_string(), id.to_string()))
    }
}

/// Releases one hold on drop.
struct InFlightGuard<'a> {
    set: &'a InFlight,
    key: RecordKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.set.0.lock();
        if let Some(count) = held.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                held.remove(&self.key);
            }
        }
    }
}

enum Subscription {
    Local(Unsubscribe),
    Remote(Arc<dyn ReplicatedMap>, ObserverId),
}

struct BridgeInner {
    store: Arc<GenerationStore>,
    doc: Arc<dyn ReplicatedDoc>,
    collections: Vec<String>,
    applying_remote: InFlight,
    applying_local: InFlight,
    torn_down: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    recent: Mutex<VecDeque<SyncEvent>>,
    capacity: usize,
    last_error: Mutex<Option<String>>,
    last_sync: Mutex<Option<String>>,
}

pub struct ReplicationBridge {
    inner: Arc<BridgeInner>,
}

impl ReplicationBridge {
    /// Reconcile every collection in `collections`, then subscribe to both
    /// sides. `capacity` bounds the recent-event ring.
    pub fn attach(
        store: Arc<GenerationStore>,
        doc: Arc<dyn ReplicatedDoc>,
        collections: &[String],
        capacity: usize,
    ) -> Result<(Self, ReconcileReport), ReplicationError> {
        let inner = Arc::new(BridgeInner {
            store,
            doc,
            collections: collections.to_vec(),
            applying_remote: InFlight::default(),
            applying_local: InFlight::default(),
            torn_down: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            last_error: Mutex::new(None),
            last_sync: Mutex::new(None),
        });

        let mut report = ReconcileReport::default();
        for collection in &inner.collections {
            let partial = inner.reconcile(collection)?;
            report.pushed += partial.pushed;
            report.pulled += partial.pulled;
        }

        for collection in &inner.collections {
            BridgeInner::subscribe(&inner, collection);
        }
        *inner.last_sync.lock() = Some(now_iso());

        tracing::info!(
            collections = inner.collections.len(),
            pushed = report.pushed,
            pulled = report.pulled,
            "replication bridge attached"
        );
        Ok((Self { inner }, report))
    }

    /// Unsubscribe from both sides and disconnect the document. Callbacks
    /// that arrive afterwards are discarded. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    pub fn doc(&self) -> &Arc<dyn ReplicatedDoc> {
        &self.inner.doc
    }

    pub fn recent_events(&self) -> Vec<SyncEvent> {
        self.inner.recent.lock().iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.inner.last_error.lock() = None;
    }

    pub fn last_sync_time(&self) -> Option<String> {
        self.inner.last_sync.lock().clone()
    }
}

impl Drop for ReplicationBridge {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl BridgeInner {
    fn torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            match subscription {
                Subscription::Local(unsubscribe) => unsubscribe(),
                Subscription::Remote(map, id) => map.unobserve(id),
            }
        }
        self.doc.disconnect();
        tracing::info!("replication bridge torn down");
    }

    fn record(&self, collection: &str, id: &str, kind: SyncEventKind) {
        let at = now_iso();
        {
            let mut recent = self.recent.lock();
            recent.push_back(SyncEvent {
                at: at.clone(),
                collection: collection.to_string(),
                id: id.to_string(),
                kind,
            });
            while recent.len() > self.capacity {
                recent.pop_front();
            }
        }
        *self.last_sync.lock() = Some(at);
    }

    fn record_error(&self, collection: &str, error: &ReplicationError) {
        tracing::warn!(collection = %collection, error = %error, "replication error");
        *self.last_error.lock() = Some(error.to_string());
    }

    // -----------------------------------------------------------------------
    // Initial reconciliation
    // -----------------------------------------------------------------------

    fn reconcile(&self, collection: &str) -> Result<ReconcileReport, ReplicationError> {
        let map = self.doc.map(collection);
        let mut report = ReconcileReport::default();

        for record in self.store.list(collection)? {
            let Some(id) = record_id(&record).map(str::to_string) else {
                continue;
            };
            if incoming_wins(&record, map.get(&id).as_ref()) {
                let _mirroring = self.applying_local.hold(collection, &id);
                map.set(&id, record);
                self.record(collection, &id, SyncEventKind::Pushed);
                report.pushed += 1;
            }
        }

        for (key, value) in map.entries() {
            let _applying = self.applying_remote.hold(collection, &key);
            match self.apply_remote_set(collection, &key, value) {
                Ok(true) => report.pulled += 1,
                Ok(false) => {}
                Err(e) => self.record_error(collection, &e),
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Steady state
    // -----------------------------------------------------------------------

    fn subscribe(this: &Arc<Self>, collection: &str) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let local = this.store.subscribe(collection, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_local_change(event);
            }
        });

        let map = this.doc.map(collection);
        let weak: Weak<Self> = Arc::downgrade(this);
        let name = collection.to_string();
        let observer = map.observe(Arc::new(move |event: &MapEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_remote_change(&name, event);
            }
        }));

        let mut subscriptions = this.subscriptions.lock();
        subscriptions.push(Subscription::Local(local));
        subscriptions.push(Subscription::Remote(map, observer));
    }

    fn on_local_change(&self, event: &ChangeEvent) {
        if self.torn_down() {
            return;
        }
        let collection = event.collection();
        if let Err(e) = self.mirror_local(event) {
            self.record_error(collection, &e);
        }
    }

    fn mirror_local(&self, event: &ChangeEvent) -> Result<(), ReplicationError> {
        let collection = event.collection();
        let map = self.doc.map(collection);

        let echo = |id: &str| self.applying_remote.contains(collection, id);

        match event {
            ChangeEvent::Delete { id, .. } if !echo(id.as_str()) => {
                let _mirroring = self.applying_local.hold(collection, id);
                if map.delete(id) {
                    self.record(collection, id, SyncEventKind::LocalDeleted);
                }
            }
            ChangeEvent::Put { id, data, .. } if !echo(id.as_str()) => {
                self.mirror_record(collection, &*map, id, data)?
            }
            ChangeEvent::Delete { .. } | ChangeEvent::Put { .. } => {}
            ChangeEvent::Bulk { ids, .. } => {
                for id in ids.iter().filter(|id| !echo(id.as_str())) {
                    if let Some(data) = self.store.get(collection, id)? {
                        self.mirror_record(collection, &*map, id, &data)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Push a local record if it beats the remote one; pull the remote one
    /// back if it is strictly newer.
    fn mirror_record(
        &self,
        collection: &str,
        map: &dyn ReplicatedMap,
        id: &str,
        data: &Value,
    ) -> Result<(), ReplicationError> {
        let remote = map.get(id);
        if incoming_wins(data, remote.as_ref()) {
            let _mirroring = self.applying_local.hold(collection, id);
            map.set(id, data.clone());
            self.record(collection, id, SyncEventKind::Pushed);
        } else if let Some(remote) = remote {
            if incoming_wins(&remote, Some(data)) {
                let _applying = self.applying_remote.hold(collection, id);
                self.apply_remote_set(collection, id, remote)?;
            }
        }
        Ok(())
    }

    fn on_remote_change(&self, collection: &str, event: &MapEvent) {
        let key = match &event.change {
            MapChange::Set { key, .. } | MapChange::Delete { key } => key.as_str(),
        };
        if self.torn_down()
            || event.origin == ChangeOrigin::Local
            || self.applying_local.contains(collection, key)
        {
            return;
        }

        let _applying = self.applying_remote.hold(collection, key);
        let result = match &event.change {
            MapChange::Set { value, .. } => self
                .apply_remote_set(collection, key, value.clone())
                .map(|_| ()),
            MapChange::Delete { .. } => self.apply_remote_delete(collection, key),
        };
        if let Err(e) = result {
            self.record_error(collection, &e);
        }
    }

    /// Apply a remote value locally if it is strictly newer. Returns whether
    /// it was applied.
    fn apply_remote_set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
    ) -> Result<bool, ReplicationError> {
        let rejected = |reason: String| ReplicationError::RemoteRejected {
            collection: collection.to_string(),
            key: key.to_string(),
            reason,
        };

        if record_id(&value) != Some(key) {
            return Err(rejected("record id does not match its key".to_string()));
        }
        let local = self.store.get(collection, key)?;
        if !incoming_wins(&value, local.as_ref()) {
            return Ok(false);
        }

        match self.store.put(collection, value) {
            Ok(_) => {
                self.record(collection, key, SyncEventKind::Pulled);
                Ok(true)
            }
            Err(StorageError::Invalid { source, .. }) => Err(rejected(source.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_remote_delete(&self, collection: &str, key: &str) -> Result<(), ReplicationError> {
        if self.store.remove(collection, key)? {
            self.record(collection, key, SyncEventKind::RemoteDeleted);
        }
        Ok(())
    }
}
