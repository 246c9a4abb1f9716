//! MemoryNetwork: in-process rooms of replicated documents.
//!
//! Every document in a room views the same shared maps, so a write is visible
//! to all peers as soon as it returns, and observers of every connected
//! document are notified synchronously. The network lock is never held while
//! an observer runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::SyncError;
use crate::sync::invite::RoomCredentials;

use super::doc::{
    Awareness, AwarenessObserver, ChangeOrigin, DocConnector, MapChange, MapEvent, MapObserver,
    ObserverId, ReplicatedDoc, ReplicatedMap,
};

struct MapWatcher {
    id: ObserverId,
    client: u64,
    map: String,
    observer: MapObserver,
}

struct AwarenessWatcher {
    id: ObserverId,
    client: u64,
    observer: AwarenessObserver,
}

#[derive(Default)]
struct Room {
    maps: HashMap<String, BTreeMap<String, Value>>,
    awareness: BTreeMap<u64, Value>,
    members: Vec<u64>,
    map_watchers: Vec<MapWatcher>,
    awareness_watchers: Vec<AwarenessWatcher>,
}

struct NetworkInner {
    rooms: Mutex<HashMap<String, Room>>,
    reachable: AtomicBool,
    next_id: AtomicU64,
}

impl NetworkInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn notify_awareness(&self, room: &str) {
        let observers: Vec<AwarenessObserver> = self
            .rooms
            .lock()
            .get(room)
            .map(|r| {
                r.awareness_watchers
                    .iter()
                    .map(|w| Arc::clone(&w.observer))
                    .collect()
            })
            .unwrap_or_default();
        for observer in observers {
            observer();
        }
    }
}

#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                rooms: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// While unreachable, `connect` fails. Connected documents are unaffected.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
    }

    /// Join `room` directly, bypassing reachability.
    pub fn join(&self, room: &str) -> Arc<MemoryDoc> {
        let client_id = self.inner.next_id();
        self.inner
            .rooms
            .lock()
            .entry(room.to_string())
            .or_default()
            .members
            .push(client_id);
        Arc::new(MemoryDoc {
            shared: Arc::new(DocShared {
                network: Arc::clone(&self.inner),
                room: room.to_string(),
                client_id,
                connected: AtomicBool::new(true),
            }),
        })
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.inner
            .rooms
            .lock()
            .get(room)
            .map_or(0, |r| r.members.len())
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocConnector for MemoryNetwork {
    async fn connect(&self, room: &RoomCredentials) -> Result<Arc<dyn ReplicatedDoc>, SyncError> {
        if !self.inner.reachable.load(Ordering::Acquire) {
            return Err(SyncError::Connect(format!(
                "room {} is unreachable",
                room.room_id
            )));
        }
        let doc: Arc<dyn ReplicatedDoc> = self.join(&room.room_id);
        Ok(doc)
    }
}

// ============================================================================
// MemoryDoc
// ============================================================================

struct DocShared {
    network: Arc<NetworkInner>,
    room: String,
    client_id: u64,
    connected: AtomicBool,
}

impl DocShared {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn with_room<T>(&self, f: impl FnOnce(&mut Room) -> T) -> Option<T> {
        if !self.connected() {
            return None;
        }
        self.network.rooms.lock().get_mut(&self.room).map(f)
    }

    fn write(&self, map: &str, change: MapChange) -> bool {
        let delivered = self.with_room(|room| {
            let entries = room.maps.entry(map.to_string()).or_default();
            let applied = match &change {
                MapChange::Set { key, value } => {
                    entries.insert(key.clone(), value.clone());
                    true
                }
                MapChange::Delete { key } => entries.remove(key).is_some(),
            };
            let observers: Vec<(u64, MapObserver)> = if applied {
                room.map_watchers
                    .iter()
                    .filter(|w| w.map == map)
                    .map(|w| (w.client, Arc::clone(&w.observer)))
                    .collect()
            } else {
                Vec::new()
            };
            (applied, observers)
        });

        let Some((applied, observers)) = delivered else {
            return false;
        };
        for (client, observer) in observers {
            let origin = if client == self.client_id {
                ChangeOrigin::Local
            } else {
                ChangeOrigin::Remote
            };
            observer(&MapEvent {
                change: change.clone(),
                origin,
            });
        }
        applied
    }
}

pub struct MemoryDoc {
    shared: Arc<DocShared>,
}

impl MemoryDoc {
    pub fn client_id(&self) -> u64 {
        self.shared.client_id
    }
}

impl ReplicatedDoc for MemoryDoc {
    fn map(&self, name: &str) -> Arc<dyn ReplicatedMap> {
        Arc::new(MemoryMap {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
        })
    }

    fn awareness(&self) -> Arc<dyn Awareness> {
        Arc::new(MemoryAwareness {
            shared: Arc::clone(&self.shared),
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected()
    }

    fn disconnect(&self) {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let client = self.shared.client_id;
        let had_state = {
            let mut rooms = self.shared.network.rooms.lock();
            match rooms.get_mut(&self.shared.room) {
                Some(room) => {
                    room.members.retain(|c| *c != client);
                    room.map_watchers.retain(|w| w.client != client);
                    room.awareness_watchers.retain(|w| w.client != client);
                    room.awareness.remove(&client).is_some()
                }
                None => false,
            }
        };
        if had_state {
            self.shared.network.notify_awareness(&self.shared.room);
        }
    }
}

struct MemoryMap {
    shared: Arc<DocShared>,
    name: String,
}

impl ReplicatedMap for MemoryMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.shared
            .with_room(|room| room.maps.get(&self.name).and_then(|m| m.get(key).cloned()))
            .flatten()
    }

    fn set(&self, key: &str, value: Value) {
        self.shared.write(
            &self.name,
            MapChange::Set {
                key: key.to_string(),
                value,
            },
        );
    }

    fn delete(&self, key: &str) -> bool {
        self.shared.write(
            &self.name,
            MapChange::Delete {
                key: key.to_string(),
            },
        )
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.shared
            .with_room(|room| {
                room.maps
                    .get(&self.name)
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn observe(&self, observer: MapObserver) -> ObserverId {
        let id = self.shared.network.next_id();
        let client = self.shared.client_id;
        self.shared.with_room(|room| {
            room.map_watchers.push(MapWatcher {
                id,
                client,
                map: self.name.clone(),
                observer,
            })
        });
        id
    }

    fn unobserve(&self, id: ObserverId) {
        if let Some(room) = self.shared.network.rooms.lock().get_mut(&self.shared.room) {
            room.map_watchers.retain(|w| w.id != id);
        }
    }
}

struct MemoryAwareness {
    shared: Arc<DocShared>,
}

impl Awareness for MemoryAwareness {
    fn client_id(&self) -> u64 {
        self.shared.client_id
    }

    fn states(&self) -> BTreeMap<u64, Value> {
        self.shared
            .with_room(|room| room.awareness.clone())
            .unwrap_or_default()
    }

    fn set_local_state(&self, state: Option<Value>) {
        let client = self.shared.client_id;
        let changed = self.shared.with_room(|room| match state {
            Some(value) => {
                room.awareness.insert(client, value);
                true
            }
            None => room.awareness.remove(&client).is_some(),
        });
        if changed == Some(true) {
            self.shared.network.notify_awareness(&self.shared.room);
        }
    }

    fn on_change(&self, observer: AwarenessObserver) -> ObserverId {
        let id = self.shared.network.next_id();
        let client = self.shared.client_id;
        self.shared.with_room(|room| {
            room.awareness_watchers.push(AwarenessWatcher {
                id,
                client,
                observer,
            })
        });
        id
    }

    fn off_change(&self, id: ObserverId) {
        if let Some(room) = self.shared.network.rooms.lock().get_mut(&self.shared.room) {
            room.awareness_watchers.retain(|w| w.id != id);
        }
    }
}
