//! Replicated document interfaces.
//!
//! A room's document exposes named key/value maps, one per replicated
//! collection, plus an awareness channel for ephemeral per-client state.
//! Observers are invoked synchronously, after the change is applied, and are
//! told whether the change originated from this document or a remote peer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::sync::invite::RoomCredentials;

pub type ObserverId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum MapChange {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl MapChange {
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent {
    pub change: MapChange,
    pub origin: ChangeOrigin,
}

pub type MapObserver = Arc<dyn Fn(&MapEvent) + Send + Sync>;
pub type AwarenessObserver = Arc<dyn Fn() + Send + Sync>;

pub trait ReplicatedMap: Send + Sync {
    fn name(&self) -> &str;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> bool;
    fn entries(&self) -> Vec<(String, Value)>;
    fn observe(&self, observer: MapObserver) -> ObserverId;
    fn unobserve(&self, id: ObserverId);
}

pub trait Awareness: Send + Sync {
    fn client_id(&self) -> u64;
    /// Every connected client's state, keyed by client id.
    fn states(&self) -> BTreeMap<u64, Value>;
    /// `None` withdraws this client's state.
    fn set_local_state(&self, state: Option<Value>);
    fn on_change(&self, observer: AwarenessObserver) -> ObserverId;
    fn off_change(&self, id: ObserverId);
}

pub trait ReplicatedDoc: Send + Sync {
    fn map(&self, name: &str) -> Arc<dyn ReplicatedMap>;
    fn awareness(&self) -> Arc<dyn Awareness>;
    fn is_connected(&self) -> bool;
    /// Leave the room. Observers registered through this document stop
    /// firing before this returns.
    fn disconnect(&self);
}

/// Opens the shared document of a room.
#[async_trait]
pub trait DocConnector: Send + Sync {
    async fn connect(&self, room: &RoomCredentials) -> Result<Arc<dyn ReplicatedDoc>, SyncError>;
}
