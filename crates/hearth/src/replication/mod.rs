//! Cross-device replication.
//!
//! - [`doc`]: replicated document, map and awareness traits.
//! - [`memory`]: [`MemoryNetwork`], in-process rooms.
//! - [`lww`]: last-write-wins comparison.
//! - [`bridge`]: [`ReplicationBridge`] between a generation and a room.

pub mod bridge;
pub mod doc;
pub mod lww;
pub mod memory;

pub use bridge::{ReconcileReport, ReplicationBridge, SyncEvent, SyncEventKind};
pub use doc::{
    Awareness, AwarenessObserver, ChangeOrigin, DocConnector, MapChange, MapEvent, MapObserver,
    ObserverId, ReplicatedDoc, ReplicatedMap,
};
pub use memory::{MemoryDoc, MemoryNetwork};
