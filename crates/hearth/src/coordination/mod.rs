//! Cross-session migration coordination.
//!
//! - [`message`]: [`MigrationMessage`] and its [`Envelope`].
//! - [`channel`]: [`BroadcastChannel`] trait and the in-process hub.
//! - [`coordinator`]: [`TabCoordinator`] roles and leader election.

pub mod channel;
pub mod coordinator;
pub mod message;

pub use channel::{BroadcastChannel, LocalBroadcastHub, LocalChannel, Subscription, MIGRATION_CHANNEL};
pub use coordinator::{
    CoordinatorSnapshot, FollowerView, MigrationRole, ReloadHook, StartupDecision, TabCoordinator,
};
pub use message::{Envelope, MigrationMessage};
