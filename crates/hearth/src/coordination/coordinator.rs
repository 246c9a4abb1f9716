//! TabCoordinator: per-session migration role over the broadcast channel.
//!
//! Roles: `normal`, `leader`, `follower_waiting`, `follower_reload`. A session
//! that sees another session's `STARTED` follows it and touches no storage
//! until `COMPLETE` (reload) or `FAILED` (back to normal with a flag). The
//! election is a race: the first session whose check resolves true, and which
//! has not yet seen a `STARTED`, announces itself and executes. Losing that
//! race by a few milliseconds is harmless because the migration target is
//! claimed atomically in storage.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::error::{BroadcastError, MigrationError};
use crate::migration::{MigrationOrchestrator, MigrationReport};
use crate::reactive::{Notifier, Unsubscribe};

use super::channel::{BroadcastChannel, Subscription};
use super::message::{Envelope, MigrationMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationRole {
    Normal,
    Leader,
    FollowerWaiting,
    FollowerReload,
}

/// Non-interactive banner shown while another session migrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerView {
    pub progress: u8,
    pub step: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub role: MigrationRole,
    pub follower_view: Option<FollowerView>,
    /// Set when a migration this session was following failed.
    pub migration_failed: bool,
}

impl Default for CoordinatorSnapshot {
    fn default() -> Self {
        Self {
            role: MigrationRole::Normal,
            follower_view: None,
            migration_failed: false,
        }
    }
}

/// Full reload of the session. Never an in-place swap of the open store.
pub type ReloadHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug)]
pub enum StartupDecision {
    /// The active generation is current.
    NotNeeded,
    /// This session led the migration.
    Led(Result<MigrationReport, MigrationError>),
    /// Another session is migrating; wait for its outcome.
    Following,
}

pub struct TabCoordinator {
    session_id: String,
    channel: Arc<dyn BroadcastChannel>,
    subscription: TokioMutex<Subscription>,
    state: Mutex<CoordinatorSnapshot>,
    notifier: Arc<Notifier<CoordinatorSnapshot>>,
    on_reload: Option<ReloadHook>,
}

impl TabCoordinator {
    /// Subscribes immediately, so every message posted after construction is
    /// seen.
    pub fn new(session_id: impl Into<String>, channel: Arc<dyn BroadcastChannel>) -> Self {
        let subscription = channel.subscribe();
        Self {
            session_id: session_id.into(),
            channel,
            subscription: TokioMutex::new(subscription),
            state: Mutex::new(CoordinatorSnapshot::default()),
            notifier: Arc::new(Notifier::new()),
            on_reload: None,
        }
    }

    pub fn with_reload_hook(mut self, hook: ReloadHook) -> Self {
        self.on_reload = Some(hook);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.state.lock().clone()
    }

    pub fn role(&self) -> MigrationRole {
        self.state.lock().role
    }

    pub fn on_change(
        &self,
        callback: impl Fn(&CoordinatorSnapshot) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.notifier.subscribe(callback)
    }

    fn update(&self, f: impl FnOnce(&mut CoordinatorSnapshot) -> bool) -> Option<CoordinatorSnapshot> {
        let snapshot = {
            let mut state = self.state.lock();
            if !f(&mut state) {
                return None;
            }
            state.clone()
        };
        self.notifier.notify(&snapshot);
        Some(snapshot)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Apply one message. Messages from this session are ignored.
    pub fn handle(&self, envelope: &Envelope) {
        if envelope.origin == self.session_id {
            return;
        }

        let changed = self.update(|state| match (&envelope.message, state.role) {
            (MigrationMessage::Started, MigrationRole::Normal) => {
                state.role = MigrationRole::FollowerWaiting;
                state.follower_view = Some(FollowerView {
                    progress: 0,
                    step: "starting".to_string(),
                });
                state.migration_failed = false;
                true
            }
            (
                MigrationMessage::Progress { progress, step },
                MigrationRole::Normal | MigrationRole::FollowerWaiting,
            ) => {
                let floor = state.follower_view.as_ref().map_or(0, |v| v.progress);
                state.role = MigrationRole::FollowerWaiting;
                state.follower_view = Some(FollowerView {
                    progress: (*progress).max(floor).min(100),
                    step: step.clone(),
                });
                true
            }
            (
                MigrationMessage::Complete,
                MigrationRole::Normal | MigrationRole::FollowerWaiting,
            ) => {
                state.role = MigrationRole::FollowerReload;
                state.follower_view = Some(FollowerView {
                    progress: 100,
                    step: "done".to_string(),
                });
                true
            }
            (MigrationMessage::Failed, MigrationRole::FollowerWaiting) => {
                state.role = MigrationRole::Normal;
                state.follower_view = None;
                state.migration_failed = true;
                true
            }
            _ => false,
        });

        if let Some(snapshot) = changed {
            tracing::debug!(
                session = %self.session_id,
                from = %envelope.origin,
                role = ?snapshot.role,
                "migration role updated"
            );
            if snapshot.role == MigrationRole::FollowerReload {
                if let Some(reload) = &self.on_reload {
                    reload();
                }
            }
        }
    }

    /// Handle every message already delivered, without waiting. A no-op while
    /// a spawned listener owns the subscription.
    pub fn pump(&self) -> usize {
        let Ok(mut subscription) = self.subscription.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        while let Some(envelope) = subscription.try_recv() {
            self.handle(&envelope);
            handled += 1;
        }
        handled
    }

    /// Wait for and handle the next message. `false` once the channel is gone.
    pub async fn process_next(&self) -> bool {
        let next = self.subscription.lock().await.recv().await;
        match next {
            Some(envelope) => {
                self.handle(&envelope);
                true
            }
            None => false,
        }
    }

    /// Handle messages on a background task until the channel closes.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { while this.process_next().await {} })
    }

    // -----------------------------------------------------------------------
    // Election
    // -----------------------------------------------------------------------

    /// Become leader and announce `STARTED`, unless another session's
    /// migration has already been observed.
    pub fn try_claim_leadership(&self) -> Result<bool, BroadcastError> {
        self.pump();
        let claimed = self
            .update(|state| {
                if state.role != MigrationRole::Normal {
                    return false;
                }
                state.role = MigrationRole::Leader;
                state.follower_view = None;
                state.migration_failed = false;
                true
            })
            .is_some();
        if claimed {
            tracing::info!(session = %self.session_id, "claimed migration leadership");
            self.channel
                .post(&Envelope::new(self.session_id.clone(), MigrationMessage::Started))?;
        }
        Ok(claimed)
    }

    fn release_leadership(&self) {
        self.update(|state| {
            if state.role != MigrationRole::Leader {
                return false;
            }
            state.role = MigrationRole::Normal;
            true
        });
    }

    /// Wait until a followed migration ends. Returns the final snapshot: role
    /// `FollowerReload` on success, `Normal` with `migration_failed` on
    /// failure. Returns immediately when not following.
    pub async fn wait_for_leader(&self) -> CoordinatorSnapshot {
        loop {
            self.pump();
            let snapshot = self.snapshot();
            if snapshot.role != MigrationRole::FollowerWaiting {
                return snapshot;
            }
            if !self.process_next().await {
                return self.snapshot();
            }
        }
    }

    /// Startup flow: observe, check, elect, then execute or follow.
    pub async fn run_startup(
        &self,
        orchestrator: &MigrationOrchestrator,
    ) -> Result<StartupDecision, MigrationError> {
        self.pump();
        if self.role() == MigrationRole::FollowerWaiting {
            return Ok(StartupDecision::Following);
        }

        if !orchestrator.check_migration_needed()? {
            return Ok(StartupDecision::NotNeeded);
        }
        self.lead(orchestrator).await
    }

    /// Claim leadership and execute, or follow if another session already
    /// announced a migration.
    pub async fn lead(
        &self,
        orchestrator: &MigrationOrchestrator,
    ) -> Result<StartupDecision, MigrationError> {
        match self.try_claim_leadership() {
            Ok(true) => {}
            Ok(false) => return Ok(StartupDecision::Following),
            Err(e) => {
                // Without a channel nobody can follow us; lead silently.
                tracing::warn!(error = %e, "could not announce migration start");
                self.update(|state| {
                    state.role = MigrationRole::Leader;
                    true
                });
            }
        }

        let result = orchestrator.execute().await;
        self.release_leadership();
        Ok(StartupDecision::Led(result))
    }
}
