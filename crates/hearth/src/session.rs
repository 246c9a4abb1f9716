//! Session: one running instance of the app against shared storage.
//!
//! The application root builds a [`HearthContext`] once and hands it to each
//! session. Startup order is fixed: downgrade check (fatal), first-boot
//! bootstrap, migration check, election, then execute or follow, and only
//! then the validating open of the active generation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::coordination::{
    BroadcastChannel, LocalBroadcastHub, MigrationRole, ReloadHook, StartupDecision,
    TabCoordinator, MIGRATION_CHANNEL,
};
use crate::error::{LedgerError, MigrationError, Result};
use crate::ledger::AppVersion;
use crate::migration::{
    BackupSnapshot, MigrationOrchestrator, MigrationReport, MigrationState, TransformRegistry,
};
use crate::options::HearthOptions;
use crate::replication::DocConnector;
use crate::schema::Catalog;
use crate::storage::{GenerationStore, MemoryEngine, StorageEngine};
use crate::sync::{SettingsStore, SyncController};

/// Everything sessions of one instance share.
#[derive(Clone)]
pub struct HearthContext {
    pub engine: Arc<dyn StorageEngine>,
    pub registry: Arc<TransformRegistry>,
    pub channel: Arc<dyn BroadcastChannel>,
    pub options: HearthOptions,
}

impl HearthContext {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        registry: Arc<TransformRegistry>,
        channel: Arc<dyn BroadcastChannel>,
        options: HearthOptions,
    ) -> Self {
        Self {
            engine,
            registry,
            channel,
            options,
        }
    }

    /// The app catalog over `engine`, with the migration channel of `hub`.
    pub fn for_app(
        engine: Arc<dyn StorageEngine>,
        hub: &LocalBroadcastHub,
        options: HearthOptions,
    ) -> Self {
        let catalog = Arc::new(Catalog::default_app());
        Self::new(
            engine,
            Arc::new(TransformRegistry::with_app_upgrades(catalog)),
            hub.channel(MIGRATION_CHANNEL),
            options,
        )
    }

    /// Fresh in-memory storage, for tests and ephemeral instances.
    pub fn in_memory(options: HearthOptions) -> Self {
        Self::for_app(Arc::new(MemoryEngine::new()), &LocalBroadcastHub::new(), options)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.registry.catalog()
    }
}

#[derive(Debug)]
pub enum StartupOutcome {
    /// The active generation is open and current.
    Ready(Arc<GenerationStore>),
    /// Another session is migrating. Wait with [`Session::follow`].
    Following,
    /// A migration failed. `error` is only known to the session that led it.
    MigrationFailed { error: Option<String> },
    /// The stored data cannot be used by this binary.
    Fatal { reason: String },
}

pub struct Session {
    ctx: HearthContext,
    session_id: String,
    orchestrator: Arc<MigrationOrchestrator>,
    coordinator: Arc<TabCoordinator>,
    store: Mutex<Option<Arc<GenerationStore>>>,
}

impl Session {
    pub fn new(ctx: HearthContext, on_reload: Option<ReloadHook>) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let orchestrator = MigrationOrchestrator::new(
            Arc::clone(&ctx.engine),
            Arc::clone(&ctx.registry),
            ctx.options.clone(),
            session_id.clone(),
        )?
        .with_channel(Arc::clone(&ctx.channel));

        let mut coordinator = TabCoordinator::new(session_id.clone(), Arc::clone(&ctx.channel));
        if let Some(hook) = on_reload {
            coordinator = coordinator.with_reload_hook(hook);
        }

        Ok(Self {
            ctx,
            session_id,
            orchestrator: Arc::new(orchestrator),
            coordinator: Arc::new(coordinator),
            store: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &HearthContext {
        &self.ctx
    }

    pub fn orchestrator(&self) -> &Arc<MigrationOrchestrator> {
        &self.orchestrator
    }

    pub fn coordinator(&self) -> &Arc<TabCoordinator> {
        &self.coordinator
    }

    pub fn migration_state(&self) -> MigrationState {
        self.orchestrator.state()
    }

    /// The open generation, once startup reached `Ready`.
    pub fn store(&self) -> Option<Arc<GenerationStore>> {
        self.store.lock().clone()
    }

    pub async fn start(&self) -> Result<StartupOutcome> {
        let running: AppVersion = self.ctx.options.app_version.parse()?;
        match self.orchestrator.ledger().ensure_not_downgrade(&running) {
            Ok(_) => {}
            Err(e @ LedgerError::Downgrade { .. }) => {
                tracing::error!(error = %e, "refusing to open storage written by a newer app");
                return Ok(StartupOutcome::Fatal {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.orchestrator.bootstrap()?;

        match self.coordinator.run_startup(&self.orchestrator).await? {
            StartupDecision::Following => return Ok(StartupOutcome::Following),
            StartupDecision::Led(Err(e)) => {
                return Ok(StartupOutcome::MigrationFailed {
                    error: Some(e.to_string()),
                })
            }
            StartupDecision::Led(Ok(_)) | StartupDecision::NotNeeded => {}
        }

        self.open_active().await
    }

    async fn open_active(&self) -> Result<StartupOutcome> {
        match self.try_open() {
            Ok(store) => return Ok(StartupOutcome::Ready(store)),
            Err(e) => {
                tracing::warn!(error = %e, "active generation failed to open, entering migration mode");
            }
        }

        match self.coordinator.lead(&self.orchestrator).await? {
            StartupDecision::Following => Ok(StartupOutcome::Following),
            StartupDecision::Led(Err(e)) => Ok(StartupOutcome::MigrationFailed {
                error: Some(e.to_string()),
            }),
            StartupDecision::Led(Ok(_)) | StartupDecision::NotNeeded => match self.try_open() {
                Ok(store) => Ok(StartupOutcome::Ready(store)),
                Err(e) => Ok(StartupOutcome::Fatal {
                    reason: e.to_string(),
                }),
            },
        }
    }

    fn try_open(&self) -> Result<Arc<GenerationStore>> {
        let entry = self
            .orchestrator
            .ledger()
            .get()?
            .ok_or(MigrationError::NoActiveGeneration)?;
        let store = Arc::new(GenerationStore::open(
            Arc::clone(&self.ctx.engine),
            &entry.active_generation,
            Arc::clone(self.ctx.catalog()),
        )?);
        *self.store.lock() = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Wait for the migration this session is following. On success the
    /// reload hook has fired and the caller should build a fresh session.
    pub async fn follow(&self) -> StartupOutcome {
        let snapshot = self.coordinator.wait_for_leader().await;
        if snapshot.role != MigrationRole::FollowerReload && snapshot.migration_failed {
            StartupOutcome::MigrationFailed { error: None }
        } else {
            StartupOutcome::Following
        }
    }

    /// Start (or retry) a migration from this session.
    pub async fn start_migration(&self) -> Result<MigrationReport> {
        match self.coordinator.lead(&self.orchestrator).await? {
            StartupDecision::Led(result) => {
                let report = result?;
                self.try_open()?;
                Ok(report)
            }
            StartupDecision::Following | StartupDecision::NotNeeded => Ok(MigrationReport::default()),
        }
    }

    pub fn rollback(&self) -> Result<()> {
        Ok(self.orchestrator.rollback()?)
    }

    pub fn download_backup(&self) -> Result<BackupSnapshot> {
        Ok(self.orchestrator.download_backup()?)
    }

    /// Sync controller over the open generation.
    pub fn sync_controller(&self, connector: Arc<dyn DocConnector>) -> Result<SyncController> {
        let store = self.store().ok_or(MigrationError::NoActiveGeneration)?;
        let settings = Arc::new(SettingsStore::new(Arc::clone(&self.ctx.engine)));
        settings.load_or_init()?;
        Ok(SyncController::new(
            store,
            settings,
            connector,
            self.ctx.options.clone(),
            self.session_id.clone(),
        ))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("role", &self.coordinator.role())
            .field("migration", &self.orchestrator.state().status)
            .finish()
    }
}
