//! MigrationOrchestrator: copies every catalog collection from the legacy
//! generations into a fresh generation and flips the version ledger.
//!
//! State machine: `idle → checking → copying → validating → done`, with
//! `failed` reachable from every active state and `rolled_back` only from
//! `failed`. The target generation name is claimed atomically through engine
//! metadata, so a retry, or a second leader racing this one, writes into the
//! same generation. Inserts are by id, which makes every rerun idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;

use crate::coordination::{BroadcastChannel, Envelope, MigrationMessage};
use crate::error::{MigrationError, StorageError};
use crate::ledger::{AppVersion, VersionLedger};
use crate::options::HearthOptions;
use crate::reactive::{Notifier, Unsubscribe};
use crate::schema::Catalog;
use crate::storage::{GenerationStore, RawGeneration, RecordSource, StorageEngine};
use crate::types::{generation_name, now_iso, record_id};

use super::backup::BackupSnapshot;
use super::legacy::LegacyReader;
use super::state::{MigrationState, MigrationStatus};
use super::transform::{TransformOutcome, TransformRegistry};

/// Last migration epoch handed out. Never decreases.
pub const EPOCH_KEY: &str = "hearth:migration-epoch";

/// Generation currently being migrated into, if any.
pub const PENDING_KEY: &str = "hearth:pending-generation";

const COPY_SHARE: f64 = 90.0;

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub name: String,
    /// Legacy generations read, oldest first.
    pub source_generations: Vec<String>,
    pub read: usize,
    pub written: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub target_generation: String,
    pub collections: Vec<CollectionReport>,
}

impl MigrationReport {
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn total_written(&self) -> usize {
        self.collections.iter().map(|c| c.written).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.collections.iter().map(|c| c.rejected).sum()
    }
}

/// Copy progress for collection `index` of `total`, `fraction` of the way
/// through it. Spans 0..=90; validation owns 90..=100.
pub fn copy_progress(index: usize, fraction: f64, total: usize) -> u8 {
    let total = total.max(1) as f64;
    let fraction = fraction.clamp(0.0, 1.0);
    ((index as f64 + fraction) / total * COPY_SHARE)
        .floor()
        .clamp(0.0, COPY_SHARE) as u8
}

// ============================================================================
// MigrationOrchestrator
// ============================================================================

pub struct MigrationOrchestrator {
    engine: Arc<dyn StorageEngine>,
    catalog: Arc<Catalog>,
    registry: Arc<TransformRegistry>,
    ledger: VersionLedger,
    legacy: LegacyReader,
    channel: Option<Arc<dyn BroadcastChannel>>,
    session_id: String,
    app_version: AppVersion,
    options: HearthOptions,
    state: Mutex<MigrationState>,
    notifier: Arc<Notifier<MigrationState>>,
    /// Serializes `execute` calls made through this orchestrator.
    run_lock: TokioMutex<()>,
}

impl MigrationOrchestrator {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        registry: Arc<TransformRegistry>,
        options: HearthOptions,
        session_id: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let app_version: AppVersion = options.app_version.parse()?;
        Ok(Self {
            catalog: Arc::clone(registry.catalog()),
            ledger: VersionLedger::new(Arc::clone(&engine)),
            legacy: LegacyReader::new(Arc::clone(&engine)),
            engine,
            registry,
            channel: None,
            session_id: session_id.into(),
            app_version,
            options,
            state: Mutex::new(MigrationState::default()),
            notifier: Arc::new(Notifier::new()),
            run_lock: TokioMutex::new(()),
        })
    }

    /// Announce progress and outcome on `channel`.
    pub fn with_channel(mut self, channel: Arc<dyn BroadcastChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn state(&self) -> MigrationState {
        self.state.lock().clone()
    }

    pub fn on_state_change(
        &self,
        callback: impl Fn(&MigrationState) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.notifier.subscribe(callback)
    }

    // -----------------------------------------------------------------------
    // State helpers
    // -----------------------------------------------------------------------

    fn update<F>(&self, f: F) -> Result<MigrationState, MigrationError>
    where
        F: FnOnce(&mut MigrationState) -> Result<(), MigrationError>,
    {
        let snapshot = {
            let mut state = self.state.lock();
            f(&mut state)?;
            state.clone()
        };
        self.notifier.notify(&snapshot);
        Ok(snapshot)
    }

    fn transition(
        &self,
        next: MigrationStatus,
        progress: u8,
        step: &str,
    ) -> Result<MigrationState, MigrationError> {
        self.update(|state| {
            state.status = state.status.transition(next)?;
            state.progress = progress;
            state.current_step = step.to_string();
            if next != MigrationStatus::Failed {
                state.error = None;
            }
            Ok(())
        })
    }

    fn report_progress(&self, progress: u8, step: &str) {
        let changed = self.update(|state| {
            state.progress = progress.max(state.progress);
            state.current_step = step.to_string();
            Ok(())
        });
        if let Ok(snapshot) = changed {
            self.broadcast(MigrationMessage::Progress {
                progress: snapshot.progress,
                step: snapshot.current_step,
            });
        }
    }

    fn broadcast(&self, message: MigrationMessage) {
        let Some(channel) = &self.channel else {
            return;
        };
        if let Err(e) = channel.post(&Envelope::new(self.session_id.clone(), message)) {
            tracing::warn!(channel = %channel.name(), error = %e, "failed to broadcast migration message");
        }
    }

    // -----------------------------------------------------------------------
    // Check
    // -----------------------------------------------------------------------

    /// Whether the active generation differs from what the catalog expects.
    ///
    /// Safe to call from every session at once; it only reads. The state
    /// machine moves `idle → checking`, and back to `idle` when nothing is
    /// needed. Outside `idle`/`checking`/`rolled_back` the state is untouched.
    pub fn check_migration_needed(&self) -> Result<bool, MigrationError> {
        let status = self.state().status;
        let tracked = matches!(
            status,
            MigrationStatus::Idle | MigrationStatus::Checking | MigrationStatus::RolledBack
        );
        if tracked && status != MigrationStatus::Checking {
            self.transition(MigrationStatus::Checking, 0, "checking")?;
        }

        let needed = match self.needs_migration() {
            Ok(needed) => needed,
            Err(e) => {
                if tracked {
                    self.fail(&e);
                }
                return Err(e);
            }
        };

        if tracked && !needed {
            self.transition(MigrationStatus::Idle, 0, "")?;
        }
        tracing::debug!(needed, "migration check complete");
        Ok(needed)
    }

    fn needs_migration(&self) -> Result<bool, MigrationError> {
        let Some(entry) = self.ledger.get()? else {
            return self.legacy_has_data();
        };

        let Some(info) = self.engine.generation_info(&entry.active_generation)? else {
            tracing::warn!(generation = %entry.active_generation, "ledger points at a missing generation");
            return Ok(true);
        };

        for schema in self.catalog.iter() {
            if info.collections.get(&schema.name) != Some(&schema.version) {
                return Ok(true);
            }
        }

        // The ledger may be stale against a store altered behind its back.
        for schema in self.catalog.iter() {
            let scan = match self.engine.raw_scan(&info.name, &schema.name) {
                Ok(scan) => scan,
                Err(e) => {
                    tracing::warn!(collection = %schema.name, error = %e, "sample read failed");
                    return Ok(true);
                }
            };
            if !scan.errors.is_empty() {
                return Ok(true);
            }
            let bad = scan
                .live()
                .take(self.options.sample_size)
                .any(|r| !schema.is_valid(&r.data));
            if bad {
                tracing::warn!(collection = %schema.name, "sampled record does not match schema");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True when some generation holds a catalog collection with live data.
    fn legacy_has_data(&self) -> Result<bool, MigrationError> {
        for info in self.engine.list_generations()? {
            for schema in self.catalog.iter() {
                if !info.collections.contains_key(&schema.name) {
                    continue;
                }
                let live = self
                    .engine
                    .raw_scan(&info.name, &schema.name)
                    .map(|scan| scan.live().next().is_some())
                    .unwrap_or(false);
                if live {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Target resolution
    // -----------------------------------------------------------------------

    fn next_epoch(&self) -> Result<u64, StorageError> {
        let stored = self
            .engine
            .get_meta(EPOCH_KEY)?
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        let highest = self
            .engine
            .list_generations()?
            .iter()
            .filter_map(|info| info.epoch())
            .max()
            .unwrap_or(0);
        let next = stored.max(highest) + 1;
        self.engine.set_meta(EPOCH_KEY, &next.to_string())?;
        Ok(next)
    }

    /// The generation this migration writes into: the pending claim if one
    /// exists, otherwise a freshly claimed epoch.
    fn claim_target(&self) -> Result<String, MigrationError> {
        let active = self.ledger.get()?.map(|e| e.active_generation);
        if let Some(pending) = self.engine.get_meta(PENDING_KEY)? {
            if Some(&pending) != active.as_ref() {
                return Ok(pending);
            }
            // A finished migration whose claim was never cleared.
            self.engine.delete_meta(PENDING_KEY)?;
        }
        let candidate = generation_name(self.next_epoch()?);
        Ok(self.engine.claim_meta(PENDING_KEY, &candidate)?)
    }

    /// The active generation when a ledger exists, nothing is pending and the
    /// active generation already matches the catalog. A leader that lost the
    /// race by a whole migration lands here instead of opening a new epoch.
    fn already_current(&self) -> Result<Option<String>, MigrationError> {
        let Some(entry) = self.ledger.get()? else {
            return Ok(None);
        };
        if self.engine.get_meta(PENDING_KEY)?.is_some() || self.needs_migration()? {
            return Ok(None);
        }
        Ok(Some(entry.active_generation))
    }

    /// After claiming `claimed`, the ledger may show that another session
    /// finished a migration in the meantime. In that case the claim is
    /// released and the now-current active generation returned.
    fn finished_meanwhile(&self, claimed: &str) -> Result<Option<String>, MigrationError> {
        let Some(entry) = self.ledger.get()? else {
            return Ok(None);
        };
        if entry.active_generation == claimed || self.needs_migration()? {
            return Ok(None);
        }
        if self.engine.get_meta(PENDING_KEY)?.as_deref() == Some(claimed) {
            self.engine.delete_meta(PENDING_KEY)?;
        }
        Ok(Some(entry.active_generation))
    }

    pub fn pending_generation(&self) -> Result<Option<String>, MigrationError> {
        Ok(self.engine.get_meta(PENDING_KEY)?)
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Run the migration. Valid from `idle`, `checking`, `failed` (retry) and
    /// `rolled_back`.
    pub async fn execute(&self) -> Result<MigrationReport, MigrationError> {
        let _running = self.run_lock.lock().await;
        self.transition(MigrationStatus::Copying, 0, "preparing")?;
        match self.run().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn fail(&self, error: &MigrationError) {
        tracing::error!(error = %error, "migration failed");
        let _ = self.update(|state| {
            state.status = state.status.transition(MigrationStatus::Failed)?;
            state.error = Some(error.to_string());
            Ok(())
        });
        self.broadcast(MigrationMessage::Failed);
    }

    fn complete_without_copy(&self, active: String) -> Result<MigrationReport, MigrationError> {
        tracing::info!(generation = %active, "migration already completed by another session");
        self.transition(MigrationStatus::Validating, 90, "validating")?;
        self.transition(MigrationStatus::Done, 100, "done")?;
        self.broadcast(MigrationMessage::Complete);
        Ok(MigrationReport {
            target_generation: active,
            collections: Vec::new(),
        })
    }

    async fn run(&self) -> Result<MigrationReport, MigrationError> {
        if let Some(active) = self.already_current()? {
            return self.complete_without_copy(active);
        }

        let target = self.claim_target()?;
        if let Some(active) = self.finished_meanwhile(&target)? {
            return self.complete_without_copy(active);
        }
        tracing::info!(target = %target, app_version = %self.app_version, "migration started");

        self.engine
            .create_generation(&target, &self.catalog.versions())?;
        let store = GenerationStore::open(
            Arc::clone(&self.engine),
            &target,
            Arc::clone(&self.catalog),
        )?;

        let total = self.catalog.len();
        let batch_size = self.options.batch_size.max(1);
        let mut report = MigrationReport {
            target_generation: target.clone(),
            collections: Vec::with_capacity(total),
        };
        let mut expected: Vec<(String, Vec<String>)> = Vec::with_capacity(total);

        for (index, schema) in self.catalog.iter().enumerate() {
            let sources = self
                .legacy
                .list_candidate_generations(&schema.name, Some(&target))?;
            let records = self.legacy.read_merged(&schema.name, &sources);

            let mut accepted = Vec::with_capacity(records.len());
            let mut rejected = 0usize;
            for record in &records {
                match self.registry.transform(&schema.name, record) {
                    TransformOutcome::Accept(value) => accepted.push(value),
                    TransformOutcome::Reject(reason) => {
                        rejected += 1;
                        tracing::debug!(
                            collection = %schema.name,
                            id = record_id(record).unwrap_or("<none>"),
                            reason = %reason,
                            "record rejected"
                        );
                    }
                }
            }
            if rejected > 0 {
                tracing::warn!(collection = %schema.name, rejected, "records rejected during migration");
            }

            let ids: Vec<String> = accepted
                .iter()
                .filter_map(|r| record_id(r).map(str::to_string))
                .collect();
            let accepted_count = accepted.len();
            let mut written = 0usize;

            for batch in accepted.chunks(batch_size) {
                let result = store.put_many(&schema.name, batch.to_vec())?;
                if let Some(first) = result.errors.first() {
                    return Err(MigrationError::Validation {
                        collection: schema.name.clone(),
                        message: first.error.clone(),
                    });
                }
                written += result.written.len();
                tracing::debug!(collection = %schema.name, written, total = accepted_count, "batch written");
                self.report_progress(
                    copy_progress(index, written as f64 / accepted_count as f64, total),
                    &schema.name,
                );
                tokio::task::yield_now().await;
            }
            if accepted_count == 0 {
                self.report_progress(copy_progress(index, 1.0, total), &schema.name);
                tokio::task::yield_now().await;
            }

            report.collections.push(CollectionReport {
                name: schema.name.clone(),
                source_generations: sources,
                read: records.len(),
                written,
                rejected,
            });
            expected.push((schema.name.clone(), ids));
        }

        self.transition(MigrationStatus::Validating, 90, "validating")?;
        self.validate_target(&store, &expected)?;

        self.ledger.set(&target, &self.app_version)?;
        self.engine.delete_meta(PENDING_KEY)?;
        self.transition(MigrationStatus::Done, 100, "done")?;
        self.broadcast(MigrationMessage::Complete);

        tracing::info!(
            target = %target,
            written = report.total_written(),
            rejected = report.total_rejected(),
            "migration complete"
        );
        Ok(report)
    }

    /// Every accepted id must be present, and a sample must match the schema.
    fn validate_target(
        &self,
        store: &GenerationStore,
        expected: &[(String, Vec<String>)],
    ) -> Result<(), MigrationError> {
        for (collection, ids) in expected {
            let records = store.list(collection)?;
            let present: HashSet<&str> = records.iter().filter_map(record_id).collect();
            if let Some(missing) = ids.iter().find(|id| !present.contains(id.as_str())) {
                return Err(MigrationError::Validation {
                    collection: collection.clone(),
                    message: format!("record \"{missing}\" was not written"),
                });
            }

            if let Some(schema) = self.catalog.get(collection) {
                for record in records.iter().take(self.options.sample_size) {
                    if let Err(e) = schema.validate(record) {
                        return Err(MigrationError::Validation {
                            collection: collection.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rollback / bootstrap / backup
    // -----------------------------------------------------------------------

    /// Discard the pending generation after a failure. The ledger keeps
    /// pointing at the previous generation.
    pub fn rollback(&self) -> Result<(), MigrationError> {
        self.state().status.transition(MigrationStatus::RolledBack)?;

        let active = self.ledger.get()?.map(|e| e.active_generation);
        if let Some(pending) = self.engine.get_meta(PENDING_KEY)? {
            if Some(&pending) != active.as_ref() {
                let dropped = self.engine.drop_generation(&pending)?;
                tracing::info!(generation = %pending, dropped, "pending generation rolled back");
            }
            self.engine.delete_meta(PENDING_KEY)?;
        }

        self.update(|state| {
            state.status = state.status.transition(MigrationStatus::RolledBack)?;
            state.progress = 0;
            state.current_step = "rolled back".to_string();
            state.error = None;
            Ok(())
        })?;
        Ok(())
    }

    /// First boot: with no ledger and no legacy data, create an empty current
    /// generation and point the ledger at it. Returns the active generation,
    /// or `None` when legacy data means a migration is required instead.
    pub fn bootstrap(&self) -> Result<Option<String>, MigrationError> {
        if let Some(entry) = self.ledger.get()? {
            return Ok(Some(entry.active_generation));
        }
        if self.legacy_has_data()? {
            return Ok(None);
        }

        let target = self.claim_target()?;
        self.engine
            .create_generation(&target, &self.catalog.versions())?;
        let entry = self.ledger.claim(&target, &self.app_version)?;
        if entry.active_generation == target {
            self.engine.delete_meta(PENDING_KEY)?;
        }
        tracing::info!(generation = %entry.active_generation, "first boot");
        Ok(Some(entry.active_generation))
    }

    /// Snapshot of every live record in the active generation.
    pub fn download_backup(&self) -> Result<BackupSnapshot, MigrationError> {
        let entry = self.ledger.get()?.ok_or(MigrationError::NoActiveGeneration)?;
        let info = self
            .engine
            .generation_info(&entry.active_generation)?
            .ok_or_else(|| StorageError::GenerationNotFound(entry.active_generation.clone()))?;

        let raw = RawGeneration::new(self.engine.as_ref(), &info.name);
        let mut snapshot = BackupSnapshot {
            generation: info.name.clone(),
            app_version: entry.app_version.clone(),
            exported_at: now_iso(),
            collections: Default::default(),
        };
        for collection in info.collections.keys() {
            snapshot
                .collections
                .insert(collection.clone(), raw.read_all(collection)?);
        }
        Ok(snapshot)
    }

    pub fn write_backup<W: std::io::Write>(&self, writer: W) -> Result<BackupSnapshot, MigrationError> {
        let snapshot = self.download_backup()?;
        snapshot.write_to(writer).map_err(StorageError::from)?;
        Ok(snapshot)
    }
}
