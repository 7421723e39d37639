//! Reconciliation of the tracker project with the converted model.
//!
//! A run has three phases. Orphaned work items (mapped, not deleted, not in
//! the model any more) are deleted or marked deleted. Elements without a
//! work item are created in one batch. Every remaining work item is patched
//! with one of the strategies of [`Strategy`].
//!
//! The [`SyncWorker`] owns the identity repository and the error collector.
//! Worker threads only read the repository and send their results back;
//! the repository is mutated by the calling thread alone.

pub mod attachments;
pub mod batched;
pub mod patch;

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::collector::{ErrorCollector, ErrorSummary};
use crate::config::{DeleteMode, Strategy, SyncSettings, TypeRules};
use crate::context::RunContext;
use crate::convert::{ConvertOptions, ConverterSession, ModelConverter};
use crate::error::ErrorCode;
use crate::identity::{IdentityError, IdentityRepository};
use crate::model::{STATUS_DELETED, WorkItem};
use crate::pool::{PoolError, for_each_parallel};
use crate::source::ModelSource;
use crate::tracker::{ApiError, TrackerClient, WORK_ITEM_MAP_FIELDS, type_query};

pub use patch::{PatchOutcome, patch_work_item};

/// Progress is logged every this many patched items.
const PROGRESS_INTERVAL: usize = 10;

/// Errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("project {0} does not exist on the tracker")]
    ProjectMissing(String),

    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("too many work item update failures: {failed} of {total} ({:.1}%)", .rate * 100.0)]
    FailureRateExceeded { failed: usize, total: usize, rate: f64 },

    #[error("worker pool failed: {0}")]
    Pool(#[from] PoolError),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ProjectMissing(_) => ErrorCode::ProjectMissing,
            Self::Api { .. } => ErrorCode::RemoteApiFailure,
            Self::Identity(_) => ErrorCode::IdentityViolation,
            Self::FailureRateExceeded { .. } => ErrorCode::FailureRateExceeded,
            Self::Pool(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Adapter for `map_err` that names the failed tracker operation.
    pub fn api(operation: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| Self::Api { operation, source }
    }
}

/// Counters of the patch phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatchStats {
    pub unchanged: usize,
    pub checksum_only: usize,
    pub updated: usize,
    pub failed: usize,
}

impl PatchStats {
    fn record(&mut self, outcome: PatchOutcome) {
        match outcome {
            PatchOutcome::Unchanged => self.unchanged += 1,
            PatchOutcome::ChecksumOnly => self.checksum_only += 1,
            PatchOutcome::Updated => self.updated += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.unchanged + self.checksum_only + self.updated + self.failed
    }
}

/// Outcome of a complete run, as printed by `synchronize --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub elements: usize,
    pub deleted: usize,
    pub created: usize,
    pub patch: PatchStats,
    pub errors: ErrorSummary,
}

/// Share of failed items, `0.0` for an empty run.
#[allow(clippy::cast_precision_loss)] // counts stay far below 2^52
fn failure_rate(failed: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { failed as f64 / total as f64 }
}

/// Drives one synchronization run against a tracker project.
pub struct SyncWorker<'c> {
    client: &'c dyn TrackerClient,
    settings: SyncSettings,
    repo: IdentityRepository,
    collector: ErrorCollector,
    ctx: RunContext,
}

impl<'c> SyncWorker<'c> {
    #[must_use]
    pub fn new(client: &'c dyn TrackerClient, settings: SyncSettings, ctx: RunContext) -> Self {
        Self {
            client,
            settings,
            repo: IdentityRepository::new(),
            collector: ErrorCollector::new(),
            ctx,
        }
    }

    #[must_use]
    pub const fn repo(&self) -> &IdentityRepository {
        &self.repo
    }

    #[must_use]
    pub const fn collector(&self) -> &ErrorCollector {
        &self.collector
    }

    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// # Errors
    ///
    /// Returns [`SyncError::ProjectMissing`] or the failed request.
    pub fn check_project(&self) -> Result<(), SyncError> {
        let exists = self
            .client
            .project_exists()
            .map_err(SyncError::api("check project"))?;
        if exists {
            Ok(())
        } else {
            Err(SyncError::ProjectMissing(self.client.project_id().to_string()))
        }
    }

    /// Rebuild the identity repository from all work items of `types`.
    ///
    /// # Errors
    ///
    /// Returns the failed request, or an identity error for items the
    /// tracker returned without an id.
    pub fn load_work_item_map<'t>(&mut self, types: impl IntoIterator<Item = &'t str>) -> Result<usize, SyncError> {
        let query = type_query(types);
        let items = self
            .client
            .get_all_work_items(&query, WORK_ITEM_MAP_FIELDS)
            .map_err(SyncError::api("load work items"))?;
        self.repo = IdentityRepository::from_items(items)?;
        info!(work_items = self.repo.len(), "loaded work item map");
        Ok(self.repo.len())
    }

    /// Delete, or mark deleted, every mapped work item without an element.
    ///
    /// On failure every affected element gets an error and the repository
    /// keeps them.
    pub fn delete_orphaned(&mut self, session: &ConverterSession) -> usize {
        let mut orphans: Vec<(String, String)> = self
            .repo
            .iter()
            .filter(|(local_id, _, snapshot)| !snapshot.is_deleted() && !session.contains_key(*local_id))
            .map(|(local_id, remote_id, _)| (local_id.to_string(), remote_id.to_string()))
            .collect();
        if orphans.is_empty() {
            return 0;
        }
        orphans.sort();

        let ids: Vec<String> = orphans.iter().map(|(_, remote_id)| remote_id.clone()).collect();
        info!(ids = %ids.join(", "), mode = ?self.settings.delete_mode, "Delete work items");
        let result = match self.settings.delete_mode {
            DeleteMode::Hard => self.client.delete_work_items(&ids),
            DeleteMode::Soft => {
                let updates: Vec<WorkItem> = orphans
                    .iter()
                    .map(|(local_id, remote_id)| WorkItem {
                        id: Some(remote_id.clone()),
                        local_id: local_id.clone(),
                        status: Some(STATUS_DELETED.to_string()),
                        ..WorkItem::default()
                    })
                    .collect();
                self.client.update_work_items(&updates)
            }
        };

        match result {
            Ok(()) => {
                self.repo.remove(orphans.iter().map(|(local_id, _)| local_id));
                orphans.len()
            }
            Err(err) => {
                error!(error = %err, "Deleting work items failed");
                for (local_id, _) in orphans {
                    self.collector.add_work_item_error(local_id, format!("Deleting work item failed: {err}"));
                }
                0
            }
        }
    }

    /// Create work items for every serialized element without one.
    ///
    /// Created items are registered with their new ids. On failure every
    /// element of the batch gets an error.
    ///
    /// # Errors
    ///
    /// Returns an identity error if the tracker did not hand out ids.
    pub fn create_missing(&mut self, session: &ConverterSession) -> Result<usize, SyncError> {
        let mut missing: Vec<WorkItem> = session
            .iter()
            .filter(|(local_id, _)| !self.repo.contains(local_id))
            .filter_map(|(_, data)| data.work_item.clone())
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }
        for item in &mut missing {
            item.calculate_checksum();
        }

        info!(count = missing.len(), "Create work items");
        match self.client.create_work_items(&mut missing) {
            Ok(()) => {
                let created = missing.len();
                self.repo.update(missing)?;
                Ok(created)
            }
            Err(err) => {
                error!(error = %err, "Creating work items failed");
                for item in missing {
                    self.collector
                        .add_work_item_error(item.local_id, format!("Creating work item failed: {err}"));
                }
                Ok(0)
            }
        }
    }

    /// Patch every serialized element that has a work item.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::FailureRateExceeded`] when the parallel
    /// strategy trips the breaker, and pool failures.
    pub fn compare_and_update(&self, session: &ConverterSession) -> Result<PatchStats, SyncError> {
        let targets: Vec<(String, WorkItem)> = session
            .iter()
            .filter(|(local_id, _)| self.repo.contains(local_id))
            .filter_map(|(local_id, data)| data.work_item.clone().map(|item| (local_id.clone(), item)))
            .collect();
        if targets.is_empty() {
            info!("No work items to process");
            return Ok(PatchStats::default());
        }

        let count = targets.len();
        let strategy = if count < self.settings.parallel_threshold {
            Strategy::Sequential
        } else {
            self.settings.strategy
        };
        match strategy {
            Strategy::Sequential => {
                info!(count, "Processing work items sequentially");
                Ok(self.patch_sequential(targets))
            }
            Strategy::Parallel => {
                info!(count, max_workers = self.settings.max_workers, "Processing work items in parallel");
                self.patch_parallel(targets)
            }
            Strategy::Batched => {
                info!(count, "Processing work items with batched operations");
                let fallback = targets.clone();
                // Item errors of a failed attempt are found again by the fallback.
                let attempt = ErrorCollector::new();
                match batched::patch_batched(
                    &self.ctx,
                    self.client,
                    &self.repo,
                    targets,
                    self.settings.max_workers,
                    self.settings.force_update,
                    &attempt,
                ) {
                    Ok(stats) => {
                        self.collector.absorb(attempt);
                        Ok(stats)
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            discarded = attempt.work_item_error_count(),
                            "Batched operations failed"
                        );
                        info!("Falling back to parallel processing");
                        self.patch_parallel(fallback)
                    }
                }
            }
        }
    }

    fn patch_one(&self, local_id: &str, new: WorkItem) -> Result<PatchOutcome, SyncError> {
        let old = self.repo.get_snapshot(local_id).ok_or_else(|| IdentityError::MissingRemoteId {
            local_id: local_id.to_string(),
        })?;
        patch_work_item(self.client, new, old, self.settings.force_update)
    }

    fn patch_sequential(&self, targets: Vec<(String, WorkItem)>) -> PatchStats {
        let mut stats = PatchStats::default();
        self.ctx.in_scope(|| {
            for (local_id, new) in targets {
                match self.patch_one(&local_id, new) {
                    Ok(outcome) => stats.record(outcome),
                    Err(err) => {
                        error!(%local_id, error = %err, "Updating work item failed");
                        self.collector.add_work_item_error(local_id, &err);
                        stats.failed += 1;
                    }
                }
            }
        });
        stats
    }

    fn patch_parallel(&self, targets: Vec<(String, WorkItem)>) -> Result<PatchStats, SyncError> {
        let total = targets.len();
        let mut stats = PatchStats::default();
        let mut failures: Vec<(String, SyncError)> = Vec::new();
        let mut completed = 0;

        for_each_parallel(
            &self.ctx,
            targets,
            self.settings.max_workers,
            |(local_id, new)| {
                let result = self.patch_one(&local_id, new);
                (local_id, result)
            },
            |_, (local_id, result)| {
                match result {
                    Ok(outcome) => stats.record(outcome),
                    Err(err) => {
                        error!(%local_id, error = %err, "Failed to update work item");
                        failures.push((local_id, err));
                    }
                }
                completed += 1;
                if completed % PROGRESS_INTERVAL == 0 {
                    info!(completed, total, "Processed work items");
                }
            },
        )?;

        if failures.is_empty() {
            info!(count = total, "Successfully updated all work items");
            return Ok(stats);
        }

        stats.failed = failures.len();
        warn!(failed = stats.failed, total, "Failed to update work items");
        for (local_id, err) in &failures {
            self.collector.add_work_item_error(local_id.clone(), err);
        }
        let rate = failure_rate(stats.failed, total);
        if rate > self.settings.failure_threshold {
            let err = SyncError::FailureRateExceeded {
                failed: stats.failed,
                total,
                rate,
            };
            self.collector.add_critical_error(&err);
            return Err(err);
        }
        Ok(stats)
    }

    /// Move the errors left in the converter session into the collector.
    ///
    /// Only elements that produced no work item count as failed; problems
    /// of a serialized element, such as an unresolved description
    /// reference, are logged and the element is synchronized anyway.
    pub fn collect_session_errors(&self, session: &ConverterSession) {
        for (local_id, data) in session {
            if data.work_item.is_some() {
                for message in &data.errors {
                    warn!(%local_id, error = %message, "Serialized with problems");
                }
            } else if data.errors.is_empty() {
                self.collector
                    .add_work_item_error(local_id.clone(), "Serialization failed without a reported error");
            } else {
                for message in &data.errors {
                    self.collector.add_work_item_error(local_id.clone(), message);
                }
            }
            self.collector
                .add_link_errors(data.link_errors.iter().map(|message| (local_id.clone(), message.clone())));
        }
    }

    /// Full run: map, read, delete, create, patch.
    ///
    /// Per-element problems end up in [`Self::collector`]; the returned
    /// error is reserved for conditions that stop the run. A tripped
    /// breaker is also recorded as a critical error.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] for a missing project, a failed work item
    /// query, identity violations, pool failures and a tripped breaker.
    pub fn run(&mut self, model: &dyn ModelSource, rules: &TypeRules) -> Result<SyncReport, SyncError> {
        let ctx = self.ctx.clone();
        let _span = ctx.span().enter();

        self.check_project()?;
        let mut converter = ModelConverter::new(model, self.client.project_id(), ctx.clone());
        converter.read_model(rules);

        let mut types: BTreeSet<&str> = rules.polarion_types().iter().map(String::as_str).collect();
        types.extend(converter.session().values().map(|data| data.type_config.p_type.as_str()));
        let types: Vec<String> = types.into_iter().map(str::to_string).collect();
        self.load_work_item_map(types.iter().map(String::as_str))?;

        let deleted = self.delete_orphaned(converter.session());

        let options = ConvertOptions::from(&self.settings);
        let first_pass = ConvertOptions {
            generate_links: false,
            ..options
        };
        converter.generate_work_items(&self.repo, &first_pass);
        let created = self.create_missing(converter.session())?;

        converter.generate_work_items(&self.repo, &options);
        self.collect_session_errors(converter.session());
        let patch = self.compare_and_update(converter.session())?;

        info!(deleted, created, updated = patch.updated, failed = patch.failed, "synchronization finished");
        Ok(SyncReport {
            run_id: ctx.run_id().to_string(),
            elements: converter.session().len(),
            deleted,
            created,
            patch,
            errors: self.collector.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeConfig;
    use crate::convert::ConverterData;
    use crate::tracker::memory::{MemoryTracker, Operation};

    fn data(item: Option<WorkItem>) -> ConverterData {
        let config = TypeConfig {
            p_type: "class".to_string(),
            serializers: Vec::new(),
            links: Vec::new(),
            is_actor: None,
            nature: None,
        };
        let mut data = ConverterData::new("sa", "Class", config);
        data.work_item = item;
        data
    }

    fn worker_with(tracker: &MemoryTracker, settings: SyncSettings) -> SyncWorker<'_> {
        SyncWorker::new(tracker, settings, RunContext::detached())
    }

    fn seed(tracker: &MemoryTracker, local_id: &str, id: &str, status: &str) {
        let mut item = WorkItem::new(local_id, "class", local_id).with_id(id);
        item.status = Some(status.to_string());
        item.calculate_checksum();
        tracker.insert_work_item(item);
    }

    #[test]
    fn missing_project_stops_the_run() {
        let tracker = MemoryTracker::new("PROJ");
        tracker.fail_operation(Operation::ProjectExists);
        let worker = worker_with(&tracker, SyncSettings::default());
        assert!(matches!(worker.check_project(), Err(SyncError::Api { .. })));
    }

    #[test]
    fn orphans_are_soft_deleted_once() {
        let tracker = MemoryTracker::new("PROJ");
        seed(&tracker, "kept", "PROJ-1", "open");
        seed(&tracker, "gone", "PROJ-2", "open");
        seed(&tracker, "already", "PROJ-3", STATUS_DELETED);
        let mut worker = worker_with(&tracker, SyncSettings::default());
        worker.load_work_item_map(["class"]).expect("map loads");

        let mut session = ConverterSession::new();
        session.insert("kept".to_string(), data(None));
        assert_eq!(worker.delete_orphaned(&session), 1);

        let update = &tracker.calls_of(Operation::UpdateWorkItems)[0];
        assert_eq!(update.ids, vec!["PROJ-2".to_string()]);
        assert_eq!(
            tracker.work_item("PROJ-2").and_then(|item| item.status),
            Some(STATUS_DELETED.to_string())
        );
        assert!(!worker.repo().contains("gone"));
        assert!(worker.repo().contains("already"));
    }

    #[test]
    fn hard_delete_removes_items() {
        let tracker = MemoryTracker::new("PROJ");
        seed(&tracker, "gone", "PROJ-1", "open");
        let settings = SyncSettings {
            delete_mode: DeleteMode::Hard,
            ..SyncSettings::default()
        };
        let mut worker = worker_with(&tracker, settings);
        worker.load_work_item_map(["class"]).expect("map loads");

        assert_eq!(worker.delete_orphaned(&ConverterSession::new()), 1);
        assert!(tracker.work_item("PROJ-1").is_none());
    }

    #[test]
    fn failed_delete_keeps_mapping_and_reports() {
        let tracker = MemoryTracker::new("PROJ");
        seed(&tracker, "gone", "PROJ-1", "open");
        tracker.fail_operation(Operation::UpdateWorkItems);
        let mut worker = worker_with(&tracker, SyncSettings::default());
        worker.load_work_item_map(["class"]).expect("map loads");

        assert_eq!(worker.delete_orphaned(&ConverterSession::new()), 0);
        assert!(worker.repo().contains("gone"));
        assert_eq!(worker.collector().work_item_error_count(), 1);
    }

    #[test]
    fn missing_items_are_created_in_one_batch() {
        let tracker = MemoryTracker::new("PROJ");
        let mut worker = worker_with(&tracker, SyncSettings::default());
        let mut session = ConverterSession::new();
        session.insert("a".to_string(), data(Some(WorkItem::new("a", "class", "A"))));
        session.insert("b".to_string(), data(Some(WorkItem::new("b", "class", "B"))));
        session.insert("c".to_string(), data(None));

        assert_eq!(worker.create_missing(&session).expect("created"), 2);
        assert_eq!(tracker.count(Operation::CreateWorkItems), 1);
        assert!(worker.repo().lookup_remote_id("a").is_some());
        let stored = tracker.work_item(worker.repo().lookup_remote_id("b").expect("mapped")).expect("stored");
        assert!(stored.checksum.is_some());
    }

    #[test]
    fn sequential_patch_isolates_failures() {
        let tracker = MemoryTracker::new("PROJ");
        seed(&tracker, "a", "PROJ-1", "open");
        seed(&tracker, "b", "PROJ-2", "open");
        tracker.fail_work_item("PROJ-1");
        let mut worker = worker_with(&tracker, SyncSettings::default());
        worker.load_work_item_map(["class"]).expect("map loads");

        let mut session = ConverterSession::new();
        session.insert("a".to_string(), data(Some(WorkItem::new("a", "class", "A2").with_id("PROJ-1"))));
        session.insert("b".to_string(), data(Some(WorkItem::new("b", "class", "B2").with_id("PROJ-2"))));

        let stats = worker.compare_and_update(&session).expect("no breaker in sequential mode");
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(worker.collector().work_item_error_count(), 1);
    }

    #[test]
    fn session_errors_reach_the_collector() {
        let tracker = MemoryTracker::new("PROJ");
        let worker = worker_with(&tracker, SyncSettings::default());
        let mut failed = data(None);
        failed.errors.insert("Missing template_path Attribute".to_string());
        let mut linked = data(Some(WorkItem::new("b", "class", "B")));
        linked.link_errors.push("Requested attribute: \"owner\"".to_string());
        linked.errors.insert("Non-existing model element referenced in description".to_string());
        let mut session = ConverterSession::new();
        session.insert("a".to_string(), failed);
        session.insert("b".to_string(), linked);

        worker.collect_session_errors(&session);
        assert_eq!(worker.collector().work_item_error_count(), 1);
        assert_eq!(worker.collector().link_error_count(), 1);
        assert_eq!(worker.collector().exit_code(), crate::collector::EXIT_PARTIAL);
    }

    #[test]
    fn breaker_message_shows_percentage() {
        let err = SyncError::FailureRateExceeded {
            failed: 2,
            total: 12,
            rate: failure_rate(2, 12),
        };
        assert_eq!(err.to_string(), "too many work item update failures: 2 of 12 (16.7%)");
        assert_eq!(err.code(), ErrorCode::FailureRateExceeded);
    }
}
