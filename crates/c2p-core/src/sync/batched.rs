//! Batched patch strategy.
//!
//! Analysis (checksum comparison, fetching the authoritative item and its
//! complete link list) runs on the worker pool. Planning runs on the
//! calling thread in local id order and produces four batches that are
//! sent in a fixed order: type updates, content updates, link deletions,
//! link creations. The tracker rejects type and content changes in one
//! request, hence the separate first batch.

use tracing::{error, info, warn};

use super::attachments::update_attachments;
use super::patch::{fetch_work_item, prepare_full_update, remote_id, strip_to_checksum};
use super::{PatchStats, SyncError};
use crate::collector::ErrorCollector;
use crate::context::RunContext;
use crate::identity::IdentityRepository;
use crate::model::{Link, WorkItem};
use crate::pool::map_parallel;
use crate::tracker::TrackerClient;

/// What one work item needs, as found by the analysis phase.
#[derive(Debug)]
pub struct Analysis {
    pub local_id: String,
    pub new: WorkItem,
    /// The snapshot, replaced by the authoritative item when fetched.
    pub old: WorkItem,
    /// `old` was fetched and carries its complete link list.
    pub fresh: bool,
    pub needs_update: bool,
    pub content_changed: bool,
    pub needs_type_update: bool,
    pub attachments_changed: bool,
}

/// Requests of one batched run, in execution order.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub type_updates: Vec<WorkItem>,
    pub content_updates: Vec<WorkItem>,
    pub links_to_delete: Vec<Link>,
    pub links_to_create: Vec<Link>,
}

impl BatchPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_updates.is_empty()
            && self.content_updates.is_empty()
            && self.links_to_delete.is_empty()
            && self.links_to_create.is_empty()
    }

    /// Send the batches in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing batch; later batches are not sent.
    pub fn execute(&self, client: &dyn TrackerClient) -> Result<(), SyncError> {
        if !self.type_updates.is_empty() {
            info!(count = self.type_updates.len(), "Batch updating types");
            client
                .update_work_items(&self.type_updates)
                .map_err(SyncError::api("batch update types"))?;
        }
        if !self.content_updates.is_empty() {
            info!(count = self.content_updates.len(), "Batch updating work items");
            client
                .update_work_items(&self.content_updates)
                .map_err(SyncError::api("batch update work items"))?;
        }
        if !self.links_to_delete.is_empty() {
            info!(count = self.links_to_delete.len(), "Batch deleting links");
            client
                .delete_work_item_links(&self.links_to_delete)
                .map_err(SyncError::api("batch delete links"))?;
        }
        if !self.links_to_create.is_empty() {
            info!(count = self.links_to_create.len(), "Batch creating links");
            client
                .create_work_item_links(&self.links_to_create)
                .map_err(SyncError::api("batch create links"))?;
        }
        Ok(())
    }
}

/// Compare `new` with its snapshot and fetch what planning will need.
///
/// # Errors
///
/// Returns [`SyncError`] when the authoritative item cannot be fetched.
pub fn analyze(
    client: &dyn TrackerClient,
    local_id: String,
    mut new: WorkItem,
    snapshot: &WorkItem,
    force: bool,
) -> Result<Analysis, SyncError> {
    let id = remote_id(snapshot)?;
    new.id = Some(id.clone());
    new.calculate_checksum();

    let mut analysis = Analysis {
        local_id,
        needs_update: force || snapshot.is_deleted() || new.checksum != snapshot.checksum,
        content_changed: false,
        needs_type_update: false,
        attachments_changed: false,
        fresh: false,
        old: snapshot.clone(),
        new,
    };
    if !analysis.needs_update {
        return Ok(analysis);
    }

    let old_parts = snapshot.checksum_parts();
    let new_parts = analysis.new.checksum_parts();
    analysis.content_changed = snapshot.is_deleted() || old_parts.content != new_parts.content;
    analysis.attachments_changed = old_parts.attachments != new_parts.attachments;
    analysis.needs_type_update = analysis.new.work_item_type != snapshot.work_item_type;

    if analysis.content_changed || force {
        let mut fresh = fetch_work_item(client, &id)?;
        if fresh.linked_items_truncated {
            fresh.linked_items = client
                .get_all_work_item_links(&id)
                .map_err(SyncError::api("get work item links"))?;
            fresh.linked_items_truncated = false;
        }
        analysis.old = fresh;
        analysis.fresh = true;
    }
    Ok(analysis)
}


/// Turn analyses into a plan, sending attachment changes on the way.
///
/// Items whose attachments cannot be reconciled are recorded in
/// `collector` and left out of the plan.
pub fn plan(
    client: &dyn TrackerClient,
    analyses: Vec<Analysis>,
    force: bool,
    collector: &ErrorCollector,
    stats: &mut PatchStats,
) -> BatchPlan {
    let mut plan = BatchPlan::default();
    for mut analysis in analyses {
        if !analysis.needs_update {
            stats.unchanged += 1;
            continue;
        }
        match plan_one(client, &mut analysis, force) {
            Ok(planned) => {
                if planned.full {
                    stats.updated += 1;
                } else {
                    stats.checksum_only += 1;
                }
                plan.type_updates.extend(planned.type_update);
                plan.links_to_delete.extend(planned.links_to_delete);
                plan.links_to_create.extend(planned.links_to_create);
                plan.content_updates.push(analysis.new);
            }
            Err(err) => {
                error!(local_id = %analysis.local_id, error = %err, "Failed to plan work item update");
                collector.add_work_item_error(analysis.local_id, &err);
                stats.failed += 1;
            }
        }
    }
    plan
}

struct Planned {
    full: bool,
    type_update: Option<WorkItem>,
    links_to_delete: Vec<Link>,
    links_to_create: Vec<Link>,
}

fn plan_one(client: &dyn TrackerClient, analysis: &mut Analysis, force: bool) -> Result<Planned, SyncError> {
    let id = remote_id(&analysis.old)?;
    let mut full = analysis.content_changed || force;

    if full || analysis.attachments_changed {
        let old_attachments = if analysis.fresh && analysis.old.attachments.is_empty() {
            Vec::new()
        } else {
            client
                .get_all_work_item_attachments(&id)
                .map_err(SyncError::api("get attachments"))?
        };
        if !old_attachments.is_empty() || !analysis.new.attachments.is_empty() {
            let old_digests = analysis.old.checksum_parts().attachments;
            let new_digests = analysis.new.checksum_parts().attachments;
            full |= update_attachments(
                client,
                &mut analysis.new,
                &old_digests,
                &new_digests,
                old_attachments,
                force,
            )
            .map_err(SyncError::api("update attachments"))?;
        }
    }

    if !full {
        strip_to_checksum(&mut analysis.new);
        return Ok(Planned {
            full,
            type_update: None,
            links_to_delete: Vec::new(),
            links_to_create: Vec::new(),
        });
    }

    if !analysis.fresh {
        analysis.old = fetch_work_item(client, &id)?;
        analysis.fresh = true;
    }
    let type_update = analysis
        .new
        .work_item_type
        .as_deref()
        .filter(|_| analysis.needs_type_update)
        .map(|work_item_type| WorkItem::type_update(&id, &analysis.local_id, work_item_type));
    let delta = prepare_full_update(client, &mut analysis.new, analysis.old.clone())
        .map_err(SyncError::api("get work item links"))?;
    analysis.new.work_item_type = None;
    analysis.new.linked_items.clear();

    Ok(Planned {
        full,
        type_update,
        links_to_delete: delta.to_delete,
        links_to_create: delta.to_create,
    })
}

/// Run the batched strategy over `targets`, which must be sorted by local id.
///
/// # Errors
///
/// Returns [`SyncError::Pool`] if an analysis worker died and
/// [`SyncError::Api`] if a batch request failed. Either way the caller is
/// expected to retry with the parallel strategy.
pub fn patch_batched(
    ctx: &RunContext,
    client: &dyn TrackerClient,
    repo: &IdentityRepository,
    targets: Vec<(String, WorkItem)>,
    max_workers: usize,
    force: bool,
    collector: &ErrorCollector,
) -> Result<PatchStats, SyncError> {
    info!(count = targets.len(), "Phase 1: Analyzing work items for batch operations");
    let results = map_parallel(ctx, targets, max_workers, |(local_id, new)| {
        let result = match repo.get_snapshot(&local_id) {
            Some(snapshot) => analyze(client, local_id.clone(), new, snapshot, force),
            None => Err(SyncError::Identity(crate::identity::IdentityError::MissingRemoteId {
                local_id: local_id.clone(),
            })),
        };
        (local_id, result)
    })?;

    let mut stats = PatchStats::default();
    let mut analyses = Vec::with_capacity(results.len());
    for (local_id, result) in results {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(err) => {
                error!(%local_id, error = %err, "Failed to analyze work item");
                collector.add_work_item_error(local_id, &err);
                stats.failed += 1;
            }
        }
    }
    if stats.failed > 0 {
        warn!(count = stats.failed, "Skipping work items due to analysis errors");
    }

    info!("Phase 2: Executing batched operations");
    let plan = plan(client, analyses, force, collector, &mut stats);
    plan.execute(client)?;
    info!(
        updated = stats.updated,
        checksum_only = stats.checksum_only,
        "Successfully completed batched operations"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TextContent;
    use crate::tracker::memory::{MemoryTracker, Operation};

    fn seeded(tracker: &MemoryTracker, n: usize) -> IdentityRepository {
        let mut snapshots = Vec::new();
        for i in 0..n {
            let mut item = WorkItem::new(format!("e{i}"), "class", format!("Item {i}")).with_id(format!("PROJ-{i}"));
            item.calculate_checksum();
            tracker.insert_work_item(item.clone());
            snapshots.push(item);
        }
        IdentityRepository::from_items(snapshots).expect("seeded items have ids")
    }

    fn local(i: usize, work_item_type: &str, title: &str) -> (String, WorkItem) {
        let item = WorkItem::new(format!("e{i}"), work_item_type, title).with_id(format!("PROJ-{i}"));
        (format!("e{i}"), item)
    }

    #[test]
    fn unchanged_items_produce_an_empty_plan() {
        let tracker = MemoryTracker::new("PROJ");
        let repo = seeded(&tracker, 3);
        let targets = (0..3).map(|i| local(i, "class", &format!("Item {i}"))).collect();
        tracker.clear_calls();

        let stats = patch_batched(
            &RunContext::detached(),
            &tracker,
            &repo,
            targets,
            2,
            false,
            &ErrorCollector::new(),
        )
        .expect("batched run");
        assert_eq!(stats.unchanged, 3);
        assert_eq!(tracker.mutation_count(), 0);
    }

    #[test]
    fn type_batch_is_sent_without_content() {
        let tracker = MemoryTracker::new("PROJ");
        let repo = seeded(&tracker, 2);
        let mut changed = local(0, "component", "Item 0");
        changed.1.description = Some(TextContent::html("<p>new</p>"));
        let targets = vec![changed, local(1, "class", "Item 1")];
        tracker.clear_calls();

        let stats = patch_batched(
            &RunContext::detached(),
            &tracker,
            &repo,
            targets,
            2,
            false,
            &ErrorCollector::new(),
        )
        .expect("batched run");
        assert_eq!(stats.updated, 1);

        let updates = tracker.calls_of(Operation::UpdateWorkItems);
        assert_eq!(updates.len(), 2);
        let types = &updates[0].items[0];
        assert_eq!(types.work_item_type.as_deref(), Some("component"));
        assert!(types.description.is_none());
        let content = &updates[1].items[0];
        assert!(content.work_item_type.is_none());
        assert!(content.description.is_some());
        assert_eq!(
            tracker.work_item("PROJ-0").and_then(|item| item.work_item_type),
            Some("component".to_string())
        );
    }

    #[test]
    fn failed_batch_is_reported() {
        let tracker = MemoryTracker::new("PROJ");
        let repo = seeded(&tracker, 2);
        let targets = vec![local(0, "class", "Renamed"), local(1, "class", "Item 1")];
        tracker.fail_operation(Operation::UpdateWorkItems);

        let err = patch_batched(
            &RunContext::detached(),
            &tracker,
            &repo,
            targets,
            2,
            false,
            &ErrorCollector::new(),
        )
        .expect_err("batch fails");
        assert!(matches!(err, SyncError::Api { .. }));
    }
}
