//! Patch of a single work item against its remote counterpart.

use std::collections::BTreeMap;

use tracing::{error, info};

use super::SyncError;
use super::attachments::update_attachments;
use crate::convert::html::replace_image_sources;
use crate::model::{AttributeValue, CHECKSUM_ATTRIBUTE, LinkDelta, STATUS_OPEN, WorkItem, link_delta};
use crate::tracker::{ApiError, TrackerClient};

/// What patching one work item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Checksums matched; nothing was sent.
    Unchanged,
    /// Only attachments changed; the checksum attribute was sent.
    ChecksumOnly,
    /// Content, links or attachments were written.
    Updated,
}

/// Bring the remote item behind `old` in line with `new`.
///
/// `old` is the snapshot from the identity repository. It is only trusted
/// for the checksum; the authoritative item is fetched when content
/// changed or `force` is set.
///
/// # Errors
///
/// Returns [`SyncError::Api`] for the first failed tracker call and
/// [`SyncError::Identity`] if `old` was never created remotely.
pub fn patch_work_item(
    client: &dyn TrackerClient,
    mut new: WorkItem,
    old: &WorkItem,
    force: bool,
) -> Result<PatchOutcome, SyncError> {
    new.calculate_checksum();
    if !force && !old.is_deleted() && new.checksum == old.checksum {
        return Ok(PatchOutcome::Unchanged);
    }
    let id = remote_id(old)?;
    new.id = Some(id.clone());

    info!(
        work_item = %id,
        work_item_type = new.work_item_type.as_deref().unwrap_or("?"),
        title = new.title.as_deref().unwrap_or(""),
        "Update work item for model element"
    );

    let old_parts = old.checksum_parts();
    let new_parts = new.checksum_parts();
    let mut changed = old.is_deleted() || new_parts.content != old_parts.content;

    let mut current = old.clone();
    let old_attachments = if changed || force {
        current = fetch_work_item(client, &id)?;
        if current.attachments.is_empty() {
            Vec::new()
        } else {
            client
                .get_all_work_item_attachments(&id)
                .map_err(SyncError::api("get attachments"))?
        }
    } else {
        client
            .get_all_work_item_attachments(&id)
            .map_err(SyncError::api("get attachments"))?
    };
    if !old_attachments.is_empty() || !new.attachments.is_empty() {
        changed |= update_attachments(
            client,
            &mut new,
            &old_parts.attachments,
            &new_parts.attachments,
            old_attachments,
            force,
        )
        .map_err(SyncError::api("update attachments"))?;
    }

    let delta = if changed || force {
        prepare_full_update(client, &mut new, current).map_err(SyncError::api("get work item links"))?
    } else {
        strip_to_checksum(&mut new);
        LinkDelta::default()
    };

    client
        .update_work_item(&new)
        .map_err(SyncError::api("update work item"))?;
    apply_link_delta(client, &new, &delta)?;

    Ok(if changed || force {
        PatchOutcome::Updated
    } else {
        PatchOutcome::ChecksumOnly
    })
}

pub(super) fn remote_id(old: &WorkItem) -> Result<String, SyncError> {
    old.id.clone().ok_or_else(|| {
        SyncError::Identity(crate::identity::IdentityError::MissingRemoteId {
            local_id: old.local_id.clone(),
        })
    })
}

/// The full remote item; a vanished item is reported as 404.
pub(super) fn fetch_work_item(client: &dyn TrackerClient, id: &str) -> Result<WorkItem, SyncError> {
    client
        .get_work_item(id)
        .map_err(SyncError::api("get work item"))?
        .ok_or_else(|| SyncError::Api {
            operation: "get work item",
            source: ApiError::new(Some(404), format!("work item {id} not found")),
        })
}

/// Turn `new` into the payload of a content update against `old`.
///
/// Drops an unchanged type, reopens the item, clears attributes that
/// disappeared and omits attributes that did not change. Returns the link
/// delta against the complete remote link list.
///
/// # Errors
///
/// Returns [`ApiError`] when a truncated link list cannot be fetched.
pub fn prepare_full_update(
    client: &dyn TrackerClient,
    new: &mut WorkItem,
    mut old: WorkItem,
) -> Result<LinkDelta, ApiError> {
    if !new.attachments.is_empty() {
        refactor_attached_images(new);
    }
    if old.linked_items_truncated
        && let Some(id) = old.id.as_deref()
    {
        old.linked_items = client.get_all_work_item_links(id)?;
        old.linked_items_truncated = false;
    }

    if new.work_item_type == old.work_item_type {
        new.work_item_type = None;
    }
    new.status = Some(STATUS_OPEN.to_string());
    clear_stale_attributes(new, &old.additional_attributes);

    Ok(link_delta(&old.linked_items, &new.linked_items))
}

/// Empty every attribute of `old` that `new` lacks; drop equal ones.
pub fn clear_stale_attributes(new: &mut WorkItem, old: &BTreeMap<String, AttributeValue>) {
    for (key, value) in old {
        if key == CHECKSUM_ATTRIBUTE {
            continue;
        }
        match new.additional_attributes.get(key) {
            None => {
                new.additional_attributes.insert(key.clone(), value.cleared());
            }
            Some(current) if current == value => {
                new.additional_attributes.remove(key);
            }
            Some(_) => {}
        }
    }
}

/// Reduce `new` to an update that only carries its checksum.
pub fn strip_to_checksum(new: &mut WorkItem) {
    new.clear_attributes();
    new.work_item_type = None;
    new.status = None;
    new.description = None;
    new.title = None;
    new.linked_items.clear();
}

/// Point `workitemimg:` sources of the description and every HTML attribute
/// at the attachment ids.
pub fn refactor_attached_images(new: &mut WorkItem) {
    let mut ids = BTreeMap::new();
    for attachment in &new.attachments {
        match &attachment.id {
            Some(id) => {
                ids.insert(attachment.file_name.clone(), id.clone());
            }
            None => error!(file = %attachment.file_name, "Did not find attachment ID for file name"),
        }
    }

    if let Some(description) = &mut new.description {
        description.value = replace_image_sources(&description.value, &ids);
    }
    for value in new.additional_attributes.values_mut() {
        if let AttributeValue::Text(text) = value
            && text.is_html()
        {
            text.value = replace_image_sources(&text.value, &ids);
        }
    }
}

pub(super) fn apply_link_delta(client: &dyn TrackerClient, new: &WorkItem, delta: &LinkDelta) -> Result<(), SyncError> {
    if !delta.to_delete.is_empty() {
        info!(
            links = %keys(&delta.to_delete),
            work_item = new.id.as_deref().unwrap_or("-"),
            "Delete work item links"
        );
        client
            .delete_work_item_links(&delta.to_delete)
            .map_err(SyncError::api("delete work item links"))?;
    }
    if !delta.to_create.is_empty() {
        info!(
            links = %keys(&delta.to_create),
            work_item = new.id.as_deref().unwrap_or("-"),
            "Create work item links"
        );
        client
            .create_work_item_links(&delta.to_create)
            .map_err(SyncError::api("create work item links"))?;
    }
    Ok(())
}

fn keys(links: &[crate::model::Link]) -> String {
    links.iter().map(crate::model::Link::key).collect::<Vec<_>>().join(", ")
}
