//! Attachment reconciliation of one work item.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error};

use crate::model::attachment::{MIME_PNG, MIME_SVG, base_name};
use crate::model::{Attachment, WorkItem};
use crate::tracker::{ApiError, TrackerClient};

/// Delete, create and update attachments of `new` against the remote list.
///
/// Afterwards every attachment of `new` carries a remote id. Remote
/// attachments sharing a file name are deduplicated first. Attachments of
/// both sides are updated when the digest of their group changed or
/// `force` is set; an SVG with a PNG sibling is only updated together with
/// that sibling.
///
/// Returns whether attachments were created, in which case image
/// references of the content must be rewritten.
///
/// # Errors
///
/// Returns the first [`ApiError`]; earlier calls are not rolled back.
pub fn update_attachments(
    client: &dyn TrackerClient,
    new: &mut WorkItem,
    old_digests: &BTreeMap<String, String>,
    new_digests: &BTreeMap<String, String>,
    old_attachments: Vec<Attachment>,
    force: bool,
) -> Result<bool, ApiError> {
    let work_item_id = new.id.clone();
    for attachment in &mut new.attachments {
        attachment.work_item_id.clone_from(&work_item_id);
    }

    let mut old_by_name: BTreeMap<String, Attachment> = BTreeMap::new();
    for attachment in old_attachments {
        if let Some(duplicate) = old_by_name.insert(attachment.file_name.clone(), attachment) {
            error!(
                file = %duplicate.file_name,
                attachment = duplicate.id.as_deref().unwrap_or("-"),
                "There are already multiple attachments with this name, deleting the duplicate"
            );
            client.delete_work_item_attachment(&duplicate)?;
        }
    }
    let new_names: BTreeSet<String> = new.attachments.iter().map(|a| a.file_name.clone()).collect();

    for (file_name, stale) in &old_by_name {
        if !new_names.contains(file_name) {
            debug!(file = %file_name, "deleting attachment");
            client.delete_work_item_attachment(stale)?;
        }
    }

    let missing: Vec<usize> = new
        .attachments
        .iter()
        .enumerate()
        .filter(|(_, a)| !old_by_name.contains_key(&a.file_name))
        .map(|(idx, _)| idx)
        .collect();
    let created = !missing.is_empty();
    if created {
        let mut batch: Vec<Attachment> = missing.iter().map(|&idx| new.attachments[idx].clone()).collect();
        client.create_work_item_attachments(&mut batch)?;
        for (idx, uploaded) in missing.into_iter().zip(batch) {
            new.attachments[idx].id = uploaded.id;
        }
    }

    let mut for_update: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, attachment) in new.attachments.iter_mut().enumerate() {
        let Some(existing) = old_by_name.get(&attachment.file_name) else {
            continue;
        };
        attachment.id.clone_from(&existing.id);
        let group = base_name(&attachment.file_name);
        if force || new_digests.get(group) != old_digests.get(group) {
            for_update.insert(attachment.file_name.clone(), idx);
        }
    }

    for (file_name, &idx) in &for_update {
        let attachment = &new.attachments[idx];
        if attachment.mime_type == MIME_SVG {
            let png = format!("{}.png", base_name(file_name));
            let has_png = new
                .attachments
                .iter()
                .any(|a| a.file_name == png && a.mime_type == MIME_PNG);
            if has_png && !for_update.contains_key(&png) {
                continue;
            }
        }
        client.update_work_item_attachment(attachment)?;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LazyContent;
    use crate::tracker::memory::{MemoryTracker, Operation};

    fn attachment(file_name: &str, mime: &str, bytes: &[u8]) -> Attachment {
        Attachment::new(file_name, "Diagram", mime, LazyContent::eager(bytes.to_vec()))
    }

    fn tracker_with(attachments: Vec<Attachment>) -> (MemoryTracker, WorkItem) {
        let tracker = MemoryTracker::new("PROJ");
        let mut items = vec![WorkItem::new("e1", "class", "Door")];
        items[0].attachments = attachments;
        tracker.create_work_items(&mut items).expect("create");
        let item = items.remove(0);
        (tracker, item)
    }

    #[test]
    fn creates_deletes_and_updates_by_file_name() {
        let (tracker, old) = tracker_with(vec![
            attachment("__C2P__diagram.svg", MIME_SVG, b"<svg/>"),
            attachment("__C2P__diagram.png", MIME_PNG, b"png"),
            attachment("gone.png", MIME_PNG, b"x"),
        ]);
        let mut old = old;
        old.calculate_checksum();

        let mut new = WorkItem::new("e1", "class", "Door").with_id(old.id.clone().expect("created"));
        new.add_attachment(attachment("__C2P__diagram.svg", MIME_SVG, b"<svg>2</svg>"));
        new.add_attachment(attachment("__C2P__diagram.png", MIME_PNG, b"png2"));
        new.add_attachment(attachment("fresh.png", MIME_PNG, b"y"));
        new.calculate_checksum();

        let remote = tracker.attachments_of(new.id.as_deref().expect("id"));
        let old_digests = old.checksum_parts().attachments;
        let new_digests = new.checksum_parts().attachments;
        tracker.clear_calls();
        let created = update_attachments(&tracker, &mut new, &old_digests, &new_digests, remote, false)
        .expect("attachments reconciled");

        assert!(created);
        assert!(new.attachments.iter().all(|a| a.id.is_some()));
        assert_eq!(tracker.count(Operation::DeleteAttachment), 1);
        assert_eq!(tracker.count(Operation::CreateAttachments), 1);
        assert_eq!(tracker.count(Operation::UpdateAttachment), 2, "svg goes with its png");
    }

    #[test]
    fn unchanged_groups_are_left_alone() {
        let (tracker, mut old) = tracker_with(vec![attachment("a.png", MIME_PNG, b"x")]);
        old.calculate_checksum();
        let mut new = WorkItem::new("e1", "class", "Door").with_id(old.id.clone().expect("created"));
        new.add_attachment(attachment("a.png", MIME_PNG, b"x"));
        new.calculate_checksum();

        let remote = tracker.attachments_of(new.id.as_deref().expect("id"));
        let old_digests = old.checksum_parts().attachments;
        let new_digests = new.checksum_parts().attachments;
        tracker.clear_calls();
        let created = update_attachments(&tracker, &mut new, &old_digests, &new_digests, remote, false)
        .expect("attachments reconciled");

        assert!(!created);
        assert_eq!(tracker.mutation_count(), 0);
        assert_eq!(new.attachments[0].id, old.attachments[0].id);
    }

    #[test]
    fn duplicate_remote_names_are_removed() {
        let (tracker, old) = tracker_with(vec![
            attachment("a.png", MIME_PNG, b"x"),
            attachment("a.png", MIME_PNG, b"x"),
        ]);
        let mut new = WorkItem::new("e1", "class", "Door").with_id(old.id.clone().expect("created"));
        new.add_attachment(attachment("a.png", MIME_PNG, b"x"));

        let remote = tracker.attachments_of(new.id.as_deref().expect("id"));
        tracker.clear_calls();
        update_attachments(&tracker, &mut new, &BTreeMap::new(), &BTreeMap::new(), remote, false)
            .expect("attachments reconciled");
        assert_eq!(tracker.count(Operation::DeleteAttachment), 1);
    }
}
