//! An in-process tracker that records every call.
//!
//! Used by the integration tests and by `c2p synchronize --dry-run`.
//! Failures can be injected per operation or per work item id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ApiError, TrackerClient, group_links_by_primary};
use crate::model::{Attachment, AttributeValue, Document, Link, WorkItem};

/// Tracker operations, one per [`TrackerClient`] method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    ProjectExists,
    GetAllWorkItems,
    GetWorkItem,
    CreateWorkItems,
    UpdateWorkItem,
    UpdateWorkItems,
    DeleteWorkItems,
    GetAllWorkItemLinks,
    CreateWorkItemLinks,
    DeleteWorkItemLinks,
    GetAttachments,
    CreateAttachments,
    UpdateAttachment,
    DeleteAttachment,
    GetDocument,
    CreateDocuments,
    UpdateDocuments,
}

impl Operation {
    /// Whether the operation changes tracker state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(
            self,
            Self::ProjectExists
                | Self::GetAllWorkItems
                | Self::GetWorkItem
                | Self::GetAllWorkItemLinks
                | Self::GetAttachments
                | Self::GetDocument
        )
    }
}

/// One observed call, in issue order.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: Operation,
    /// Work item ids (or document paths) the call touched.
    pub ids: Vec<String>,
    /// Payload of work item updates.
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Default)]
struct State {
    work_items: BTreeMap<String, WorkItem>,
    attachments: BTreeMap<String, Vec<Attachment>>,
    documents: BTreeMap<String, Document>,
    calls: Vec<RecordedCall>,
    next_id: usize,
    next_attachment_id: usize,
    failing_ops: BTreeSet<Operation>,
    failing_ids: BTreeSet<String>,
    link_page_size: Option<usize>,
}

impl State {
    fn check(&self, op: Operation, ids: &[String]) -> Result<(), ApiError> {
        if self.failing_ops.contains(&op) {
            return Err(ApiError::new(Some(500), format!("injected failure for {op:?}")));
        }
        if let Some(id) = ids.iter().find(|id| self.failing_ids.contains(*id)) {
            return Err(ApiError::new(Some(500), format!("injected failure for {id}")));
        }
        Ok(())
    }

    fn record(&mut self, op: Operation, ids: Vec<String>, items: Vec<WorkItem>) -> Result<(), ApiError> {
        let checked = self.check(op, &ids);
        self.calls.push(RecordedCall { op, ids, items });
        checked
    }

    fn apply_update(&mut self, update: &WorkItem) -> Result<(), ApiError> {
        let Some(id) = update.id.as_deref() else {
            return Err(ApiError::new(Some(400), "update without work item id"));
        };
        let Some(stored) = self.work_items.get_mut(id) else {
            return Err(ApiError::new(Some(404), format!("work item {id} not found")));
        };
        if let Some(title) = &update.title {
            stored.title = Some(title.clone());
        }
        if let Some(work_item_type) = &update.work_item_type {
            stored.work_item_type = Some(work_item_type.clone());
        }
        if let Some(status) = &update.status {
            stored.status = Some(status.clone());
        }
        if let Some(description) = &update.description {
            stored.description = Some(description.clone());
        }
        if let Some(checksum) = &update.checksum {
            stored.checksum = Some(checksum.clone());
        }
        for (key, value) in &update.additional_attributes {
            if *value == AttributeValue::Null {
                stored.additional_attributes.remove(key);
            } else {
                stored.additional_attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Tracker double holding all state in memory.
#[derive(Debug)]
pub struct MemoryTracker {
    project_id: String,
    state: Mutex<State>,
}

impl MemoryTracker {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a work item as if it had been created earlier.
    ///
    /// # Panics
    ///
    /// Panics if the item has no id.
    pub fn insert_work_item(&self, item: WorkItem) {
        let id = item.id.clone().expect("seeded work items need an id");
        let mut state = self.state();
        if !item.attachments.is_empty() {
            state.attachments.insert(id.clone(), item.attachments.clone());
        }
        state.work_items.insert(id, item);
    }

    pub fn insert_document(&self, document: Document) {
        self.state().documents.insert(document.path(), document);
    }

    /// Fail every call of `op` from now on.
    pub fn fail_operation(&self, op: Operation) {
        self.state().failing_ops.insert(op);
    }

    /// Fail every call that involves work item `id`.
    pub fn fail_work_item(&self, id: impl Into<String>) {
        self.state().failing_ids.insert(id.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_ops.clear();
        state.failing_ids.clear();
    }

    /// Return at most `size` links with a fetched work item and flag the
    /// rest as truncated.
    pub fn truncate_links_after(&self, size: usize) {
        self.state().link_page_size = Some(size);
    }

    #[must_use]
    pub fn work_item(&self, id: &str) -> Option<WorkItem> {
        self.state().work_items.get(id).cloned()
    }

    /// Every stored work item, ordered by id.
    #[must_use]
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.state().work_items.values().cloned().collect()
    }

    #[must_use]
    pub fn attachments_of(&self, id: &str) -> Vec<Attachment> {
        self.state().attachments.get(id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn document(&self, space: &str, name: &str) -> Option<Document> {
        self.state().documents.get(&format!("{space}/{name}")).cloned()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn calls_of(&self, op: Operation) -> Vec<RecordedCall> {
        self.state().calls.iter().filter(|c| c.op == op).cloned().collect()
    }

    #[must_use]
    pub fn count(&self, op: Operation) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of recorded calls that change tracker state.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state().calls.iter().filter(|c| c.op.is_mutation()).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

fn parse_type_query(query: &str) -> Option<BTreeSet<String>> {
    let inner = query.strip_prefix("type:(")?.strip_suffix(')')?;
    Some(inner.split_whitespace().map(str::to_string).collect())
}

fn sparse(item: &WorkItem) -> WorkItem {
    WorkItem {
        id: item.id.clone(),
        local_id: item.local_id.clone(),
        work_item_type: item.work_item_type.clone(),
        status: item.status.clone(),
        checksum: item.checksum.clone(),
        ..WorkItem::default()
    }
}

impl TrackerClient for MemoryTracker {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn project_exists(&self) -> Result<bool, ApiError> {
        self.state().record(Operation::ProjectExists, Vec::new(), Vec::new())?;
        Ok(true)
    }

    fn get_all_work_items(&self, query: &str, _fields: &str) -> Result<Vec<WorkItem>, ApiError> {
        let mut state = self.state();
        state.record(Operation::GetAllWorkItems, Vec::new(), Vec::new())?;
        let types = parse_type_query(query);
        Ok(state
            .work_items
            .values()
            .filter(|item| !item.local_id.is_empty())
            .filter(|item| {
                types.as_ref().is_none_or(|types| {
                    item.work_item_type.as_ref().is_some_and(|t| types.contains(t))
                })
            })
            .map(sparse)
            .collect())
    }

    fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, ApiError> {
        let mut state = self.state();
        state.record(Operation::GetWorkItem, vec![id.to_string()], Vec::new())?;
        let page_size = state.link_page_size;
        let attachments = state.attachments.get(id).cloned().unwrap_or_default();
        Ok(state.work_items.get(id).cloned().map(|mut item| {
            if let Some(size) = page_size
                && item.linked_items.len() > size
            {
                item.linked_items.truncate(size);
                item.linked_items_truncated = true;
            }
            item.attachments = attachments;
            item
        }))
    }

    fn create_work_items(&self, items: &mut [WorkItem]) -> Result<(), ApiError> {
        let mut state = self.state();
        let local_ids = items.iter().map(|item| item.local_id.clone()).collect();
        state.record(Operation::CreateWorkItems, local_ids, items.to_vec())?;
        for item in items.iter_mut() {
            state.next_id += 1;
            let id = format!("{}-{}", self.project_id, state.next_id);
            item.id = Some(id.clone());
            for link in &mut item.linked_items {
                link.primary_id.clone_from(&id);
            }
            let mut attachments = Vec::with_capacity(item.attachments.len());
            for attachment in &mut item.attachments {
                state.next_attachment_id += 1;
                attachment.id = Some(format!("{}-att", state.next_attachment_id));
                attachment.work_item_id = Some(id.clone());
                attachments.push(attachment.clone());
            }
            if !attachments.is_empty() {
                state.attachments.insert(id.clone(), attachments);
            }
            state.work_items.insert(id, item.clone());
        }
        Ok(())
    }

    fn update_work_item(&self, item: &WorkItem) -> Result<(), ApiError> {
        let mut state = self.state();
        let ids = item.id.iter().cloned().collect();
        state.record(Operation::UpdateWorkItem, ids, vec![item.clone()])?;
        state.apply_update(item)
    }

    fn update_work_items(&self, items: &[WorkItem]) -> Result<(), ApiError> {
        let mut state = self.state();
        let ids = items.iter().filter_map(|item| item.id.clone()).collect();
        state.record(Operation::UpdateWorkItems, ids, items.to_vec())?;
        items.iter().try_for_each(|item| state.apply_update(item))
    }

    fn delete_work_items(&self, ids: &[String]) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(Operation::DeleteWorkItems, ids.to_vec(), Vec::new())?;
        for id in ids {
            state.work_items.remove(id);
            state.attachments.remove(id);
        }
        Ok(())
    }

    fn get_all_work_item_links(&self, id: &str) -> Result<Vec<Link>, ApiError> {
        let mut state = self.state();
        state.record(Operation::GetAllWorkItemLinks, vec![id.to_string()], Vec::new())?;
        Ok(state
            .work_items
            .get(id)
            .map(|item| item.linked_items.clone())
            .unwrap_or_default())
    }

    fn create_work_item_links(&self, links: &[Link]) -> Result<(), ApiError> {
        let mut state = self.state();
        for (primary, group) in group_links_by_primary(links) {
            state.record(Operation::CreateWorkItemLinks, vec![primary.to_string()], Vec::new())?;
            let Some(item) = state.work_items.get_mut(primary) else {
                return Err(ApiError::new(Some(404), format!("work item {primary} not found")));
            };
            for link in group {
                if !item.linked_items.contains(link) {
                    item.linked_items.push(link.clone());
                }
            }
        }
        Ok(())
    }

    fn delete_work_item_links(&self, links: &[Link]) -> Result<(), ApiError> {
        let mut state = self.state();
        for (primary, group) in group_links_by_primary(links) {
            state.record(Operation::DeleteWorkItemLinks, vec![primary.to_string()], Vec::new())?;
            if let Some(item) = state.work_items.get_mut(primary) {
                item.linked_items.retain(|link| !group.contains(&link));
            }
        }
        Ok(())
    }

    fn get_all_work_item_attachments(&self, work_item_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let mut state = self.state();
        state.record(Operation::GetAttachments, vec![work_item_id.to_string()], Vec::new())?;
        Ok(state.attachments.get(work_item_id).cloned().unwrap_or_default())
    }

    fn create_work_item_attachments(&self, attachments: &mut [Attachment]) -> Result<(), ApiError> {
        let mut state = self.state();
        let ids: BTreeSet<String> = attachments
            .iter()
            .filter_map(|a| a.work_item_id.clone())
            .collect();
        state.record(Operation::CreateAttachments, ids.into_iter().collect(), Vec::new())?;
        for attachment in attachments.iter_mut() {
            let Some(work_item_id) = attachment.work_item_id.clone() else {
                return Err(ApiError::new(Some(400), "attachment without work item id"));
            };
            state.next_attachment_id += 1;
            attachment.id = Some(format!("{}-att", state.next_attachment_id));
            state
                .attachments
                .entry(work_item_id)
                .or_default()
                .push(attachment.clone());
        }
        Ok(())
    }

    fn update_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError> {
        let mut state = self.state();
        let ids = attachment.work_item_id.iter().cloned().collect();
        state.record(Operation::UpdateAttachment, ids, Vec::new())?;
        let Some(work_item_id) = attachment.work_item_id.as_deref() else {
            return Err(ApiError::new(Some(400), "attachment without work item id"));
        };
        let stored = state
            .attachments
            .get_mut(work_item_id)
            .and_then(|list| list.iter_mut().find(|a| a.id == attachment.id));
        match stored {
            Some(stored) => {
                *stored = attachment.clone();
                Ok(())
            }
            None => Err(ApiError::new(
                Some(404),
                format!("attachment {:?} not found", attachment.id),
            )),
        }
    }

    fn delete_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError> {
        let mut state = self.state();
        let ids = attachment.work_item_id.iter().cloned().collect();
        state.record(Operation::DeleteAttachment, ids, Vec::new())?;
        if let Some(work_item_id) = attachment.work_item_id.as_deref()
            && let Some(list) = state.attachments.get_mut(work_item_id)
        {
            list.retain(|a| a.id != attachment.id);
        }
        Ok(())
    }

    fn get_document(&self, space: &str, name: &str) -> Result<Option<Document>, ApiError> {
        let mut state = self.state();
        let path = format!("{space}/{name}");
        state.record(Operation::GetDocument, vec![path.clone()], Vec::new())?;
        Ok(state.documents.get(&path).cloned())
    }

    fn create_documents(&self, documents: &[Document]) -> Result<(), ApiError> {
        let mut state = self.state();
        let paths = documents.iter().map(Document::path).collect();
        state.record(Operation::CreateDocuments, paths, Vec::new())?;
        for document in documents {
            state.documents.insert(document.path(), document.clone());
        }
        Ok(())
    }

    fn update_documents(&self, documents: &[Document]) -> Result<(), ApiError> {
        let mut state = self.state();
        let paths = documents.iter().map(Document::path).collect();
        state.record(Operation::UpdateDocuments, paths, Vec::new())?;
        for document in documents {
            state.documents.insert(document.path(), document.clone());
        }
        Ok(())
    }
}
