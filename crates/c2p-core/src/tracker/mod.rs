//! The remote tracker as seen by the orchestrator.
//!
//! Every call is blocking from the caller's perspective and fails with an
//! [`ApiError`]. Pagination, authentication and wire formats are the
//! implementor's business.

pub mod memory;

use std::collections::BTreeMap;

use crate::error::ErrorCode;
use crate::model::{Attachment, Document, Link, WorkItem};

pub use memory::{MemoryTracker, Operation, RecordedCall};

/// Sparse field set used for the bulk work item query.
pub const WORK_ITEM_MAP_FIELDS: &str = "id,uuid_capella,checksum,status,type";

/// A failed tracker request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tracker request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
pub struct ApiError {
    /// HTTP-like status, if the tracker answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// An error without a response, e.g. a transport failure.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status, Some(404))
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::RemoteApiFailure
    }
}

/// Blocking access to one tracker project.
///
/// Implementations must be shareable across worker threads.
pub trait TrackerClient: Send + Sync {
    fn project_id(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`ApiError`] when the tracker cannot be reached.
    fn project_exists(&self) -> Result<bool, ApiError>;

    /// All work items matching `query`, with only `fields` populated.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on any failed page.
    fn get_all_work_items(&self, query: &str, fields: &str) -> Result<Vec<WorkItem>, ApiError>;

    /// A single work item with all fields, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, ApiError>;

    /// Create work items and write the new remote ids back into `items`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`]; no ids are written back in that case.
    fn create_work_items(&self, items: &mut [WorkItem]) -> Result<(), ApiError>;

    /// Partial update: `None` fields are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn update_work_item(&self, item: &WorkItem) -> Result<(), ApiError>;

    /// Update several work items in one request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`]; the whole batch counts as failed.
    fn update_work_items(&self, items: &[WorkItem]) -> Result<(), ApiError> {
        items.iter().try_for_each(|item| self.update_work_item(item))
    }

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn delete_work_items(&self, ids: &[String]) -> Result<(), ApiError>;

    /// The complete, untruncated link list of a work item.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn get_all_work_item_links(&self, id: &str) -> Result<Vec<Link>, ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn create_work_item_links(&self, links: &[Link]) -> Result<(), ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn delete_work_item_links(&self, links: &[Link]) -> Result<(), ApiError>;

    /// Attachment metadata of a work item; content is not fetched.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn get_all_work_item_attachments(&self, work_item_id: &str) -> Result<Vec<Attachment>, ApiError>;

    /// Upload attachments and write the new ids back.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn create_work_item_attachments(&self, attachments: &mut [Attachment]) -> Result<(), ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn update_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn delete_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError>;

    /// `None` when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure other than "not found".
    fn get_document(&self, space: &str, name: &str) -> Result<Option<Document>, ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn create_documents(&self, documents: &[Document]) -> Result<(), ApiError>;

    /// # Errors
    ///
    /// Returns [`ApiError`] on request failure.
    fn update_documents(&self, documents: &[Document]) -> Result<(), ApiError>;
}

/// Query for all work items of the given types: `type:(t1 t2 ...)`.
pub fn type_query<'a>(types: impl IntoIterator<Item = &'a str>) -> String {
    let types: Vec<&str> = types.into_iter().collect();
    format!("type:({})", types.join(" "))
}

/// Links grouped by primary work item, the unit of one link request.
#[must_use]
pub fn group_links_by_primary(links: &[Link]) -> BTreeMap<&str, Vec<&Link>> {
    let mut groups: BTreeMap<&str, Vec<&Link>> = BTreeMap::new();
    for link in links {
        groups.entry(link.primary_id.as_str()).or_default().push(link);
    }
    groups
}
