use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::attachment::Attachment;
use super::link::Link;

/// Status assigned to every work item produced from the model.
pub const STATUS_OPEN: &str = "open";
/// Status of work items that were soft-deleted on the tracker.
pub const STATUS_DELETED: &str = "deleted";

/// Mime type of rich text content.
pub const MIME_HTML: &str = "text/html";
/// Mime type of plain text content.
pub const MIME_PLAIN: &str = "text/plain";

/// Text with an associated content type, e.g. a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub value: String,
}

impl TextContent {
    #[must_use]
    pub fn html(value: impl Into<String>) -> Self {
        Self {
            mime_type: MIME_HTML.to_string(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            mime_type: MIME_PLAIN.to_string(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_html(&self) -> bool {
        self.mime_type == MIME_HTML
    }
}

/// A typed custom field value.
///
/// The variant order matters for untagged deserialization: integers must be
/// tried before floats and text content objects last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Text(TextContent),
}

impl AttributeValue {
    /// The value used to clear a field that previously held `self`.
    ///
    /// Strings become empty, numbers zero and booleans `false`; every other
    /// kind is cleared with `null`.
    #[must_use]
    pub fn cleared(&self) -> Self {
        match self {
            Self::String(_) => Self::String(String::new()),
            Self::Integer(_) => Self::Integer(0),
            Self::Bool(_) => Self::Bool(false),
            Self::Null | Self::Float(_) | Self::Text(_) => Self::Null,
        }
    }

    #[must_use]
    pub const fn as_text(&self) -> Option<&TextContent> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<TextContent> for AttributeValue {
    fn from(value: TextContent) -> Self {
        Self::Text(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// The synchronizable unit: one model element as a tracker work item.
///
/// Optional fields follow partial-update semantics on the wire: `None`
/// means "do not touch" when the item is sent as an update.
#[derive(Debug, Clone, Default)]
pub struct WorkItem {
    /// Remote identifier, unknown until the item was created.
    pub id: Option<String>,
    /// Identifier of the originating model element.
    pub local_id: String,
    pub title: Option<String>,
    pub work_item_type: Option<String>,
    pub status: Option<String>,
    pub description: Option<TextContent>,
    pub additional_attributes: BTreeMap<String, AttributeValue>,
    pub linked_items: Vec<Link>,
    /// Set by the tracker when `linked_items` is an incomplete page.
    pub linked_items_truncated: bool,
    pub attachments: Vec<Attachment>,
    /// Opaque checksum as stored on the tracker or computed locally.
    pub checksum: Option<String>,
}

impl WorkItem {
    /// A fresh open work item for a model element.
    #[must_use]
    pub fn new(local_id: impl Into<String>, work_item_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            work_item_type: Some(work_item_type.into()),
            title: Some(title.into()),
            status: Some(STATUS_OPEN.to_string()),
            ..Self::default()
        }
    }

    /// Builder-style helper to set the remote id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// An update payload that only changes the type of `id`.
    #[must_use]
    pub fn type_update(id: &str, local_id: &str, work_item_type: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            local_id: local_id.to_string(),
            work_item_type: Some(work_item_type.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status.as_deref() == Some(STATUS_DELETED)
    }

    /// Short human label for logs: `[id](type title)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "[{}]({} {})",
            self.id.as_deref().unwrap_or("-"),
            self.work_item_type.as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("")
        )
    }

    /// Add an attachment, taking over the work item id.
    pub fn add_attachment(&mut self, mut attachment: Attachment) {
        attachment.work_item_id.clone_from(&self.id);
        self.attachments.push(attachment);
    }

    /// Drop every additional attribute. The checksum field is kept.
    pub fn clear_attributes(&mut self) {
        self.additional_attributes.clear();
    }
}
