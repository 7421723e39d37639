//! Work item data model shared by the converter, the orchestrator and the
//! document renderer.

pub mod attachment;
pub mod checksum;
pub mod document;
pub mod link;
pub mod work_item;

pub use attachment::{Attachment, AttachmentKind, LazyContent};
pub use checksum::{CHECKSUM_ATTRIBUTE, ChecksumParts, WORK_ITEM_CHECKSUM_KEY};
pub use document::{Document, RenderingLayout, layout_index};
pub use link::{Link, LinkDelta, link_delta, missing_links};
pub use work_item::{AttributeValue, STATUS_DELETED, STATUS_OPEN, TextContent, WorkItem};

/// Attribute carrying the originating model element id on every work item.
pub const LOCAL_ID_ATTRIBUTE: &str = "uuid_capella";
