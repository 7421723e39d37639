//! Work item attachments and lazily produced content.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::canonical::sha256_hex;

pub const MIME_SVG: &str = "image/svg+xml";
pub const MIME_PNG: &str = "image/png";

type Producer = Box<dyn FnOnce() -> Vec<u8> + Send>;

/// Bytes that are computed at most once, on first access.
///
/// A fresh value is built every run, so memoization never outlives the run
/// that produced it.
pub struct LazyContent {
    cell: OnceLock<Vec<u8>>,
    producer: Mutex<Option<Producer>>,
}

impl LazyContent {
    /// Already known bytes.
    #[must_use]
    pub fn eager(bytes: Vec<u8>) -> Self {
        Self {
            cell: OnceLock::from(bytes),
            producer: Mutex::new(None),
        }
    }

    /// Bytes produced by `producer` when first requested.
    pub fn lazy(producer: impl FnOnce() -> Vec<u8> + Send + 'static) -> Self {
        Self {
            cell: OnceLock::new(),
            producer: Mutex::new(Some(Box::new(producer))),
        }
    }

    /// The content, running the producer if this is the first access.
    pub fn get(&self) -> &[u8] {
        self.cell.get_or_init(|| {
            let producer = self
                .producer
                .lock()
                .map_or(None, |mut guard| guard.take());
            producer.map_or_else(Vec::new, |produce| produce())
        })
    }

    /// Whether the content was already computed.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(bytes) => write!(f, "LazyContent({} bytes)", bytes.len()),
            None => f.write_str("LazyContent(<pending>)"),
        }
    }
}

/// How an attachment takes part in checksum selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentKind {
    #[default]
    Plain,
    /// A rendered diagram; its SVG is replaced by a PNG sibling in checksums.
    Diagram,
    /// A context diagram; its SVG keeps its own checksum.
    ContextDiagram,
}

/// A file attached to a work item.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: Option<String>,
    pub work_item_id: Option<String>,
    pub title: String,
    pub mime_type: String,
    pub file_name: String,
    pub kind: AttachmentKind,
    content: Arc<LazyContent>,
    /// Stable description of the content input, used instead of the bytes.
    checksum_source: Option<String>,
}

impl Attachment {
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        title: impl Into<String>,
        mime_type: impl Into<String>,
        content: LazyContent,
    ) -> Self {
        Self {
            id: None,
            work_item_id: None,
            title: title.into(),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
            kind: AttachmentKind::Plain,
            content: Arc::new(content),
            checksum_source: None,
        }
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: AttachmentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Compute the content checksum from `source` instead of the bytes.
    #[must_use]
    pub fn with_checksum_source(mut self, source: impl Into<String>) -> Self {
        self.checksum_source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The raw content, computing it if needed.
    pub fn content(&self) -> &[u8] {
        self.content.get()
    }

    #[must_use]
    pub fn is_content_computed(&self) -> bool {
        self.content.is_computed()
    }

    /// Base64 of the content, or the digest of the checksum source.
    pub fn content_checksum(&self) -> String {
        self.checksum_source.as_ref().map_or_else(
            || STANDARD.encode(self.content()),
            |source| sha256_hex(source.as_bytes()),
        )
    }

    /// The file name without its last extension.
    #[must_use]
    pub fn base_name(&self) -> &str {
        base_name(&self.file_name)
    }

    #[must_use]
    pub fn is_svg(&self) -> bool {
        self.mime_type == MIME_SVG
    }

    #[must_use]
    pub fn is_png(&self) -> bool {
        self.mime_type == MIME_PNG
    }
}

/// `"a.b.svg"` -> `"a.b"`; names without extension are returned unchanged.
#[must_use]
pub fn base_name(file_name: &str) -> &str {
    file_name.rsplit_once('.').map_or(file_name, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lazy_content_runs_producer_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let content = LazyContent::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            b"<svg/>".to_vec()
        });

        assert!(!content.is_computed());
        assert_eq!(content.get(), b"<svg/>");
        assert_eq!(content.get(), b"<svg/>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn checksum_source_avoids_rendering() {
        let attachment = Attachment::new(
            "__C2P__context_diagram.svg",
            "Context Diagram",
            MIME_SVG,
            LazyContent::lazy(|| panic!("must not render")),
        )
        .with_checksum_source("elk-input-v1");

        assert_eq!(attachment.content_checksum(), sha256_hex(b"elk-input-v1"));
        assert!(!attachment.is_content_computed());
    }

    #[test]
    fn clones_share_computed_content() {
        let attachment = Attachment::new(
            "a.svg",
            "A",
            MIME_SVG,
            LazyContent::lazy(|| b"x".to_vec()),
        );
        let copy = attachment.clone();
        assert_eq!(attachment.content(), b"x");
        assert!(copy.is_content_computed());
    }

    #[test]
    fn base_name_strips_last_extension() {
        assert_eq!(base_name("__C2P__diagram.svg"), "__C2P__diagram");
        assert_eq!(base_name("a.b.png"), "a.b");
        assert_eq!(base_name("plain"), "plain");
    }
}
