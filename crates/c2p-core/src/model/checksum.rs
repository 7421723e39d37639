//! Deterministic work item checksums.
//!
//! A checksum is a canonical JSON object with one entry for the content of
//! the work item (`__C2P__WORK_ITEM`) and one entry per attachment group
//! (keyed by the attachment base file name). Comparing two checksums tells
//! whether anything changed; comparing their parts tells what changed.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::warn;

use super::attachment::{Attachment, AttachmentKind, MIME_PNG, MIME_SVG};
use super::work_item::WorkItem;
use crate::canonical::{canonicalize_json, sha256_canonical};

/// Key of the content digest inside a checksum object.
pub const WORK_ITEM_CHECKSUM_KEY: &str = "__C2P__WORK_ITEM";

/// Attribute name under which the checksum is stored on the tracker.
pub const CHECKSUM_ATTRIBUTE: &str = "checksum";

/// The decoded parts of a stored checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumParts {
    pub content: String,
    pub attachments: BTreeMap<String, String>,
}

impl ChecksumParts {
    /// Decode a stored checksum string.
    ///
    /// Strings that are not a JSON object are treated as a bare content
    /// digest without attachment entries.
    #[must_use]
    pub fn parse(checksum: Option<&str>) -> Self {
        let Some(raw) = checksum.filter(|raw| !raw.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(mut map) => {
                let content = match map.remove(WORK_ITEM_CHECKSUM_KEY) {
                    Some(Value::String(digest)) => digest,
                    _ => String::new(),
                };
                let attachments = map
                    .into_iter()
                    .filter_map(|(name, digest)| match digest {
                        Value::String(digest) => Some((name, digest)),
                        _ => None,
                    })
                    .collect();
                Self {
                    content,
                    attachments,
                }
            }
            Err(_) => Self {
                content: raw.to_string(),
                attachments: BTreeMap::new(),
            },
        }
    }

    /// Encode the parts as the canonical checksum string.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut map = Map::new();
        map.insert(
            WORK_ITEM_CHECKSUM_KEY.to_string(),
            Value::String(self.content.clone()),
        );
        for (name, digest) in &self.attachments {
            map.insert(name.clone(), Value::String(digest.clone()));
        }
        canonicalize_json(&Value::Object(map))
    }
}

impl WorkItem {
    /// Compute the checksum, store it on the item and return it.
    pub fn calculate_checksum(&mut self) -> String {
        let parts = ChecksumParts {
            content: self.content_digest(),
            attachments: self.attachment_digests(),
        };
        let checksum = parts.encode();
        self.checksum = Some(checksum.clone());
        checksum
    }

    /// Parts of the currently stored checksum.
    #[must_use]
    pub fn checksum_parts(&self) -> ChecksumParts {
        ChecksumParts::parse(self.checksum.as_deref())
    }

    /// SHA-256 over the canonical content of the item.
    #[must_use]
    pub fn content_digest(&self) -> String {
        let attributes: Map<String, Value> = self
            .additional_attributes
            .iter()
            .filter(|(key, _)| key.as_str() != CHECKSUM_ATTRIBUTE)
            .map(|(key, value)| {
                (
                    key.clone(),
                    serde_json::to_value(value).unwrap_or(Value::Null),
                )
            })
            .collect();

        let mut links: Vec<_> = self.linked_items.iter().collect();
        links.sort_by_cached_key(|link| link.checksum_sort_key());
        let links: Vec<Value> = links
            .into_iter()
            .map(|link| {
                json!({
                    "role": link.role,
                    "secondary_work_item_id": link.secondary_id,
                    "secondary_work_item_project": link.secondary_project,
                })
            })
            .collect();

        let data = json!({
            "additional_attributes": attributes,
            "description": self.description,
            "linked_work_items": links,
            "status": self.status,
            "title": self.title,
            "type": self.work_item_type,
        });
        sha256_canonical(&data)
    }

    /// One digest per attachment group, keyed by base file name.
    pub fn attachment_digests(&self) -> BTreeMap<String, String> {
        let mut groups: BTreeMap<&str, BTreeMap<&str, &Attachment>> = BTreeMap::new();
        for attachment in &self.attachments {
            groups
                .entry(attachment.base_name())
                .or_default()
                .insert(attachment.mime_type.as_str(), attachment);
        }

        let mut digests = BTreeMap::new();
        for (base_name, mut group) in groups {
            let chosen = if let Some(svg) = group.remove(MIME_SVG) {
                match group.remove(MIME_PNG) {
                    Some(png) if svg.kind != AttachmentKind::ContextDiagram => png,
                    Some(_) => svg,
                    None => {
                        warn!(
                            file = base_name,
                            work_item = self.id.as_deref().unwrap_or("-"),
                            local_id = %self.local_id,
                            "missing PNG for SVG attachment"
                        );
                        svg
                    }
                }
            } else {
                let Some((_, first)) = group.pop_first() else {
                    continue;
                };
                first
            };
            if !group.is_empty() {
                warn!(
                    file = base_name,
                    work_item = self.id.as_deref().unwrap_or("-"),
                    local_id = %self.local_id,
                    "multiple attachments share one file name"
                );
            }

            let digest = sha256_canonical(&json!({
                "content_bytes": chosen.content_checksum(),
                "file_name": chosen.file_name,
                "mime_type": chosen.mime_type,
                "title": chosen.title,
                "work_item_id": chosen.work_item_id,
            }));
            digests.insert(base_name.to_string(), digest);
        }
        digests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attachment::LazyContent;
    use crate::model::link::Link;
    use crate::model::work_item::{AttributeValue, TextContent};

    fn sample() -> WorkItem {
        let mut item = WorkItem::new("uuid-1", "class", "Door");
        item.description = Some(TextContent::html("<p>A door</p>"));
        item.additional_attributes
            .insert("level".to_string(), AttributeValue::Integer(2));
        item
    }

    fn svg(name: &str, kind: AttachmentKind) -> Attachment {
        Attachment::new(
            format!("{name}.svg"),
            "Diagram",
            MIME_SVG,
            LazyContent::eager(b"<svg/>".to_vec()),
        )
        .with_kind(kind)
    }

    fn png(name: &str) -> Attachment {
        Attachment::new(
            format!("{name}.png"),
            "Diagram",
            MIME_PNG,
            LazyContent::eager(vec![0x89, b'P', b'N', b'G']),
        )
    }

    #[test]
    fn checksum_is_stable() {
        let mut a = sample();
        let mut b = sample();
        assert_eq!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn stored_checksum_attribute_is_ignored() {
        let mut a = sample();
        let mut b = sample();
        b.additional_attributes
            .insert(CHECKSUM_ATTRIBUTE.to_string(), AttributeValue::from("old"));
        assert_eq!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn description_bytes_matter() {
        let mut a = sample();
        let mut b = sample();
        b.description = Some(TextContent::html("<p>A  door</p>"));
        assert_ne!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn link_order_does_not_matter() {
        let mut a = sample();
        let mut b = sample();
        let links = vec![
            Link::new("P-1", "P-2", "parent", "PROJ"),
            Link::new("P-1", "P-3", "child", "PROJ"),
        ];
        a.linked_items.clone_from(&links);
        b.linked_items = links.into_iter().rev().collect();
        assert_eq!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn png_sibling_replaces_svg() {
        let mut item = sample();
        item.add_attachment(svg("__C2P__diagram", AttachmentKind::Diagram));
        let svg_only = item.attachment_digests();

        item.add_attachment(png("__C2P__diagram"));
        let with_png = item.attachment_digests();

        assert_eq!(with_png.len(), 1);
        assert_ne!(svg_only["__C2P__diagram"], with_png["__C2P__diagram"]);
    }

    #[test]
    fn context_diagram_keeps_svg_digest() {
        let mut item = sample();
        item.add_attachment(svg("__C2P__context", AttachmentKind::ContextDiagram));
        let svg_only = item.attachment_digests();

        item.add_attachment(png("__C2P__context"));
        assert_eq!(svg_only, item.attachment_digests());
    }

    #[test]
    fn encoded_checksum_round_trips_through_parse() {
        let mut item = sample();
        item.add_attachment(svg("__C2P__diagram", AttachmentKind::Diagram));
        let checksum = item.calculate_checksum();

        let parts = ChecksumParts::parse(Some(&checksum));
        assert_eq!(parts.content, item.content_digest());
        assert_eq!(parts.attachments.len(), 1);
        assert_eq!(parts.encode(), checksum);
    }

    #[test]
    fn legacy_checksum_is_bare_content_digest() {
        let parts = ChecksumParts::parse(Some("abc123"));
        assert_eq!(parts.content, "abc123");
        assert!(parts.attachments.is_empty());
        assert_eq!(ChecksumParts::parse(None), ChecksumParts::default());
    }
}
