//! Free text work items declared by document templates.
//!
//! A template writes `<workitem id="intro"><p>Some text</p></workitem>`.
//! Every such block becomes a work item of the configured text type whose
//! description is the inner HTML. The template id is stored in a custom
//! field, so re-rendering updates the same work item instead of creating
//! a new one. On push the blocks are replaced by embedded work items.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use super::DocumentError;
use crate::convert::html::{WI_ID_PREFIX, work_item_document};
use crate::model::{AttributeValue, Document, STATUS_OPEN, TextContent, WorkItem, layout_index};
use crate::tracker::TrackerClient;

/// Default work item type of text work items.
pub const TEXT_WORK_ITEM_TYPE: &str = "text";
/// Default custom field holding the template id of a text work item.
pub const TEXT_WORK_ITEM_ID_FIELD: &str = "__C2P__id";

static WORK_ITEM_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<workitem\b([^>]*)>(.*?)</workitem>").expect("workitem pattern is valid")
});

static ID_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bid\s*=\s*"([^"]*)""#).expect("id pattern is valid"));

static EMBEDDED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{}([^|\x22]+)", regex::escape(WI_ID_PREFIX))).expect("embedded pattern is valid")
});

/// Remote ids of all work items embedded into `html`, in order.
#[must_use]
pub fn embedded_work_item_ids(html: &str) -> Vec<String> {
    EMBEDDED_ID
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Text work items of one document: the ones found on the tracker and
/// the ones generated from the rendered content.
#[derive(Debug, Clone)]
pub struct TextWorkItems {
    id_field: String,
    work_item_type: String,
    existing: BTreeMap<String, WorkItem>,
    generated: BTreeMap<String, WorkItem>,
}

impl Default for TextWorkItems {
    fn default() -> Self {
        Self {
            id_field: TEXT_WORK_ITEM_ID_FIELD.to_string(),
            work_item_type: TEXT_WORK_ITEM_TYPE.to_string(),
            existing: BTreeMap::new(),
            generated: BTreeMap::new(),
        }
    }
}

impl TextWorkItems {
    /// Index `existing` by their template id. Work items without one are
    /// not ours and are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::TextWorkItem`] if two work items claim the
    /// same template id.
    pub fn new(
        id_field: impl Into<String>,
        work_item_type: impl Into<String>,
        existing: impl IntoIterator<Item = WorkItem>,
    ) -> Result<Self, DocumentError> {
        let id_field = id_field.into();
        let mut by_text_id = BTreeMap::new();
        for item in existing {
            let Some(text_id) = item
                .additional_attributes
                .get(&id_field)
                .and_then(AttributeValue::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            if by_text_id.insert(text_id.clone(), item).is_some() {
                return Err(DocumentError::TextWorkItem(format!(
                    "There are multiple text work items with {id_field} == {text_id}"
                )));
            }
        }
        Ok(Self {
            id_field,
            work_item_type: work_item_type.into(),
            existing: by_text_id,
            generated: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generated.is_empty()
    }

    /// Generated work items by template id.
    #[must_use]
    pub const fn generated(&self) -> &BTreeMap<String, WorkItem> {
        &self.generated
    }

    /// Generate a work item for every `<workitem>` block of `html`.
    ///
    /// An existing work item is reused when its template id matches and,
    /// if `allowed` is given, its remote id is in `allowed`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::TextWorkItem`] for a block without an id.
    pub fn generate(&mut self, html: &str, allowed: Option<&[String]>) -> Result<(), DocumentError> {
        for caps in WORK_ITEM_TAG.captures_iter(html) {
            let text_id = caps
                .get(1)
                .and_then(|attrs| ID_ATTR.captures(attrs.as_str()))
                .and_then(|id| id.get(1))
                .map(|id| id.as_str())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| DocumentError::TextWorkItem("All work items must have an ID in template".to_string()))?;
            let inner = caps.get(2).map_or("", |m| m.as_str());

            let reusable = self.existing.get(text_id).filter(|item| {
                allowed.is_none_or(|ids| item.id.as_ref().is_some_and(|id| ids.contains(id)))
            });
            let mut item = reusable.cloned().unwrap_or_else(|| WorkItem {
                work_item_type: Some(self.work_item_type.clone()),
                title: Some(String::new()),
                status: Some(STATUS_OPEN.to_string()),
                additional_attributes: BTreeMap::from([(self.id_field.clone(), AttributeValue::from(text_id))]),
                ..WorkItem::default()
            });
            item.description = Some(TextContent::html(inner));
            self.generated.insert(text_id.to_string(), item);
        }
        Ok(())
    }

    /// Create the generated work items that have no remote id yet and
    /// update the others.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Api`] on the first failed request.
    pub fn push(&mut self, client: &dyn TrackerClient) -> Result<(), DocumentError> {
        let mut new_ids = Vec::new();
        let mut known_ids = Vec::new();
        for (text_id, item) in &self.generated {
            if item.id.is_none() {
                new_ids.push(text_id.clone());
            } else {
                known_ids.push(text_id.clone());
            }
        }

        if !new_ids.is_empty() {
            let mut created: Vec<WorkItem> = new_ids.iter().filter_map(|id| self.generated.get(id).cloned()).collect();
            info!(count = created.len(), "Creating text work items");
            client
                .create_work_items(&mut created)
                .map_err(DocumentError::api("create text work items"))?;
            for (text_id, item) in new_ids.into_iter().zip(created) {
                self.generated.insert(text_id, item);
            }
        }

        let updates: Vec<WorkItem> = known_ids
            .iter()
            .filter_map(|id| self.generated.get(id))
            .map(|item| WorkItem {
                id: item.id.clone(),
                description: item.description.clone(),
                ..WorkItem::default()
            })
            .collect();
        if !updates.is_empty() {
            debug!(count = updates.len(), "Updating text work items");
            client
                .update_work_items(&updates)
                .map_err(DocumentError::api("update text work items"))?;
        }
        Ok(())
    }

    /// Replace the `<workitem>` blocks of `document` by the generated work
    /// items. Blocks without a pushed work item are dropped.
    pub fn insert_into(&self, document: &mut Document) {
        let Some(content) = document.home_page_content.as_mut() else {
            return;
        };
        if !WORK_ITEM_TAG.is_match(&content.value) {
            return;
        }
        let layout = layout_index(&mut document.rendering_layouts, "paragraph", &self.work_item_type);
        content.value = WORK_ITEM_TAG
            .replace_all(&content.value, |caps: &regex::Captures<'_>| {
                caps.get(1)
                    .and_then(|attrs| ID_ATTR.captures(attrs.as_str()))
                    .and_then(|id| id.get(1))
                    .and_then(|id| self.generated.get(id.as_str()))
                    .and_then(|item| item.id.as_deref())
                    .map(|pid| work_item_document(pid, layout, "", None))
                    .unwrap_or_default()
            })
            .into_owned();
    }
}

/// Fetch the text work items embedded into `document` whose type is
/// `work_item_type`.
///
/// # Errors
///
/// Returns [`DocumentError::Api`] on the first failed request.
pub fn fetch_embedded_text_work_items(
    client: &dyn TrackerClient,
    document: &Document,
    work_item_type: &str,
) -> Result<Vec<WorkItem>, DocumentError> {
    let Some(content) = document.home_page_content.as_ref() else {
        return Ok(Vec::new());
    };
    let mut items = Vec::new();
    for id in embedded_work_item_ids(&content.value) {
        if let Some(item) = client
            .get_work_item(&id)
            .map_err(DocumentError::api("get text work item"))?
            && item.work_item_type.as_deref() == Some(work_item_type)
        {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::memory::{MemoryTracker, Operation};

    const CONTENT: &str = r#"<h1>Intro</h1>
<workitem id="id1"><p>first</p></workitem>
<workitem id="id2">second <b>bold</b></workitem>"#;

    fn existing(id: &str, text_id: &str) -> WorkItem {
        let mut item = WorkItem::new("", "MyType", "").with_id(id);
        item.additional_attributes
            .insert("MyField".to_string(), AttributeValue::from(text_id));
        item
    }

    #[test]
    fn blocks_reuse_existing_items_by_text_id() {
        let mut items = TextWorkItems::new("MyField", "MyType", [existing("EXISTING", "id1")]).expect("unique ids");
        items.generate(CONTENT, None).expect("ids present");

        let generated = items.generated();
        assert_eq!(generated.len(), 2);
        assert_eq!(generated["id1"].id.as_deref(), Some("EXISTING"));
        assert_eq!(generated["id1"].description.as_ref().map(|d| d.value.as_str()), Some("<p>first</p>"));
        assert!(generated["id2"].id.is_none());
        assert_eq!(generated["id2"].work_item_type.as_deref(), Some("MyType"));
        assert_eq!(
            generated["id2"].additional_attributes.get("MyField"),
            Some(&AttributeValue::from("id2"))
        );
        assert_eq!(
            generated["id2"].description.as_ref().map(|d| d.value.as_str()),
            Some("second <b>bold</b>")
        );
    }

    #[test]
    fn items_outside_the_allowed_ids_are_not_reused() {
        let mut items = TextWorkItems::new("MyField", "MyType", [existing("EXISTING", "id1")]).expect("unique ids");
        items.generate(CONTENT, Some(&["OTHER".to_string()])).expect("ids present");
        assert!(items.generated()["id1"].id.is_none());
    }

    #[test]
    fn blocks_need_an_id() {
        let mut items = TextWorkItems::default();
        let err = items.generate("<workitem><p>x</p></workitem>", None).expect_err("missing id");
        assert!(err.to_string().contains("must have an ID"));
    }

    #[test]
    fn duplicate_text_ids_are_rejected() {
        let err = TextWorkItems::new("MyField", "MyType", [existing("A", "id1"), existing("B", "id1")])
            .expect_err("duplicate text ids");
        assert!(matches!(err, DocumentError::TextWorkItem(_)));
    }

    #[test]
    fn push_creates_missing_and_updates_known_items() {
        let tracker = MemoryTracker::new("PROJ");
        tracker.insert_work_item(existing("EXISTING", "id1"));
        let mut items = TextWorkItems::new("MyField", "MyType", [existing("EXISTING", "id1")]).expect("unique ids");
        items.generate(CONTENT, None).expect("ids present");
        tracker.clear_calls();

        items.push(&tracker).expect("pushed");
        assert_eq!(tracker.count(Operation::CreateWorkItems), 1);
        assert_eq!(tracker.calls_of(Operation::CreateWorkItems)[0].items.len(), 1);
        assert_eq!(tracker.count(Operation::UpdateWorkItems), 1);
        let updated = tracker.work_item("EXISTING").expect("still there");
        assert_eq!(updated.description.map(|d| d.value), Some("<p>first</p>".to_string()));

        let mut document = Document::new("_default", "TEST-DOC");
        document.home_page_content = Some(TextContent::html(CONTENT));
        items.insert_into(&mut document);
        let content = document.home_page_content.expect("content").value;
        let new_id = items.generated()["id2"].id.clone().expect("created");
        assert!(content.starts_with("<h1>Intro</h1>"));
        assert!(!content.contains("<workitem"));
        assert!(content.contains(&work_item_document("EXISTING", 0, "", None)));
        assert!(content.ends_with(&work_item_document(&new_id, 0, "", None)));
        assert_eq!(document.rendering_layouts[0].item_type, "MyType");
        assert_eq!(document.rendering_layouts[0].layouter, "paragraph");
        assert_eq!(embedded_work_item_ids(&content), vec!["EXISTING".to_string(), new_id]);
    }

    #[test]
    fn embedded_items_are_filtered_by_type() {
        let tracker = MemoryTracker::new("PROJ");
        tracker.insert_work_item(existing("T-1", "id1"));
        tracker.insert_work_item(WorkItem::new("uuid-1", "class", "Door").with_id("C-1"));
        let mut document = Document::new("_default", "TEST-DOC");
        document.home_page_content = Some(TextContent::html(format!(
            "{}{}",
            work_item_document("C-1", 0, "", None),
            work_item_document("T-1", 1, "", None)
        )));

        let items = fetch_embedded_text_work_items(&tracker, &document, "MyType").expect("fetched");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("T-1"));
    }
}
