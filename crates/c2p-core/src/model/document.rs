use serde::{Deserialize, Serialize};

use super::work_item::TextContent;

/// How the tracker lays out work items of one type inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingLayout {
    /// Work item type the layout applies to.
    #[serde(rename = "type")]
    pub item_type: String,
    /// `paragraph` or `section`.
    pub layouter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl RenderingLayout {
    #[must_use]
    pub fn new(item_type: impl Into<String>, layouter: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            layouter: layouter.into(),
            label: None,
        }
    }
}

/// Index of the layout for `item_type`, appending a new one if needed.
pub fn layout_index(layouts: &mut Vec<RenderingLayout>, layouter: &str, item_type: &str) -> usize {
    if let Some(idx) = layouts.iter().position(|l| l.item_type == item_type) {
        return idx;
    }
    layouts.push(RenderingLayout::new(item_type, layouter));
    layouts.len() - 1
}

/// A tracker document (live document), addressed by space and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub module_folder: String,
    pub module_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub document_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub home_page_content: Option<TextContent>,
    #[serde(default)]
    pub rendering_layouts: Vec<RenderingLayout>,
    #[serde(default)]
    pub outline_numbering: Option<bool>,
}

impl Document {
    #[must_use]
    pub fn new(module_folder: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            module_folder: module_folder.into(),
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    /// `space/name`, used in logs and as the in-memory key.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.module_folder, self.module_name)
    }
}
