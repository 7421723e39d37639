//! Document configuration (YAML).
//!
//! ```yaml
//! full_authority:
//!   - template_directory: templates
//!     template: overview.html.j2
//!     heading_numbering: true
//!     work_item_layouts:
//!       componentExchange: {show_description: false}
//!     instances:
//!       - polarion_space: _default
//!         polarion_name: Overview
//!         params: {root: 2a3d...}
//! mixed_authority:
//!   - template_directory: templates
//!     sections:
//!       functions: functions.html.j2
//!     instances:
//!       - polarion_space: _default
//!         polarion_name: Functions
//!         section_params:
//!           functions: {layer: sa}
//! ```
//!
//! A top-level list is read as a list of full authority configs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::DocumentError;
use super::text_items::{TEXT_WORK_ITEM_ID_FIELD, TEXT_WORK_ITEM_TYPE};
use crate::model::RenderingLayout;

/// Presentation of one work item type inside documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkItemLayout {
    pub show_description: bool,
    pub show_title: bool,
}

impl Default for WorkItemLayout {
    fn default() -> Self {
        Self {
            show_description: true,
            show_title: true,
        }
    }
}

/// One document rendered from a config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentInstance {
    pub polarion_space: String,
    pub polarion_name: String,
    #[serde(default)]
    pub polarion_title: Option<String>,
    /// Template parameters shared by every section.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Per-section parameters of mixed authority documents.
    #[serde(default)]
    pub section_params: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Settings shared by both document flavours.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentSettings {
    pub template_directory: PathBuf,
    /// Target project; `None` is the project of the model.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Work item type of `<workitem>` blocks.
    #[serde(default = "default_text_work_item_type")]
    pub text_work_item_type: String,
    /// Custom field holding the template id of a text work item.
    #[serde(default = "default_text_work_item_id_field")]
    pub text_work_item_id_field: String,
    /// Documents in any other status are left alone.
    #[serde(default)]
    pub status_allow_list: Option<Vec<String>>,
    #[serde(default)]
    pub heading_numbering: bool,
    #[serde(default)]
    pub work_item_layouts: BTreeMap<String, WorkItemLayout>,
    #[serde(default)]
    pub instances: Vec<DocumentInstance>,
}

fn default_text_work_item_type() -> String {
    TEXT_WORK_ITEM_TYPE.to_string()
}

fn default_text_work_item_id_field() -> String {
    TEXT_WORK_ITEM_ID_FIELD.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FullAuthorityConfig {
    #[serde(flatten)]
    pub settings: DocumentSettings,
    pub template: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MixedAuthorityConfig {
    #[serde(flatten)]
    pub settings: DocumentSettings,
    /// Area id -> template.
    pub sections: BTreeMap<String, PathBuf>,
}

/// Address of a configured document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DocumentInfo {
    pub project_id: Option<String>,
    pub space: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocumentConfigs {
    #[serde(default)]
    pub full_authority: Vec<FullAuthorityConfig>,
    #[serde(default)]
    pub mixed_authority: Vec<MixedAuthorityConfig>,
}

impl DocumentConfigs {
    /// # Errors
    ///
    /// Returns [`DocumentError::Config`] for malformed YAML.
    pub fn from_yaml_str(text: &str) -> Result<Self, DocumentError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)?;
        match raw {
            serde_yaml::Value::Null => Ok(Self::default()),
            serde_yaml::Value::Sequence(_) => Ok(Self {
                full_authority: serde_yaml::from_value(raw)?,
                mixed_authority: Vec::new(),
            }),
            other => Ok(serde_yaml::from_value(other)?),
        }
    }

    /// # Errors
    ///
    /// Returns [`DocumentError::Io`] or [`DocumentError::Config`].
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let text = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Settings of every config, full authority first.
    pub fn settings(&self) -> impl Iterator<Item = &DocumentSettings> {
        self.full_authority
            .iter()
            .map(|c| &c.settings)
            .chain(self.mixed_authority.iter().map(|c| &c.settings))
    }

    /// Every configured document, full authority first.
    #[must_use]
    pub fn iterate_documents(&self) -> Vec<DocumentInfo> {
        self.settings()
            .flat_map(|settings| {
                settings.instances.iter().map(|instance| DocumentInfo {
                    project_id: settings.project_id.clone(),
                    space: instance.polarion_space.clone(),
                    name: instance.polarion_name.clone(),
                })
            })
            .collect()
    }

    /// Distinct target projects; `None` stands for the model project.
    #[must_use]
    pub fn projects(&self) -> BTreeSet<Option<String>> {
        self.iterate_documents().into_iter().map(|info| info.project_id).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.full_authority.is_empty() && self.mixed_authority.is_empty()
    }
}

impl DocumentSettings {
    /// Rendering layouts derived from `work_item_layouts`.
    #[must_use]
    pub fn rendering_layouts(&self) -> Vec<RenderingLayout> {
        self.work_item_layouts
            .iter()
            .map(|(item_type, layout)| {
                let layouter = match (layout.show_title, layout.show_description) {
                    (true, true) => "section",
                    (false, true) => "paragraph",
                    (show_title, false) => {
                        if !show_title {
                            warn!(
                                work_item_type = %item_type,
                                "Either the title or the description must be shown, showing the title"
                            );
                        }
                        "title"
                    }
                };
                let mut rendering = RenderingLayout::new(item_type.clone(), layouter);
                rendering.label = Some(camel_case_to_words(item_type));
                rendering
            })
            .collect()
    }
}

/// `componentExchange` -> `Component Exchange`.
#[must_use]
pub fn camel_case_to_words(name: &str) -> String {
    let mut words = String::with_capacity(name.len() + 4);
    for (idx, ch) in name.chars().enumerate() {
        if idx == 0 {
            words.extend(ch.to_uppercase());
        } else {
            if ch.is_uppercase() {
                words.push(' ');
            }
            words.push(ch);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r"
full_authority:
  - template_directory: templates
    template: overview.html.j2
    heading_numbering: true
    work_item_layouts:
      componentExchange:
        show_description: false
      systemFunction:
        show_title: false
    instances:
      - polarion_space: _default
        polarion_name: Overview
        polarion_title: System Overview
        params:
          root: uuid-1
mixed_authority:
  - template_directory: templates
    project_id: OTHER
    status_allow_list: [draft]
    sections:
      functions: functions.html.j2
    instances:
      - polarion_space: _default
        polarion_name: Functions
        section_params:
          functions:
            layer: sa
";

    #[test]
    fn parses_both_flavours() {
        let configs = DocumentConfigs::from_yaml_str(CONFIG).expect("valid config");
        assert_eq!(configs.full_authority.len(), 1);
        assert_eq!(configs.mixed_authority.len(), 1);

        let full = &configs.full_authority[0];
        assert_eq!(full.template, PathBuf::from("overview.html.j2"));
        assert!(full.settings.heading_numbering);
        assert_eq!(full.settings.instances[0].params["root"], Value::from("uuid-1"));

        let mixed = &configs.mixed_authority[0];
        assert_eq!(mixed.settings.project_id.as_deref(), Some("OTHER"));
        assert_eq!(mixed.settings.instances[0].section_params["functions"]["layer"], "sa");
    }

    #[test]
    fn bare_list_is_full_authority() {
        let configs = DocumentConfigs::from_yaml_str(
            "- template_directory: t\n  template: a.j2\n  instances:\n    - {polarion_space: s, polarion_name: n}\n",
        )
        .expect("valid config");
        assert_eq!(configs.full_authority.len(), 1);
        assert!(configs.mixed_authority.is_empty());
        let settings = &configs.full_authority[0].settings;
        assert_eq!(settings.text_work_item_type, "text");
        assert_eq!(settings.text_work_item_id_field, "__C2P__id");
        assert_eq!(
            configs.iterate_documents(),
            vec![DocumentInfo {
                project_id: None,
                space: "s".to_string(),
                name: "n".to_string(),
            }]
        );
    }

    #[test]
    fn projects_are_distinct() {
        let configs = DocumentConfigs::from_yaml_str(CONFIG).expect("valid config");
        let projects: Vec<_> = configs.projects().into_iter().collect();
        assert_eq!(projects, vec![None, Some("OTHER".to_string())]);
    }

    #[test]
    fn layouts_follow_visibility() {
        let configs = DocumentConfigs::from_yaml_str(CONFIG).expect("valid config");
        let layouts = configs.full_authority[0].settings.rendering_layouts();
        assert_eq!(layouts.len(), 2);
        assert_eq!(layouts[0].item_type, "componentExchange");
        assert_eq!(layouts[0].layouter, "title");
        assert_eq!(layouts[0].label.as_deref(), Some("Component Exchange"));
        assert_eq!(layouts[1].layouter, "paragraph");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(CONFIG.as_bytes()).expect("write config");
        let configs = DocumentConfigs::from_path(file.path()).expect("valid config");
        assert_eq!(configs.iterate_documents().len(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DocumentConfigs::from_path(Path::new("/nonexistent/docs.yaml")).expect_err("missing");
        assert!(matches!(err, DocumentError::Io { .. }));
    }

    #[test]
    fn words_from_camel_case() {
        assert_eq!(camel_case_to_words("physicalComponent"), "Physical Component");
        assert_eq!(camel_case_to_words("class"), "Class");
    }
}
