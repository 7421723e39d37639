//! Model elements to work items.
//!
//! [`ModelConverter::read_model`] selects the elements the type rules
//! configure and keeps one [`ConverterData`] per element. Work items are
//! then produced in two passes: without links (to create missing items and
//! learn their ids) and with links and grouped link fields (to patch).

pub mod element;
pub mod html;
pub mod links;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::config::{DIAGRAM_TYPE, SyncSettings, TypeConfig, TypeRules};
use crate::context::RunContext;
use crate::error::ErrorCode;
use crate::identity::IdentityRepository;
use crate::model::WorkItem;
use crate::source::{ModelError, ModelSource};
use crate::template::{TemplateError, TemplateStore};

pub use element::ElementSerializer;
pub use links::LinkSerializer;

/// Why a serialization step failed.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// The element type lacks an attribute the step requires.
    #[error("Missing {0} Attribute")]
    MissingAttribute(&'static str),

    /// The step does not apply to this kind of object.
    #[error("{step} requires {expected}")]
    WrongObject {
        step: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl SerializeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Model(err) => err.code(),
            Self::Template(err) => err.code(),
            Self::MissingAttribute(_) | Self::WrongObject { .. } => ErrorCode::SerializationFailed,
        }
    }
}

/// Everything known about one element during a run.
#[derive(Debug, Clone)]
pub struct ConverterData {
    pub layer: String,
    pub c_type: String,
    pub type_config: TypeConfig,
    /// `None` until serialized, and after a failed serialization.
    pub work_item: Option<WorkItem>,
    /// Elements referenced from the description, in order of appearance.
    pub description_references: Vec<String>,
    /// Content errors of the last serialization.
    pub errors: BTreeSet<String>,
    /// Link errors of the last link generation.
    pub link_errors: Vec<String>,
}

impl ConverterData {
    #[must_use]
    pub fn new(layer: impl Into<String>, c_type: impl Into<String>, type_config: TypeConfig) -> Self {
        Self {
            layer: layer.into(),
            c_type: c_type.into(),
            type_config,
            work_item: None,
            description_references: Vec::new(),
            errors: BTreeSet::new(),
            link_errors: Vec::new(),
        }
    }
}

/// Converter state of a run, keyed by element id.
pub type ConverterSession = BTreeMap<String, ConverterData>;

/// Switches of work item generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub generate_links: bool,
    pub generate_attachments: bool,
    pub generate_grouped_links: bool,
    pub generate_figure_captions: bool,
    /// Worker threads for link generation; `1` disables the pool.
    pub max_workers: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for ConvertOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            generate_links: settings.generate_links,
            generate_attachments: settings.generate_attachments,
            generate_grouped_links: settings.generate_grouped_links,
            generate_figure_captions: settings.generate_figure_captions,
            max_workers: settings.max_workers,
        }
    }
}

/// Drives element and link serialization over a model.
pub struct ModelConverter<'m> {
    model: &'m dyn ModelSource,
    project_id: String,
    templates: TemplateStore,
    session: ConverterSession,
    ctx: RunContext,
}

impl<'m> ModelConverter<'m> {
    pub fn new(model: &'m dyn ModelSource, project_id: impl Into<String>, ctx: RunContext) -> Self {
        Self {
            model,
            project_id: project_id.into(),
            templates: TemplateStore::new(),
            session: ConverterSession::new(),
            ctx,
        }
    }

    #[must_use]
    pub const fn session(&self) -> &ConverterSession {
        &self.session
    }

    /// Select every configured element and diagram of the model.
    ///
    /// Elements whose traits match no entry are skipped with a warning.
    pub fn read_model(&mut self, rules: &TypeRules) {
        let _span = self.ctx.span().enter();
        let mut missing: BTreeSet<(String, String, String)> = BTreeSet::new();
        for (layer, c_type) in rules.layers_and_types() {
            if c_type == DIAGRAM_TYPE {
                continue;
            }
            for element in self.model.search(&layer, &c_type) {
                let traits = element.traits();
                match rules.get_type_config(&layer, &c_type, &traits) {
                    Some(config) => {
                        self.session
                            .insert(element.uuid.clone(), ConverterData::new(&layer, &c_type, config));
                    }
                    None => {
                        missing.insert((layer.clone(), c_type.clone(), format!("{traits:?}")));
                    }
                }
            }
        }

        if let Some(config) = rules.diagram_config() {
            for diagram in self.model.diagrams() {
                self.session.insert(
                    diagram.uuid.clone(),
                    ConverterData::new(&diagram.layer, DIAGRAM_TYPE, config.clone()),
                );
            }
        }

        for (layer, c_type, traits) in missing {
            warn!(%layer, %c_type, %traits, "type is configured in layer, but not for these traits");
        }
        info!(elements = self.session.len(), "model read");
    }

    /// Serialize every element; with `generate_links` also links and
    /// grouped link fields.
    ///
    /// Returns the produced work items keyed by element id. Failed elements
    /// are absent and keep their errors in the session.
    pub fn generate_work_items(
        &mut self,
        repo: &IdentityRepository,
        options: &ConvertOptions,
    ) -> BTreeMap<String, WorkItem> {
        let serializer = ElementSerializer::new(
            self.model,
            repo,
            &self.templates,
            options.generate_attachments,
            options.generate_figure_captions,
        );
        self.ctx.in_scope(|| {
            for (uuid, data) in &mut self.session {
                serializer.serialize(uuid, data);
            }
        });

        if options.generate_links {
            self.generate_work_item_links(repo, options);
        }

        self.session
            .iter()
            .filter_map(|(uuid, data)| data.work_item.clone().map(|item| (uuid.clone(), item)))
            .collect()
    }

    /// Links, forward fields and reverse fields for every serialized item.
    ///
    /// Runs the three phases on the worker pool when more than one worker
    /// is configured and falls back to sequential generation if a worker
    /// dies.
    pub fn generate_work_item_links(&mut self, repo: &IdentityRepository, options: &ConvertOptions) {
        let serializer = LinkSerializer::new(repo, self.model, &self.project_id);
        let grouped = options.generate_grouped_links;
        if options.max_workers > 1 {
            match links::generate_parallel(&self.ctx, &serializer, &mut self.session, grouped, options.max_workers) {
                Ok(()) => {
                    info!("completed parallel link generation");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "parallel link generation failed, falling back to sequential processing");
                }
            }
        }
        self.ctx
            .in_scope(|| links::generate_sequential(&serializer, &mut self.session, grouped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SnapshotModel;

    const RULES: &str = r#"
"*":
  "*":
    links: [parent]
  Diagram:
    polarion_type: diagram
oa:
  Entity:
    - is_actor: true
      polarion_type: actor
sa:
  Class: {}
"#;

    const MODEL: &str = r#"{
        "elements": [
            {"uuid": "a1", "name": "Driver", "type": "Entity", "layer": "oa",
             "attributes": {"is_actor": true}},
            {"uuid": "e1", "name": "Road", "type": "Entity", "layer": "oa",
             "attributes": {"is_actor": false}},
            {"uuid": "c1", "name": "Door", "type": "Class", "layer": "sa",
             "attributes": {"parent": null}},
            {"uuid": "c2", "name": "Lock", "type": "Class", "layer": "sa",
             "attributes": {"parent": {"ref": "c1"}}}
        ],
        "diagrams": [{"uuid": "d1", "name": "Overview", "layer": "sa"}]
    }"#;

    fn rules() -> TypeRules {
        TypeRules::from_yaml_str(RULES, "", "").expect("valid rules")
    }

    #[test]
    fn read_model_selects_configured_elements() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let mut converter = ModelConverter::new(&model, "PROJ", RunContext::detached());
        converter.read_model(&rules());

        let session = converter.session();
        assert_eq!(session["a1"].type_config.p_type, "actor");
        assert_eq!(session["c1"].type_config.p_type, "class");
        assert_eq!(session["d1"].c_type, DIAGRAM_TYPE);
        assert_eq!(session["e1"].type_config.p_type, "entity", "falls back to the default entry");
    }

    #[test]
    fn two_pass_generation_links_known_items() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let mut converter = ModelConverter::new(&model, "PROJ", RunContext::detached());
        converter.read_model(&rules());

        let options = ConvertOptions {
            generate_links: false,
            generate_attachments: false,
            ..ConvertOptions::default()
        };
        let first = converter.generate_work_items(&IdentityRepository::new(), &options);
        assert!(first.values().all(|item| item.id.is_none() && item.linked_items.is_empty()));

        let repo = IdentityRepository::from_items(
            first
                .values()
                .enumerate()
                .map(|(n, item)| item.clone().with_id(format!("P-{n}"))),
        )
        .expect("ids assigned");
        for workers in [1, 4] {
            let options = ConvertOptions {
                generate_links: true,
                max_workers: workers,
                ..options
            };
            let second = converter.generate_work_items(&repo, &options);
            let lock = &second["c2"];
            assert_eq!(lock.linked_items.len(), 1);
            assert_eq!(
                Some(lock.linked_items[0].secondary_id.as_str()),
                repo.lookup_remote_id("c1")
            );
            assert!(lock.additional_attributes.contains_key("parent"));
            assert!(second["c1"].additional_attributes.contains_key("parent_reverse"));
        }
    }
}
