//! Rendering every configured document and pushing the results.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use super::DocumentError;
use super::areas::extract_areas;
use super::config::{DocumentConfigs, DocumentInfo, DocumentInstance, DocumentSettings};
use super::renderer::{DocumentRenderer, NewDocument, RenderedDocument};
use super::text_items::{TextWorkItems, embedded_work_item_ids, fetch_embedded_text_work_items};
use crate::model::{Document, WorkItem, layout_index};
use crate::tracker::TrackerClient;

/// Documents found on the tracker, by address.
pub type ExistingDocuments = BTreeMap<DocumentInfo, Document>;

/// Text work items embedded into existing documents, by address.
pub type ExistingTextWorkItems = BTreeMap<DocumentInfo, Vec<WorkItem>>;

/// Rendered documents of one target project.
#[derive(Debug, Clone, Default)]
pub struct ProjectDocuments {
    pub new_docs: Vec<RenderedDocument>,
    pub updated_docs: Vec<RenderedDocument>,
}

impl ProjectDocuments {
    /// Heading work items renamed by any of the documents.
    #[must_use]
    pub fn headings(&self) -> Vec<WorkItem> {
        self.new_docs
            .iter()
            .chain(&self.updated_docs)
            .flat_map(|rendered| rendered.headings.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_docs.is_empty() && self.updated_docs.is_empty()
    }
}

/// Result of rendering all configured documents.
#[derive(Debug, Default)]
pub struct RenderOutcome {
    /// Rendered documents per target project; `None` is the model project.
    pub projects: BTreeMap<Option<String>, ProjectDocuments>,
    /// Documents that failed to render; they are left untouched.
    pub failures: Vec<(DocumentInfo, DocumentError)>,
    /// Documents skipped because of their status.
    pub skipped: Vec<DocumentInfo>,
}

impl RenderOutcome {
    #[must_use]
    pub fn rendered_count(&self) -> usize {
        self.projects
            .values()
            .map(|docs| docs.new_docs.len() + docs.updated_docs.len())
            .sum()
    }
}

/// Fetch the existing counterpart of every document in `documents`.
///
/// # Errors
///
/// Returns [`DocumentError::Api`] on the first failed request.
pub fn fetch_existing_documents<'i>(
    client: &dyn TrackerClient,
    documents: impl IntoIterator<Item = &'i DocumentInfo>,
) -> Result<ExistingDocuments, DocumentError> {
    let mut existing = ExistingDocuments::new();
    for info in documents {
        if let Some(document) = client
            .get_document(&info.space, &info.name)
            .map_err(DocumentError::api("get document"))?
        {
            existing.insert(info.clone(), document);
        }
    }
    Ok(existing)
}

/// Fetch the text work items embedded into the existing documents of
/// `configs`, keeping those of the configured text type.
///
/// # Errors
///
/// Returns [`DocumentError::Api`] on the first failed request.
pub fn fetch_text_work_items(
    client: &dyn TrackerClient,
    configs: &DocumentConfigs,
    existing: &ExistingDocuments,
) -> Result<ExistingTextWorkItems, DocumentError> {
    let mut found = ExistingTextWorkItems::new();
    for settings in configs.settings() {
        for instance in &settings.instances {
            let info = info_of(settings, instance);
            let Some(document) = existing.get(&info) else {
                continue;
            };
            let items = fetch_embedded_text_work_items(client, document, &settings.text_work_item_type)?;
            if !items.is_empty() {
                found.insert(info, items);
            }
        }
    }
    Ok(found)
}

/// Push the text work items of `rendered` and return its document with
/// the `<workitem>` blocks replaced.
fn embed_text_work_items(client: &dyn TrackerClient, rendered: &RenderedDocument) -> Result<Document, DocumentError> {
    let mut document = rendered.document.clone();
    if !rendered.text_work_items.is_empty() {
        let mut items = rendered.text_work_items.clone();
        items.push(client)?;
        items.insert_into(&mut document);
    }
    Ok(document)
}

/// Create new documents, update changed ones and rename reused headings.
///
/// Text work items are created or updated first so that the documents can
/// embed them.
///
/// # Errors
///
/// Returns [`DocumentError::Api`] on the first failed request.
pub fn push_documents(client: &dyn TrackerClient, documents: &ProjectDocuments) -> Result<(), DocumentError> {
    if !documents.new_docs.is_empty() {
        let new = documents
            .new_docs
            .iter()
            .map(|rendered| embed_text_work_items(client, rendered))
            .collect::<Result<Vec<_>, _>>()?;
        info!(project = client.project_id(), count = new.len(), "Creating documents");
        client
            .create_documents(&new)
            .map_err(DocumentError::api("create documents"))?;
    }
    if !documents.updated_docs.is_empty() {
        let updated = documents
            .updated_docs
            .iter()
            .map(|rendered| embed_text_work_items(client, rendered))
            .collect::<Result<Vec<_>, _>>()?;
        info!(project = client.project_id(), count = updated.len(), "Updating documents");
        client
            .update_documents(&updated)
            .map_err(DocumentError::api("update documents"))?;
    }
    let headings = documents.headings();
    if !headings.is_empty() {
        client
            .update_work_items(&headings)
            .map_err(DocumentError::api("update headings"))?;
    }
    Ok(())
}

/// Renders every document of a [`DocumentConfigs`].
pub struct MassDocumentRenderer<'a> {
    renderer: DocumentRenderer<'a>,
    overwrite_layouts: bool,
    overwrite_heading_numbering: bool,
    text_work_items: ExistingTextWorkItems,
}

impl<'a> MassDocumentRenderer<'a> {
    /// With `overwrite_layouts` and `overwrite_heading_numbering` the
    /// configured values replace those of existing documents.
    #[must_use]
    pub const fn new(renderer: DocumentRenderer<'a>, overwrite_layouts: bool, overwrite_heading_numbering: bool) -> Self {
        Self {
            renderer,
            overwrite_layouts,
            overwrite_heading_numbering,
            text_work_items: ExistingTextWorkItems::new(),
        }
    }

    /// Reuse these text work items instead of creating new ones.
    #[must_use]
    pub fn with_text_work_items(mut self, text_work_items: ExistingTextWorkItems) -> Self {
        self.text_work_items = text_work_items;
        self
    }

    /// Render all documents. A failing document is logged and skipped.
    #[must_use]
    pub fn render_documents(&self, configs: &DocumentConfigs, existing: &ExistingDocuments) -> RenderOutcome {
        let mut outcome = RenderOutcome::default();
        for config in &configs.full_authority {
            let settings = &config.settings;
            for instance in &settings.instances {
                let info = info_of(settings, instance);
                let Some(old) = self.prepare_existing(settings, instance, &info, existing, &mut outcome) else {
                    continue;
                };
                let project = settings.project_id.as_deref();
                let rendered = match old {
                    Some(document) => self
                        .renderer
                        .render_full(&settings.template_directory, &config.template, document, &instance.params, project)
                        .map(|r| (false, r)),
                    None => self
                        .renderer
                        .render_new(
                            &settings.template_directory,
                            &config.template,
                            NewDocument {
                                space: instance.polarion_space.clone(),
                                name: instance.polarion_name.clone(),
                                title: instance.polarion_title.clone(),
                                heading_numbering: settings.heading_numbering,
                                rendering_layouts: settings.rendering_layouts(),
                            },
                            &instance.params,
                            project,
                        )
                        .map(|r| (true, r)),
                };
                let rendered = rendered.and_then(|(is_new, mut r)| {
                    self.generate_text_work_items(settings, &info, &mut r, None)?;
                    Ok((is_new, r))
                });
                record(&mut outcome, info, rendered);
            }
        }

        for config in &configs.mixed_authority {
            let settings = &config.settings;
            for instance in &settings.instances {
                let info = info_of(settings, instance);
                let Some(old) = self.prepare_existing(settings, instance, &info, existing, &mut outcome) else {
                    continue;
                };
                let rendered = old
                    .ok_or_else(|| DocumentError::MissingContent(format!("{}/{}", info.space, info.name)))
                    .and_then(|document| {
                        let previous = document.home_page_content.as_ref().map(|c| c.value.clone());
                        let mut rendered = self.renderer.render_mixed(
                            &settings.template_directory,
                            &config.sections,
                            document,
                            &instance.params,
                            &instance.section_params,
                            settings.project_id.as_deref(),
                        )?;
                        self.generate_text_work_items(settings, &info, &mut rendered, previous.as_deref())?;
                        Ok((false, rendered))
                    });
                record(&mut outcome, info, rendered);
            }
        }
        outcome
    }

    /// Collect the `<workitem>` blocks of `rendered`.
    ///
    /// For a mixed authority document `previous` is the content before
    /// rendering; an existing text work item is only reused by the area
    /// that embedded it.
    fn generate_text_work_items(
        &self,
        settings: &DocumentSettings,
        info: &DocumentInfo,
        rendered: &mut RenderedDocument,
        previous: Option<&str>,
    ) -> Result<(), DocumentError> {
        let mut items = TextWorkItems::new(
            settings.text_work_item_id_field.as_str(),
            settings.text_work_item_type.as_str(),
            self.text_work_items.get(info).cloned().unwrap_or_default(),
        )?;
        let content = rendered
            .document
            .home_page_content
            .as_ref()
            .map(|c| c.value.as_str())
            .unwrap_or_default();
        match previous {
            None => items.generate(content, None)?,
            Some(previous) => {
                let path = rendered.document.path();
                let old_areas = extract_areas(&path, previous)?;
                for area in extract_areas(&path, content)? {
                    let allowed = old_areas
                        .iter()
                        .find(|old| old.id == area.id)
                        .map(|old| embedded_work_item_ids(&previous[old.content()]))
                        .unwrap_or_default();
                    items.generate(&content[area.content()], Some(&allowed))?;
                }
            }
        }
        rendered.text_work_items = items;
        Ok(())
    }

    /// The customized existing document, `Some(None)` if there is none and
    /// `None` if the document must be skipped.
    fn prepare_existing(
        &self,
        settings: &DocumentSettings,
        instance: &DocumentInstance,
        info: &DocumentInfo,
        existing: &ExistingDocuments,
        outcome: &mut RenderOutcome,
    ) -> Option<Option<Document>> {
        let Some(mut document) = existing.get(info).cloned() else {
            return Some(None);
        };
        let status = document.status.take();
        if let Some(allowed) = &settings.status_allow_list
            && !status.as_ref().is_some_and(|s| allowed.contains(s))
        {
            warn!(
                document = %document.path(),
                status = status.as_deref().unwrap_or("-"),
                "Won't update document, its status is not in the allow list"
            );
            outcome.skipped.push(info.clone());
            return None;
        }

        if let Some(title) = &instance.polarion_title {
            document.title = Some(title.clone());
        }
        if self.overwrite_layouts {
            for layout in settings.rendering_layouts() {
                let idx = layout_index(&mut document.rendering_layouts, &layout.layouter, &layout.item_type);
                document.rendering_layouts[idx] = layout;
            }
        }
        if self.overwrite_heading_numbering {
            document.outline_numbering = Some(settings.heading_numbering);
        }
        Some(Some(document))
    }
}

fn info_of(settings: &DocumentSettings, instance: &DocumentInstance) -> DocumentInfo {
    DocumentInfo {
        project_id: settings.project_id.clone(),
        space: instance.polarion_space.clone(),
        name: instance.polarion_name.clone(),
    }
}

fn record(outcome: &mut RenderOutcome, info: DocumentInfo, rendered: Result<(bool, RenderedDocument), DocumentError>) {
    match rendered {
        Ok((is_new, rendered)) => {
            let project = outcome.projects.entry(info.project_id).or_default();
            if is_new {
                project.new_docs.push(rendered);
            } else {
                project.updated_docs.push(rendered);
            }
        }
        Err(err) => {
            error!(
                document = %format!("{}/{}", info.space, info.name),
                code = err.code().code(),
                error = %err,
                "Rendering document failed, skipping it"
            );
            outcome.failures.push((info, err));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::document::areas::{AREA_END_CLS, AREA_START_CLS, area_marker};
    use crate::identity::IdentityRepository;
    use crate::model::{RenderingLayout, TextContent};
    use crate::source::{Element, SnapshotModel};
    use crate::tracker::memory::{MemoryTracker, Operation};

    fn model() -> SnapshotModel {
        SnapshotModel::new(
            vec![Element {
                uuid: "uuid-1".to_string(),
                name: "Door".to_string(),
                type_name: "LogicalComponent".to_string(),
                layer: "la".to_string(),
                ..Element::default()
            }],
            Vec::new(),
        )
    }

    fn repo() -> IdentityRepository {
        IdentityRepository::from_items([WorkItem::new("uuid-1", "logicalComponent", "Door").with_id("P-1")])
            .expect("valid items")
    }

    fn configs(dir: &std::path::Path) -> DocumentConfigs {
        fs::write(dir.join("full.j2"), r#"{{ heading(1, "Overview") }}{{ insert_work_item(root) }}"#)
            .expect("write template");
        fs::write(dir.join("section.j2"), "<p>{{ text }}</p>").expect("write template");
        let dir = dir.display();
        DocumentConfigs::from_yaml_str(&format!(
            r"
full_authority:
  - template_directory: {dir}
    template: full.j2
    heading_numbering: true
    instances:
      - {{polarion_space: _default, polarion_name: New, params: {{root: uuid-1}}}}
      - {{polarion_space: _default, polarion_name: Existing, polarion_title: Renamed, params: {{root: uuid-1}}}}
mixed_authority:
  - template_directory: {dir}
    status_allow_list: [draft]
    sections:
      body: section.j2
    instances:
      - {{polarion_space: _default, polarion_name: Mixed, section_params: {{body: {{text: generated}}}}}}
      - {{polarion_space: _default, polarion_name: Released}}
      - {{polarion_space: _default, polarion_name: Absent}}
"
        ))
        .expect("valid config")
    }

    fn tracker() -> MemoryTracker {
        let tracker = MemoryTracker::new("PROJ");
        tracker.insert_work_item(WorkItem::new("h9", "heading", "Old heading").with_id("H-9"));
        let mut existing = Document::new("_default", "Existing");
        existing.title = Some("Old".to_string());
        existing.home_page_content = Some(TextContent::html(format!(
            r#"<h1 id="{}H-9"></h1>"#,
            crate::convert::html::WI_ID_PREFIX
        )));
        tracker.insert_document(existing);

        let mut mixed = Document::new("_default", "Mixed");
        mixed.status = Some("draft".to_string());
        mixed.home_page_content = Some(TextContent::html(format!(
            "<p>manual</p>{}<p>old</p>{}",
            area_marker(AREA_START_CLS, "body"),
            area_marker(AREA_END_CLS, "body")
        )));
        tracker.insert_document(mixed);

        let mut released = Document::new("_default", "Released");
        released.status = Some("released".to_string());
        released.home_page_content = Some(TextContent::html("<p>frozen</p>"));
        tracker.insert_document(released);
        tracker
    }

    #[test]
    fn renders_pushes_and_skips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let configs = configs(dir.path());
        let tracker = tracker();
        let (repo, model) = (repo(), model());

        let existing = fetch_existing_documents(&tracker, &configs.iterate_documents()).expect("fetched");
        assert_eq!(existing.len(), 3);

        let mass = MassDocumentRenderer::new(DocumentRenderer::new(&repo, &model, "PROJ"), false, false);
        let outcome = mass.render_documents(&configs, &existing);

        assert_eq!(outcome.rendered_count(), 3);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].name, "Released");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0.name, "Absent");

        let docs = &outcome.projects[&None];
        assert_eq!(docs.new_docs.len(), 1);
        assert_eq!(docs.new_docs[0].document.outline_numbering, Some(true));
        assert_eq!(docs.updated_docs.len(), 2);
        assert_eq!(docs.headings().len(), 1);

        tracker.clear_calls();
        push_documents(&tracker, docs).expect("pushed");
        assert_eq!(tracker.count(Operation::CreateDocuments), 1);
        assert_eq!(tracker.count(Operation::UpdateDocuments), 1);
        assert_eq!(tracker.count(Operation::UpdateWorkItems), 1);

        let heading = tracker.work_item("H-9").expect("seeded heading");
        assert_eq!(heading.title.as_deref(), Some("Overview"));

        let renamed = tracker.document("_default", "Existing").expect("document");
        assert_eq!(renamed.title.as_deref(), Some("Renamed"));
        assert_eq!(renamed.status, None);

        let mixed = tracker.document("_default", "Mixed").expect("document");
        let content = mixed.home_page_content.expect("content").value;
        assert!(content.starts_with("<p>manual</p>"));
        assert!(content.contains("<p>generated</p>"));
        assert!(!content.contains("<p>old</p>"));

        let frozen = tracker.document("_default", "Released").expect("document");
        assert_eq!(frozen.home_page_content.expect("content").value, "<p>frozen</p>");
    }

    #[test]
    fn configured_layouts_replace_existing_ones() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("t.j2"), "<p>x</p>").expect("write template");
        let configs = DocumentConfigs::from_yaml_str(&format!(
            "full_authority:\n  - template_directory: {}\n    template: t.j2\n    heading_numbering: true\n    work_item_layouts:\n      class: {{show_title: false}}\n    instances:\n      - {{polarion_space: s, polarion_name: d}}\n",
            dir.path().display()
        ))
        .expect("valid config");
        let mut document = Document::new("s", "d");
        document.rendering_layouts = vec![RenderingLayout::new("class", "section")];
        let existing = ExistingDocuments::from([(configs.iterate_documents()[0].clone(), document)]);
        let (repo, model) = (repo(), model());

        let mass = MassDocumentRenderer::new(DocumentRenderer::new(&repo, &model, "PROJ"), true, true);
        let outcome = mass.render_documents(&configs, &existing);
        let updated = &outcome.projects[&None].updated_docs[0].document;
        assert_eq!(updated.rendering_layouts.len(), 1);
        assert_eq!(updated.rendering_layouts[0].layouter, "paragraph");
        assert_eq!(updated.outline_numbering, Some(true));
    }

    #[test]
    fn push_failures_are_api_errors() {
        let tracker = MemoryTracker::new("PROJ");
        tracker.fail_operation(Operation::CreateDocuments);
        let docs = ProjectDocuments {
            new_docs: vec![RenderedDocument {
                document: Document::new("s", "d"),
                headings: Vec::new(),
                text_work_items: TextWorkItems::default(),
            }],
            updated_docs: Vec::new(),
        };
        let err = push_documents(&tracker, &docs).expect_err("create fails");
        assert_eq!(err.code(), crate::error::ErrorCode::RemoteApiFailure);
    }
}
