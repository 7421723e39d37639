//! Template rendering of single documents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::DocumentError;
use super::areas::{extract_heading_ids, merge_areas, remove_table_ids};
use super::config::camel_case_to_words;
use super::text_items::TextWorkItems;
use crate::convert::html::{WI_ID_PREFIX, red_text, work_item_document, work_item_url, work_item_url_in_project};
use crate::identity::IdentityRepository;
use crate::model::{AttributeValue, Document, RenderingLayout, TextContent, WorkItem, layout_index};
use crate::source::ModelSource;
use crate::template::{Functions, ModelFunctions, TemplateStore, display, referenced_id};

/// State shared by every template call while rendering one document.
#[derive(Debug, Default)]
pub struct RenderingSession {
    /// Heading work items whose titles changed, to be pushed afterwards.
    pub headings: Vec<WorkItem>,
    /// Heading ids of the existing document, reused in order.
    pub heading_ids: VecDeque<String>,
    pub rendering_layouts: Vec<RenderingLayout>,
    /// Remote ids already embedded into the document.
    pub inserted: BTreeSet<String>,
}

/// A rendered document plus the heading work items it renamed and the
/// text work items its templates declared.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub document: Document,
    pub headings: Vec<WorkItem>,
    pub text_work_items: TextWorkItems,
}

/// Target of a document that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub space: String,
    pub name: String,
    pub title: Option<String>,
    pub heading_numbering: bool,
    pub rendering_layouts: Vec<RenderingLayout>,
}

/// Renders documents against the model and the work items of one run.
pub struct DocumentRenderer<'a> {
    repo: &'a IdentityRepository,
    model: &'a dyn ModelSource,
    model_project: String,
    templates: TemplateStore,
}

impl<'a> DocumentRenderer<'a> {
    #[must_use]
    pub fn new(repo: &'a IdentityRepository, model: &'a dyn ModelSource, model_project: impl Into<String>) -> Self {
        Self {
            repo,
            model,
            model_project: model_project.into(),
            templates: TemplateStore::new(),
        }
    }

    /// Render a full authority document that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Template`] when loading or rendering fails.
    pub fn render_new(
        &self,
        template_directory: &Path,
        template: &Path,
        target: NewDocument,
        params: &BTreeMap<String, Value>,
        document_project: Option<&str>,
    ) -> Result<RenderedDocument, DocumentError> {
        let mut session = RenderingSession {
            rendering_layouts: target.rendering_layouts,
            ..RenderingSession::default()
        };
        let content = self.render_template(template_directory, template, params, &mut session, document_project)?;

        let mut document = Document::new(target.space, target.name);
        document.title = target.title;
        document.home_page_content = Some(TextContent::html(remove_table_ids(&content)));
        document.rendering_layouts = session.rendering_layouts;
        document.outline_numbering = Some(target.heading_numbering);
        Ok(RenderedDocument {
            document,
            headings: session.headings,
            text_work_items: TextWorkItems::default(),
        })
    }

    /// Re-render an existing full authority document.
    ///
    /// Headings of the old content are reused in order so that their work
    /// items survive.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Template`] when loading or rendering fails.
    pub fn render_full(
        &self,
        template_directory: &Path,
        template: &Path,
        mut document: Document,
        params: &BTreeMap<String, Value>,
        document_project: Option<&str>,
    ) -> Result<RenderedDocument, DocumentError> {
        let mut session = RenderingSession {
            heading_ids: document
                .home_page_content
                .as_ref()
                .map(|content| extract_heading_ids(&content.value).into())
                .unwrap_or_default(),
            rendering_layouts: std::mem::take(&mut document.rendering_layouts),
            ..RenderingSession::default()
        };
        let content = self.render_template(template_directory, template, params, &mut session, document_project)?;

        document.home_page_content = Some(TextContent::html(remove_table_ids(&content)));
        document.rendering_layouts = session.rendering_layouts;
        Ok(RenderedDocument {
            document,
            headings: session.headings,
            text_work_items: TextWorkItems::default(),
        })
    }

    /// Re-render the configured areas of a mixed authority document.
    ///
    /// Areas without a configured section keep their content. Section
    /// parameters extend, and override, the instance parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::MissingContent`] for an empty document,
    /// [`DocumentError::AreaMismatch`] for broken markers and
    /// [`DocumentError::Template`] when a section fails to render.
    pub fn render_mixed(
        &self,
        template_directory: &Path,
        sections: &BTreeMap<String, PathBuf>,
        mut document: Document,
        params: &BTreeMap<String, Value>,
        section_params: &BTreeMap<String, BTreeMap<String, Value>>,
        document_project: Option<&str>,
    ) -> Result<RenderedDocument, DocumentError> {
        let path = document.path();
        let Some(content) = document.home_page_content.take().filter(|c| !c.value.is_empty()) else {
            return Err(DocumentError::MissingContent(path));
        };

        let mut session = RenderingSession {
            heading_ids: extract_heading_ids(&content.value).into(),
            rendering_layouts: std::mem::take(&mut document.rendering_layouts),
            ..RenderingSession::default()
        };
        let merged = merge_areas(&path, &content.value, |area| {
            let Some(template) = sections.get(area) else {
                warn!(document = %path, area, "Found an area without a configured section, keeping its content");
                return Ok(None);
            };
            let mut area_params = params.clone();
            if let Some(extra) = section_params.get(area) {
                area_params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            debug!(document = %path, area, "rendering section");
            let rendered =
                self.render_template(template_directory, template, &area_params, &mut session, document_project)?;
            Ok(Some(remove_table_ids(&rendered)))
        })?;

        document.home_page_content = Some(TextContent {
            value: merged,
            ..content
        });
        document.rendering_layouts = session.rendering_layouts;
        Ok(RenderedDocument {
            document,
            headings: session.headings,
            text_work_items: TextWorkItems::default(),
        })
    }

    fn render_template(
        &self,
        template_directory: &Path,
        template: &Path,
        params: &BTreeMap<String, Value>,
        session: &mut RenderingSession,
        document_project: Option<&str>,
    ) -> Result<String, DocumentError> {
        let template = self.templates.load(template_directory, template)?;
        let mut functions = DocumentFunctions {
            repo: self.repo,
            model: ModelFunctions::new(self.model),
            session,
            foreign_project: document_project
                .filter(|project| *project != self.model_project)
                .map(|_| self.model_project.as_str()),
        };
        Ok(template.render(params, &mut functions)?)
    }
}

// ---------------------------------------------------------------------------
// Template functions
// ---------------------------------------------------------------------------

/// Functions available to document templates, on top of the model ones:
///
/// - `insert_work_item(obj[, level])` embeds the work item of `obj`,
/// - `link_work_item(obj)` (also a filter) links to it,
/// - `heading(level, text)` writes a heading, reusing existing heading ids,
/// - `work_item_field(obj, field)` reads a field of the work item.
struct DocumentFunctions<'r, 's> {
    repo: &'r IdentityRepository,
    model: ModelFunctions<'r>,
    session: &'s mut RenderingSession,
    /// Model project, set when the document lives in another project.
    foreign_project: Option<&'r str>,
}

impl Functions for DocumentFunctions<'_, '_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        let result = match name {
            "insert_work_item" => Ok(self.insert_work_item(args)),
            "link_work_item" => self.link_work_item(args.first().unwrap_or(&Value::Null)),
            "heading" => self.heading(args),
            "work_item_field" => self.work_item_field(args),
            _ => return self.model.call(name, args),
        };
        Some(result.map(Value::String))
    }
}

impl DocumentFunctions<'_, '_> {
    fn remote_id(&self, uuid: &str) -> Option<&str> {
        self.repo.get_snapshot(uuid).and_then(|item| item.id.as_deref())
    }

    fn link(&self, id: &str) -> String {
        match self.foreign_project {
            Some(project) => work_item_url_in_project(id, project),
            None => work_item_url(id),
        }
    }

    fn insert_work_item(&mut self, args: &[Value]) -> String {
        let Some(uuid) = args.first().and_then(referenced_id) else {
            return red_text("A none model object was passed to insert a work item.");
        };
        let repo = self.repo;
        let Some(item) = repo.get_snapshot(uuid) else {
            return red_text(&format!("Missing WorkItem for UUID {uuid}"));
        };
        let Some(id) = item.id.as_deref() else {
            return red_text(&format!("Missing WorkItem for UUID {uuid}"));
        };
        if !self.session.inserted.insert(id.to_string()) {
            info!(work_item = id, "Work item is already part of the document, inserting a link instead");
            return format!("<p>{}</p>", self.link(id));
        }

        let item_type = item.work_item_type.as_deref().unwrap_or_default();
        let layouts = &mut self.session.rendering_layouts;
        let known = layouts.len();
        let layout = layout_index(layouts, "section", item_type);
        if layouts.len() > known {
            layouts[layout].label = Some(camel_case_to_words(item_type));
        }
        let custom_info = args
            .get(1)
            .and_then(Value::as_u64)
            .map(|level| format!("level={level}|"))
            .unwrap_or_default();
        work_item_document(id, layout, &custom_info, self.foreign_project)
    }

    fn link_work_item(&self, obj: &Value) -> Result<String, String> {
        let uuid = referenced_id(obj).ok_or_else(|| "expected a model object".to_string())?;
        Ok(self.remote_id(uuid).map_or_else(
            || {
                red_text(&format!(
                    "Missing WorkItem for {} {} ({uuid})",
                    display(&obj["type"]),
                    display(&obj["name"])
                ))
            },
            |id| self.link(id),
        ))
    }

    fn heading(&mut self, args: &[Value]) -> Result<String, String> {
        let level = args
            .first()
            .and_then(Value::as_u64)
            .filter(|level| (1..=6).contains(level))
            .ok_or_else(|| "expected heading(level, text) with level 1 to 6".to_string())?;
        let text = args.get(1).map(display).unwrap_or_default();
        Ok(match self.session.heading_ids.pop_front() {
            Some(id) => {
                let html = format!(r#"<h{level} id="{WI_ID_PREFIX}{id}"></h{level}>"#);
                self.session.headings.push(WorkItem {
                    id: Some(id),
                    title: Some(text),
                    ..WorkItem::default()
                });
                html
            }
            None => format!("<h{level}>{text}</h{level}>"),
        })
    }

    fn work_item_field(&self, args: &[Value]) -> Result<String, String> {
        let (Some(uuid), Some(field)) = (
            args.first().and_then(referenced_id),
            args.get(1).and_then(Value::as_str),
        ) else {
            return Err("expected work_item_field(obj, field)".to_string());
        };
        let Some(item) = self.repo.get_snapshot(uuid) else {
            return Ok(format!("No work item for {uuid}"));
        };
        let value = match field {
            "id" => item.id.clone(),
            "type" => item.work_item_type.clone(),
            "title" => item.title.clone(),
            "status" => item.status.clone(),
            _ => item.additional_attributes.get(field).and_then(attribute_text),
        };
        Ok(value.unwrap_or_else(|| {
            format!(
                "Missing field {field} for work item {}",
                item.id.as_deref().unwrap_or(uuid)
            )
        }))
    }
}

fn attribute_text(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Null => None,
        AttributeValue::Bool(flag) => Some(flag.to_string()),
        AttributeValue::Integer(n) => Some(n.to_string()),
        AttributeValue::Float(n) => Some(n.to_string()),
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Text(text) => Some(text.value.clone()),
    }
}
