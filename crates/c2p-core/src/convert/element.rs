//! Serialization of one model element into a work item.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, warn};

use super::html::{
    self, C2P_IMAGE_PREFIX, JINJA_RENDERED_IMG_CLS, caption_html, image_html, strike_through,
    text_list, work_item_url,
};
use super::{ConverterData, SerializeError};
use crate::config::{
    DiagramParams, JinjaTemplate, SerializerConfig, SerializerKind, SerializerParams, TypeConfig,
};
use crate::identity::IdentityRepository;
use crate::model::{Attachment, AttachmentKind, AttributeValue, LazyContent, TextContent, WorkItem};
use crate::source::{
    AttrValue, DiagramKind, DiagramRenderer, DiagramRequest, ImageFormat, ModelObject, ModelSource,
};
use crate::template::{ModelFunctions, TemplateStore};

const CONTEXT_DIAGRAM: (&str, &str) = ("context_diagram", "Context Diagram");
const TREE_VIEW: (&str, &str) = ("tree_view", "Tree View");
const LINKED_TEXT_KEY: &str = "capella:linkedText";

/// Turns model elements into work items following their type config.
pub struct ElementSerializer<'a> {
    model: &'a dyn ModelSource,
    repo: &'a IdentityRepository,
    templates: &'a TemplateStore,
    generate_attachments: bool,
    generate_figure_captions: bool,
}

impl<'a> ElementSerializer<'a> {
    #[must_use]
    pub fn new(
        model: &'a dyn ModelSource,
        repo: &'a IdentityRepository,
        templates: &'a TemplateStore,
        generate_attachments: bool,
        generate_figure_captions: bool,
    ) -> Self {
        Self {
            model,
            repo,
            templates,
            generate_attachments,
            generate_figure_captions,
        }
    }

    /// Serialize the element `uuid` into `data.work_item`.
    ///
    /// The generic content is built first, then every configured step runs
    /// in order. The first failing step leaves `data.work_item` empty.
    /// Errors of earlier runs are discarded.
    pub fn serialize(&self, uuid: &str, data: &mut ConverterData) {
        let ConverterData {
            type_config,
            work_item,
            description_references,
            errors,
            ..
        } = data;
        errors.clear();
        description_references.clear();
        *work_item = None;

        let obj = match self.model.by_uuid(uuid) {
            Ok(obj) => obj,
            Err(err) => {
                errors.insert(err.to_string());
                error!(element = uuid, error = %err, "serialization failed");
                return;
            }
        };

        let mut step = Step {
            ser: self,
            obj,
            config: type_config,
            errors,
            references: description_references,
        };
        let mut item = step.generic_work_item();
        let mut failed = false;
        for serializer in &type_config.serializers {
            if let Err(err) = step.apply(&mut item, serializer) {
                step.errors.insert(err.to_string());
                failed = true;
                break;
            }
        }

        let short = obj.short_repr();
        let joined = errors.iter().cloned().collect::<Vec<_>>().join("\n\t");
        if failed {
            error!("Serialization of {short} failed:\n\t{joined}");
        } else {
            if !errors.is_empty() {
                warn!("Serialization of {short} successful, but with warnings:\n\t{joined}");
            }
            *work_item = Some(item);
        }
    }
}

/// Result of description sanitization.
#[derive(Debug, Default)]
struct Sanitized {
    text: String,
    references: Vec<String>,
    attachments: Vec<Attachment>,
}

struct Step<'s, 'a> {
    ser: &'s ElementSerializer<'a>,
    obj: ModelObject<'a>,
    config: &'s TypeConfig,
    errors: &'s mut BTreeSet<String>,
    references: &'s mut Vec<String>,
}

impl<'a> Step<'_, 'a> {
    fn apply(&mut self, item: &mut WorkItem, serializer: &SerializerConfig) -> Result<(), SerializeError> {
        match (serializer.kind, &serializer.params) {
            (SerializerKind::Diagram, params) => self.diagram(item, diagram_params(params)),
            (SerializerKind::IncludePreAndPostCondition, _) => self.include_pre_and_post_condition(item),
            (SerializerKind::LinkedTextAsDescription, _) => {
                self.linked_text_as_description(item);
                Ok(())
            }
            (SerializerKind::AddAttributes, SerializerParams::Attributes(mappings)) => {
                self.add_attributes(item, mappings);
                Ok(())
            }
            (SerializerKind::AddContextDiagram, params) => {
                self.additional_diagram(item, DiagramKind::Context, CONTEXT_DIAGRAM, diagram_params(params));
                Ok(())
            }
            (SerializerKind::AddTreeDiagram, params) => {
                self.additional_diagram(item, DiagramKind::Tree, TREE_VIEW, diagram_params(params));
                Ok(())
            }
            (SerializerKind::AddJinjaFields, SerializerParams::JinjaFields(fields)) => {
                self.add_jinja_fields(item, fields)
            }
            (SerializerKind::AddAttributes | SerializerKind::AddJinjaFields, _) => Ok(()),
            (SerializerKind::JinjaAsDescription, SerializerParams::Jinja(template)) => {
                self.jinja_as_description(item, template)
            }
            (SerializerKind::JinjaAsDescription, _) => Err(SerializeError::MissingAttribute("template_path")),
        }
    }

    // -----------------------------------------------------------------------
    // Generic content
    // -----------------------------------------------------------------------

    fn generic_work_item(&mut self) -> WorkItem {
        let uuid = self.obj.uuid();
        let mut item = WorkItem::new(uuid, &self.config.p_type, self.obj.name());
        item.id = self.ser.repo.lookup_remote_id(uuid).map(str::to_string);

        let sanitized = self.sanitize(self.obj.description());
        item.description = Some(TextContent::html(sanitized.text));
        self.references.extend(sanitized.references);
        for attachment in sanitized.attachments {
            item.add_attachment(attachment);
        }

        for (field, text) in self.requirement_types() {
            item.additional_attributes.insert(field, text.into());
        }
        item
    }

    /// Requirement texts grouped by lowercased requirement type.
    fn requirement_types(&mut self) -> BTreeMap<String, TextContent> {
        let Some(element) = self.obj.as_element() else {
            return BTreeMap::new();
        };
        let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for req in &element.requirements {
            match (req.type_name.as_deref(), req.text.as_deref()) {
                (Some(type_name), Some(text)) if !type_name.is_empty() && !text.is_empty() => {
                    by_type
                        .entry(type_name.to_lowercase())
                        .or_default()
                        .push(text.to_string());
                }
                _ => {
                    let identifier = if req.name.is_empty() { &req.uuid } else { &req.name };
                    self.errors
                        .insert(format!("Found Requirement without text or type on {identifier:?}"));
                }
            }
        }
        by_type
            .into_iter()
            .map(|(field, texts)| (field, TextContent::html(text_list(&texts))))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn diagram(&mut self, item: &mut WorkItem, params: DiagramParams) -> Result<(), SerializeError> {
        let ModelObject::Diagram(diagram) = self.obj else {
            return Err(SerializeError::WrongObject {
                step: "diagram",
                expected: "a diagram",
            });
        };
        let (html, attachments) = self.draw_diagram_svg(
            DiagramKind::Diagram,
            ("diagram", "Diagram"),
            750,
            "diagram",
            &params,
            format!("Diagram {}", diagram.name),
        );
        item.description = Some(TextContent::html(html));
        item.attachments.clear();
        for attachment in attachments {
            item.add_attachment(attachment);
        }
        Ok(())
    }

    fn include_pre_and_post_condition(&mut self, item: &mut WorkItem) -> Result<(), SerializeError> {
        for (attribute, field, label) in [
            ("precondition", "preCondition", "PreCondition"),
            ("postcondition", "postCondition", "PostCondition"),
        ] {
            let model = self.ser.model;
            let value = self
                .obj
                .attribute(attribute)
                .ok_or(SerializeError::MissingAttribute(label))?;
            let text = match value.refs().first() {
                Some(uuid) => {
                    let condition = model.by_uuid(uuid)?;
                    let sanitized = self.sanitized_linked_text(condition);
                    for attachment in sanitized.attachments {
                        item.add_attachment(attachment);
                    }
                    format!(r#"<div style="text-align: center;">{}</div>"#, sanitized.text)
                }
                None => String::new(),
            };
            item.additional_attributes
                .insert(field.to_string(), TextContent::html(text).into());
        }
        Ok(())
    }

    fn linked_text_as_description(&mut self, item: &mut WorkItem) {
        let sanitized = self.sanitized_linked_text(self.obj);
        item.description = Some(TextContent::html(sanitized.text));
        if !sanitized.references.is_empty() {
            *self.references = sanitized.references;
        }
        for attachment in sanitized.attachments {
            item.add_attachment(attachment);
        }
    }

    fn add_attributes(&self, item: &mut WorkItem, mappings: &[crate::config::AttributeMapping]) {
        for mapping in mappings {
            let value = if mapping.capella_attr == "layer" {
                self.obj.layer().to_string()
            } else {
                match self.obj.attribute(&mapping.capella_attr) {
                    Some(AttrValue::Text(value)) => value,
                    Some(other) => {
                        error!(
                            attribute = %mapping.capella_attr,
                            element = %self.obj.short_repr(),
                            "Unsupported attribute type {other:?}"
                        );
                        continue;
                    }
                    None => {
                        error!(
                            "Attribute {:?} not found on {}",
                            mapping.capella_attr, self.config.p_type
                        );
                        continue;
                    }
                }
            };
            item.additional_attributes
                .insert(mapping.polarion_id.clone(), AttributeValue::String(value));
        }
    }

    fn additional_diagram(
        &self,
        item: &mut WorkItem,
        kind: DiagramKind,
        (field, title): (&str, &str),
        params: DiagramParams,
    ) {
        let caption = format!("{title} of {}", item.title.as_deref().unwrap_or_default());
        let (html, attachments) = self.draw_diagram_svg(
            kind,
            (field, title),
            650,
            "additional-attributes-diagram",
            &params,
            caption,
        );
        item.additional_attributes
            .insert(field.to_string(), TextContent::html(html).into());
        for attachment in attachments {
            item.add_attachment(attachment);
        }
    }

    fn add_jinja_fields(
        &mut self,
        item: &mut WorkItem,
        fields: &BTreeMap<String, JinjaTemplate>,
    ) -> Result<(), SerializeError> {
        for (field, template) in fields {
            let sanitized = self.render_template(item, template)?;
            item.additional_attributes
                .insert(field.clone(), TextContent::html(sanitized.text).into());
            for attachment in sanitized.attachments {
                item.add_attachment(attachment);
            }
        }
        Ok(())
    }

    fn jinja_as_description(&mut self, item: &mut WorkItem, template: &JinjaTemplate) -> Result<(), SerializeError> {
        let sanitized = self.render_template(item, template)?;
        item.description = Some(TextContent::html(sanitized.text));
        *self.references = sanitized.references;
        for attachment in sanitized.attachments {
            item.add_attachment(attachment);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn render_template(&mut self, item: &WorkItem, template: &JinjaTemplate) -> Result<Sanitized, SerializeError> {
        let loaded = self
            .ser
            .templates
            .load(&template.template_folder, &template.template_path)?;
        let mut context = BTreeMap::new();
        context.insert("object".to_string(), self.obj.to_value());
        context.insert("work_item".to_string(), work_item_value(item));
        context.extend(template.render_parameters.clone());
        let rendered = loaded.render(&context, &mut ModelFunctions::new(self.ser.model))?;
        Ok(self.sanitize(&rendered))
    }

    /// Picture of the object as image HTML plus its SVG/PNG attachments.
    fn draw_diagram_svg(
        &self,
        kind: DiagramKind,
        (field, title): (&str, &str),
        max_width: u32,
        cls: &str,
        params: &DiagramParams,
        caption: String,
    ) -> (String, Vec<Attachment>) {
        let file_name = format!("{C2P_IMAGE_PREFIX}{field}.svg");
        let caption = self.ser.generate_figure_captions.then_some(caption);
        let html = image_html(
            title,
            &file_name,
            max_width,
            cls,
            caption.as_deref().map(|caption| ("Figure", caption)),
        );
        if !self.ser.generate_attachments {
            return (html, Vec::new());
        }

        let renderer = self.ser.model.renderer();
        let request = DiagramRequest {
            target_uuid: self.obj.uuid().to_string(),
            kind,
            format: ImageFormat::Svg,
            filters: params.filters.iter().map(filter_name).collect(),
            render_params: params.render_params.clone(),
        };
        let attachment_kind = match kind {
            DiagramKind::Context => AttachmentKind::ContextDiagram,
            DiagramKind::Diagram | DiagramKind::Tree => AttachmentKind::Diagram,
        };

        let mut attachments = vec![diagram_attachment(&renderer, request.clone(), &file_name, title, attachment_kind)];
        let png = request.with_format(ImageFormat::Png);
        if renderer.can_render(&png) {
            let png_name = format!("{C2P_IMAGE_PREFIX}{field}.png");
            attachments.push(diagram_attachment(&renderer, png, &png_name, title, attachment_kind));
        }
        (html, attachments)
    }

    /// Linked text of `obj` with deleted-element markers resolved.
    fn sanitized_linked_text(&mut self, obj: ModelObject<'_>) -> Sanitized {
        let text = linked_text(obj);
        let text = html::replace_deleted_elements(&text, |uuid, marker| {
            if self.ser.model.by_uuid(uuid).is_err() {
                self.errors.insert(format!(
                    "Non-existing model element referenced in description: {uuid}"
                ));
                return strike_through(marker);
            }
            match self.ser.repo.lookup_remote_id(uuid) {
                Some(pid) => strike_through(&work_item_url(pid)),
                None => strike_through(uuid),
            }
        });
        self.sanitize(&text.replace('\n', "<br>"))
    }

    /// Resolve description links and lift inline images into attachments.
    fn sanitize(&mut self, text: &str) -> Sanitized {
        let mut references = Vec::new();
        let text = html::replace_description_links(text, |uuid, label| {
            if self.ser.model.by_uuid(uuid).is_err() {
                self.errors.insert(format!(
                    "Non-existing model element referenced in description: {uuid}"
                ));
                return strike_through(label);
            }
            match self.ser.repo.lookup_remote_id(uuid) {
                Some(pid) => {
                    references.push(uuid.to_string());
                    work_item_url(pid)
                }
                None => {
                    self.errors.insert(format!(
                        "Non-existing work item referenced in description: {uuid}"
                    ));
                    label.to_string()
                }
            }
        });

        if !self.ser.generate_attachments {
            return Sanitized {
                text,
                references,
                attachments: Vec::new(),
            };
        }

        let mut attachments: Vec<Attachment> = Vec::new();
        let text = html::rewrite_images(&text, |mut tag| {
            if tag.get("class") == Some(JINJA_RENDERED_IMG_CLS) {
                return None;
            }
            let src = tag.get("src").filter(|src| src.starts_with("data:"))?.to_string();
            let image = match html::parse_data_uri(&src).and_then(|uri| {
                html::extension_for_mime(&uri.mime_type)
                    .map(|ext| (uri, ext))
                    .ok_or_else(|| "unsupported image type".to_string())
            }) {
                Ok(image) => image,
                Err(err) => {
                    let head: String = src.chars().take(8).collect();
                    self.errors
                        .insert(format!("Inline image can't be loaded {head:?}: {err}"));
                    return None;
                }
            };
            let (uri, ext) = image;
            let file_name = tag
                .remove("data-capella-path")
                .and_then(|path| {
                    Path::new(&path)
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| format!("{}{ext}", blake3::hash(&uri.data).to_hex()));
            let title = tag.get("title").unwrap_or(file_name.as_str()).to_string();

            if !attachments.iter().any(|a| a.file_name == file_name) {
                attachments.push(Attachment::new(
                    &file_name,
                    &title,
                    &uri.mime_type,
                    LazyContent::eager(uri.data),
                ));
            }
            tag.set("src", format!("workitemimg:{file_name}"));
            let mut out = tag.to_html();
            if self.ser.generate_figure_captions {
                let caption = tag
                    .get("alt")
                    .filter(|alt| !alt.is_empty())
                    .map_or_else(|| format!("Image \"{title}\" of {}", self.obj.name()), str::to_string);
                out.push_str(&caption_html("Figure", &caption));
            }
            Some(out)
        });

        Sanitized {
            text,
            references,
            attachments,
        }
    }
}

fn diagram_params(params: &SerializerParams) -> DiagramParams {
    match params {
        SerializerParams::Diagram(params) => params.clone(),
        _ => DiagramParams::default(),
    }
}

fn filter_name(filter: &crate::config::DiagramFilter) -> String {
    if filter.args.is_empty() {
        filter.func.clone()
    } else {
        let args = serde_json::to_string(&filter.args).unwrap_or_default();
        format!("{}{args}", filter.func)
    }
}

fn diagram_attachment(
    renderer: &Arc<dyn DiagramRenderer>,
    request: DiagramRequest,
    file_name: &str,
    title: &str,
    kind: AttachmentKind,
) -> Attachment {
    let checksum_source = renderer.checksum_source(&request);
    let mime_type = request.format.mime_type();
    let lazy_renderer = Arc::clone(renderer);
    let content = LazyContent::lazy(move || match lazy_renderer.render(&request) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to render diagram");
            Vec::new()
        }
    });
    let attachment = Attachment::new(file_name, title, mime_type, content).with_kind(kind);
    match checksum_source {
        Some(source) => attachment.with_checksum_source(source),
        None => attachment,
    }
}

/// `specification["capella:linkedText"]` of an object, or empty.
fn linked_text(obj: ModelObject<'_>) -> String {
    match obj.attribute("specification") {
        Some(AttrValue::Map(spec)) => spec
            .get(LINKED_TEXT_KEY)
            .and_then(AttrValue::as_text)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Template view of a work item.
#[must_use]
pub fn work_item_value(item: &WorkItem) -> Value {
    let mut value = json!({
        "id": item.id,
        "type": item.work_item_type,
        "title": item.title,
        "status": item.status,
        "description": item.description.as_ref().map(|d| d.value.as_str()),
    });
    if let Some(map) = value.as_object_mut() {
        for (name, attr) in &item.additional_attributes {
            let attr = match attr {
                AttributeValue::Text(text) => Value::String(text.value.clone()),
                other => serde_json::to_value(other).unwrap_or_default(),
            };
            map.entry(name.clone()).or_insert(attr);
        }
    }
    value
}
