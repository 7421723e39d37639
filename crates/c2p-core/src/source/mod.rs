//! Read access to the engineering model.
//!
//! The converter only sees the model through [`ModelSource`] and diagrams
//! through [`DiagramRenderer`], so any model backend (a live model library,
//! an exported snapshot) can drive a synchronization run.

pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ElementTraits;
use crate::error::ErrorCode;

pub use snapshot::{FileDiagramRenderer, SnapshotModel};

/// Errors raised by model access.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// No element or diagram has this id.
    #[error("model element {0} not found")]
    NotFound(String),

    /// The element type does not have this attribute.
    #[error("attribute {attribute:?} not found on {uuid}")]
    MissingAttribute { uuid: String, attribute: String },

    /// A diagram could not be rendered.
    #[error("failed to render diagram {uuid}: {message}")]
    Render { uuid: String, message: String },

    /// The model file could not be read.
    #[error("failed to read model {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model file is not a valid snapshot.
    #[error("invalid model snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ModelElementNotFound,
            Self::MissingAttribute { .. } => ErrorCode::ModelAttributeMissing,
            Self::Render { .. } | Self::Io { .. } | Self::Json(_) => ErrorCode::InternalUnexpected,
        }
    }
}

/// Reference to another model object inside an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementRef {
    #[serde(rename = "ref")]
    pub uuid: String,
}

/// A model attribute value.
///
/// Serialized untagged: `{"ref": "<uuid>"}` is a reference, any other
/// object is a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(ElementRef),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Referenced element ids, for single and multi valued references.
    #[must_use]
    pub fn refs(&self) -> Vec<&str> {
        match self {
            Self::Ref(r) => vec![r.uuid.as_str()],
            Self::List(items) => items.iter().flat_map(Self::refs).collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A requirement attached to an element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requirement {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// A model element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Model type, e.g. `SystemFunction`.
    #[serde(rename = "type")]
    pub type_name: String,
    pub layer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl Element {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Context attributes used for type rule matching.
    #[must_use]
    pub fn traits(&self) -> ElementTraits {
        ElementTraits {
            is_actor: match self.attribute("is_actor") {
                Some(AttrValue::Bool(flag)) => Some(*flag),
                _ => None,
            },
            nature: self
                .attribute("nature")
                .and_then(AttrValue::as_text)
                .map(str::to_string),
        }
    }
}

/// A model diagram.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Diagram {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub layer: String,
    #[serde(default)]
    pub description: String,
    /// Elements shown on the diagram.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Anything addressable by id.
#[derive(Debug, Clone, Copy)]
pub enum ModelObject<'a> {
    Element(&'a Element),
    Diagram(&'a Diagram),
}

impl<'a> ModelObject<'a> {
    #[must_use]
    pub fn uuid(&self) -> &'a str {
        match self {
            Self::Element(e) => e.uuid.as_str(),
            Self::Diagram(d) => d.uuid.as_str(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            Self::Element(e) => e.name.as_str(),
            Self::Diagram(d) => d.name.as_str(),
        }
    }

    #[must_use]
    pub fn layer(&self) -> &'a str {
        match self {
            Self::Element(e) => e.layer.as_str(),
            Self::Diagram(d) => d.layer.as_str(),
        }
    }

    #[must_use]
    pub fn description(&self) -> &'a str {
        match self {
            Self::Element(e) => e.description.as_str(),
            Self::Diagram(d) => d.description.as_str(),
        }
    }

    #[must_use]
    pub const fn as_element(&self) -> Option<&'a Element> {
        match self {
            Self::Element(e) => Some(e),
            Self::Diagram(_) => None,
        }
    }

    /// Attribute lookup; diagrams only expose `nodes`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<AttrValue> {
        match self {
            Self::Element(e) => e.attribute(name).cloned(),
            Self::Diagram(d) if name == "nodes" => Some(AttrValue::List(
                d.nodes
                    .iter()
                    .map(|uuid| AttrValue::Ref(ElementRef { uuid: uuid.clone() }))
                    .collect(),
            )),
            Self::Diagram(_) => None,
        }
    }

    /// Template view of the object.
    ///
    /// Element attributes are lifted to the top level unless they collide
    /// with a built-in key; references stay `{"ref": "<uuid>"}` objects.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut value = match self {
            Self::Element(e) => serde_json::to_value(e).unwrap_or_default(),
            Self::Diagram(d) => {
                let mut value = serde_json::to_value(d).unwrap_or_default();
                if let Some(map) = value.as_object_mut() {
                    map.insert("type".to_string(), "Diagram".into());
                    map.insert(
                        "nodes".to_string(),
                        d.nodes
                            .iter()
                            .map(|uuid| serde_json::json!({ "ref": uuid }))
                            .collect(),
                    );
                }
                value
            }
        };
        if let Self::Element(e) = self
            && let Some(map) = value.as_object_mut()
        {
            for (name, attr) in &e.attributes {
                if !map.contains_key(name) {
                    map.insert(name.clone(), serde_json::to_value(attr).unwrap_or_default());
                }
            }
        }
        value
    }

    /// Short label for logs: `Type "name" (uuid)`.
    #[must_use]
    pub fn short_repr(&self) -> String {
        let kind = match self {
            Self::Element(e) => e.type_name.as_str(),
            Self::Diagram(_) => "Diagram",
        };
        format!("{kind} {:?} ({})", self.name(), self.uuid())
    }
}

/// Which picture of an object to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramKind {
    /// The diagram object itself.
    Diagram,
    /// Generated context diagram of an element.
    Context,
    /// Generated tree view of an element.
    Tree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Svg,
    Png,
}

impl ImageFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
        }
    }

    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Svg => crate::model::attachment::MIME_SVG,
            Self::Png => crate::model::attachment::MIME_PNG,
        }
    }
}

/// Everything needed to render one picture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramRequest {
    pub target_uuid: String,
    pub kind: DiagramKind,
    pub format: ImageFormat,
    pub filters: Vec<String>,
    pub render_params: BTreeMap<String, serde_json::Value>,
}

impl DiagramRequest {
    #[must_use]
    pub fn with_format(&self, format: ImageFormat) -> Self {
        Self {
            format,
            ..self.clone()
        }
    }
}

/// Renders diagrams on demand.
pub trait DiagramRenderer: Send + Sync {
    /// Render the requested picture.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Render`] when the picture cannot be produced.
    fn render(&self, request: &DiagramRequest) -> Result<Vec<u8>, ModelError>;

    /// Whether `request` can be served, checked without rendering.
    fn can_render(&self, request: &DiagramRequest) -> bool {
        let _ = request;
        true
    }

    /// A cheap, stable description of the render input.
    ///
    /// When available it replaces the rendered bytes in checksums, so
    /// unchanged diagrams are never rendered.
    fn checksum_source(&self, request: &DiagramRequest) -> Option<String> {
        let _ = request;
        None
    }
}

/// Read-only access to the engineering model.
pub trait ModelSource: Send + Sync {
    /// Elements of `type_name` in `layer`.
    fn search(&self, layer: &str, type_name: &str) -> Vec<&Element>;

    /// Any element or diagram by id.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotFound`] for unknown ids.
    fn by_uuid(&self, uuid: &str) -> Result<ModelObject<'_>, ModelError>;

    fn diagrams(&self) -> Vec<&Diagram>;

    fn renderer(&self) -> Arc<dyn DiagramRenderer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_values_parse_refs_and_maps() {
        let attrs: BTreeMap<String, AttrValue> = serde_json::from_str(
            r#"{
                "parent": {"ref": "uuid-2"},
                "children": [{"ref": "uuid-3"}, {"ref": "uuid-4"}],
                "specification": {"capella:linkedText": "x &lt; y"},
                "is_actor": true,
                "nature": "NODE"
            }"#,
        )
        .expect("valid attributes");

        assert_eq!(attrs["parent"].refs(), vec!["uuid-2"]);
        assert_eq!(attrs["children"].refs(), vec!["uuid-3", "uuid-4"]);
        assert!(matches!(attrs["specification"], AttrValue::Map(_)));
        assert!(attrs["specification"].refs().is_empty());
    }

    #[test]
    fn traits_read_actor_and_nature() {
        let element = Element {
            uuid: "u".to_string(),
            type_name: "PhysicalComponent".to_string(),
            layer: "pa".to_string(),
            attributes: [
                ("is_actor".to_string(), AttrValue::Bool(true)),
                ("nature".to_string(), AttrValue::Text("NODE".to_string())),
            ]
            .into_iter()
            .collect(),
            ..Element::default()
        };
        let traits = element.traits();
        assert_eq!(traits.is_actor, Some(true));
        assert_eq!(traits.nature.as_deref(), Some("NODE"));
    }

    #[test]
    fn diagrams_expose_nodes() {
        let diagram = Diagram {
            uuid: "d".to_string(),
            layer: "sa".to_string(),
            nodes: vec!["a".to_string(), "b".to_string()],
            ..Diagram::default()
        };
        let object = ModelObject::Diagram(&diagram);
        assert_eq!(
            object.attribute("nodes").map(|v| v.refs().len()),
            Some(2)
        );
        assert!(object.attribute("parent").is_none());
    }

    #[test]
    fn template_view_lifts_attributes() {
        let element = Element {
            uuid: "u".to_string(),
            name: "Door".to_string(),
            type_name: "Class".to_string(),
            layer: "sa".to_string(),
            attributes: [
                ("parent".to_string(), AttrValue::Ref(ElementRef { uuid: "p".to_string() })),
                ("name".to_string(), AttrValue::Text("shadowed".to_string())),
            ]
            .into_iter()
            .collect(),
            ..Element::default()
        };
        let value = ModelObject::Element(&element).to_value();
        assert_eq!(value["name"], "Door");
        assert_eq!(value["type"], "Class");
        assert_eq!(value["parent"]["ref"], "p");
    }
}
