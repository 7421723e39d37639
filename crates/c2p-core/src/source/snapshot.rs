//! A model exported to JSON, with pre-rendered diagrams on disk.
//!
//! Layout of the snapshot file:
//!
//! ```json
//! {
//!   "elements": [{"uuid": "...", "type": "SystemFunction", "layer": "sa", ...}],
//!   "diagrams": [{"uuid": "...", "name": "...", "layer": "sa", "nodes": [...]}],
//!   "context_inputs": {"<element uuid>": "<layout input of its context diagram>"}
//! }
//! ```
//!
//! Diagram pictures live next to it in `diagrams/`, named
//! `<uuid>.<ext>`, `<uuid>.context.<ext>` or `<uuid>.tree.<ext>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::{Diagram, DiagramKind, DiagramRenderer, DiagramRequest, Element, ModelError, ModelObject, ModelSource};
use crate::canonical::canonicalize_json;

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    elements: Vec<Element>,
    #[serde(default)]
    diagrams: Vec<Diagram>,
    #[serde(default)]
    context_inputs: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Element(usize),
    Diagram(usize),
}

/// An in-memory model.
pub struct SnapshotModel {
    elements: Vec<Element>,
    diagrams: Vec<Diagram>,
    index: HashMap<String, Slot>,
    renderer: Arc<dyn DiagramRenderer>,
}

impl std::fmt::Debug for SnapshotModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotModel")
            .field("elements", &self.elements.len())
            .field("diagrams", &self.diagrams.len())
            .finish_non_exhaustive()
    }
}

impl SnapshotModel {
    /// A model rendering diagrams from `./diagrams`.
    #[must_use]
    pub fn new(elements: Vec<Element>, diagrams: Vec<Diagram>) -> Self {
        let index = elements
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.uuid.clone(), Slot::Element(idx)))
            .chain(
                diagrams
                    .iter()
                    .enumerate()
                    .map(|(idx, d)| (d.uuid.clone(), Slot::Diagram(idx))),
            )
            .collect();
        Self {
            elements,
            diagrams,
            index,
            renderer: Arc::new(FileDiagramRenderer::new("diagrams")),
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn DiagramRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Load a snapshot file; pictures are read from `diagrams/` beside it.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Io`] or [`ModelError::Json`].
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: SnapshotFile = serde_json::from_str(&text)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).join("diagrams");
        let renderer = FileDiagramRenderer::new(dir).with_context_inputs(file.context_inputs);
        Ok(Self::new(file.elements, file.diagrams).with_renderer(Arc::new(renderer)))
    }

    /// Parse a snapshot without a picture directory.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Json`] for malformed input.
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        let file: SnapshotFile = serde_json::from_str(text)?;
        let renderer = FileDiagramRenderer::new("diagrams").with_context_inputs(file.context_inputs);
        Ok(Self::new(file.elements, file.diagrams).with_renderer(Arc::new(renderer)))
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }
}

impl ModelSource for SnapshotModel {
    fn search(&self, layer: &str, type_name: &str) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| e.layer == layer && e.type_name == type_name)
            .collect()
    }

    fn by_uuid(&self, uuid: &str) -> Result<ModelObject<'_>, ModelError> {
        match self.index.get(uuid) {
            Some(Slot::Element(idx)) => Ok(ModelObject::Element(&self.elements[*idx])),
            Some(Slot::Diagram(idx)) => Ok(ModelObject::Diagram(&self.diagrams[*idx])),
            None => Err(ModelError::NotFound(uuid.to_string())),
        }
    }

    fn diagrams(&self) -> Vec<&Diagram> {
        self.diagrams.iter().collect()
    }

    fn renderer(&self) -> Arc<dyn DiagramRenderer> {
        Arc::clone(&self.renderer)
    }
}

/// Serves pre-rendered pictures from a directory.
#[derive(Debug, Clone)]
pub struct FileDiagramRenderer {
    dir: PathBuf,
    context_inputs: HashMap<String, String>,
}

impl FileDiagramRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            context_inputs: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context_inputs(mut self, inputs: HashMap<String, String>) -> Self {
        self.context_inputs = inputs;
        self
    }

    fn path_for(&self, request: &DiagramRequest) -> PathBuf {
        let infix = match request.kind {
            DiagramKind::Diagram => "",
            DiagramKind::Context => ".context",
            DiagramKind::Tree => ".tree",
        };
        self.dir.join(format!(
            "{}{infix}.{}",
            request.target_uuid,
            request.format.extension()
        ))
    }
}

impl DiagramRenderer for FileDiagramRenderer {
    fn render(&self, request: &DiagramRequest) -> Result<Vec<u8>, ModelError> {
        let path = self.path_for(request);
        fs::read(&path).map_err(|err| ModelError::Render {
            uuid: request.target_uuid.clone(),
            message: format!("{}: {err}", path.display()),
        })
    }

    fn can_render(&self, request: &DiagramRequest) -> bool {
        self.path_for(request).is_file()
    }

    fn checksum_source(&self, request: &DiagramRequest) -> Option<String> {
        if request.kind != DiagramKind::Context {
            return None;
        }
        let input = self.context_inputs.get(&request.target_uuid)?;
        let params = serde_json::json!({
            "filters": request.filters,
            "render_params": request.render_params,
        });
        Some(format!("{input};{}", canonicalize_json(&params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageFormat;
    use std::collections::BTreeMap;

    const SNAPSHOT: &str = r#"{
        "elements": [
            {"uuid": "e1", "name": "Door", "type": "Class", "layer": "sa"},
            {"uuid": "e2", "name": "Lock", "type": "Class", "layer": "la"}
        ],
        "diagrams": [{"uuid": "d1", "name": "Overview", "layer": "sa", "nodes": ["e1"]}],
        "context_inputs": {"e1": "{\"children\":[]}"}
    }"#;

    fn request(kind: DiagramKind, format: ImageFormat) -> DiagramRequest {
        DiagramRequest {
            target_uuid: "e1".to_string(),
            kind,
            format,
            filters: Vec::new(),
            render_params: BTreeMap::new(),
        }
    }

    #[test]
    fn search_filters_layer_and_type() {
        let model = SnapshotModel::from_json_str(SNAPSHOT).expect("valid snapshot");
        let found = model.search("sa", "Class");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid, "e1");
    }

    #[test]
    fn by_uuid_finds_diagrams_and_reports_missing() {
        let model = SnapshotModel::from_json_str(SNAPSHOT).expect("valid snapshot");
        assert_eq!(model.by_uuid("d1").expect("diagram").name(), "Overview");
        assert!(matches!(model.by_uuid("nope"), Err(ModelError::NotFound(id)) if id == "nope"));
    }

    #[test]
    fn file_renderer_reads_pictures() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        fs::write(dir.path().join("e1.context.svg"), b"<svg/>").expect("write svg");
        let renderer = FileDiagramRenderer::new(dir.path());

        let svg = request(DiagramKind::Context, ImageFormat::Svg);
        let png = request(DiagramKind::Context, ImageFormat::Png);
        assert!(renderer.can_render(&svg));
        assert!(!renderer.can_render(&png));
        assert_eq!(renderer.render(&svg).expect("rendered"), b"<svg/>");
        assert!(renderer.render(&png).is_err());
    }

    #[test]
    fn context_checksum_source_comes_from_layout_input() {
        let model = SnapshotModel::from_json_str(SNAPSHOT).expect("valid snapshot");
        let renderer = model.renderer();
        let source = renderer
            .checksum_source(&request(DiagramKind::Context, ImageFormat::Svg))
            .expect("context input known");
        assert!(source.starts_with("{\"children\":[]};"));
        assert!(renderer
            .checksum_source(&request(DiagramKind::Tree, ImageFormat::Svg))
            .is_none());
    }
}
