//! Type rules: which tracker type, serializers and links apply to an element.
//!
//! The YAML document maps layer -> model type -> entry (or list of entries).
//! Layer `*` holds entries that apply in every layer; `*`/`*` is the default
//! entry and `*`/`Diagram` configures diagrams.
//!
//! Entries inherit from their parent: a layer entry from the global entry of
//! the same type (or the default), a global entry from the default. Links
//! are merged by model attribute and serializers by key, child first.
//!
//! Resolution is ranked and first-match-wins:
//!
//! 1. layer entries with a `nature` specifier,
//! 2. layer entries with only an `is_actor` specifier,
//! 3. unspecified layer entries,
//! 4. the global entry for the type,
//! 5. the default entry.
//!
//! Ranks 1-3 keep their configured order within a rank.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;
use tracing::warn;

use super::ConfigError;

pub const WILDCARD: &str = "*";
pub const DIAGRAM_TYPE: &str = "Diagram";
/// Link resolver yielding the elements referenced from the description.
pub const DESCRIPTION_REFERENCE: &str = "description_reference";
/// Link resolver yielding the elements shown on a diagram.
pub const DIAGRAM_ELEMENTS: &str = "diagram_elements";

// ---------------------------------------------------------------------------
// Serializers
// ---------------------------------------------------------------------------

/// The closed set of serialization steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    Diagram,
    IncludePreAndPostCondition,
    LinkedTextAsDescription,
    AddAttributes,
    AddContextDiagram,
    AddTreeDiagram,
    AddJinjaFields,
    JinjaAsDescription,
}

impl SerializerKind {
    pub const ALL: [Self; 8] = [
        Self::Diagram,
        Self::IncludePreAndPostCondition,
        Self::LinkedTextAsDescription,
        Self::AddAttributes,
        Self::AddContextDiagram,
        Self::AddTreeDiagram,
        Self::AddJinjaFields,
        Self::JinjaAsDescription,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Diagram => "diagram",
            Self::IncludePreAndPostCondition => "include_pre_and_post_condition",
            Self::LinkedTextAsDescription => "linked_text_as_description",
            Self::AddAttributes => "add_attributes",
            Self::AddContextDiagram => "add_context_diagram",
            Self::AddTreeDiagram => "add_tree_diagram",
            Self::AddJinjaFields => "add_jinja_fields",
            Self::JinjaAsDescription => "jinja_as_description",
        }
    }

    /// Resolve a config key such as `add_attributes` or `add_attributes-extra`.
    ///
    /// The optional suffix after the first `-` must be non-empty and made of
    /// ASCII alphanumerics or `_`.
    #[must_use]
    pub fn from_config_key(key: &str) -> Option<Self> {
        let base = match key.split_once('-') {
            Some((base, suffix)) => {
                let valid = !suffix.is_empty()
                    && suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid {
                    return None;
                }
                base
            }
            None => key,
        };
        Self::ALL.into_iter().find(|kind| kind.name() == base)
    }
}

/// `capella_attr -> polarion_id` copy instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeMapping {
    pub capella_attr: String,
    pub polarion_id: String,
}

/// A named diagram filter with optional arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramFilter {
    pub func: String,
    pub args: BTreeMap<String, serde_json::Value>,
}

/// Parameters of the diagram rendering serializers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DiagramParams {
    pub filters: Vec<DiagramFilter>,
    pub render_params: BTreeMap<String, serde_json::Value>,
}

/// A template reference for the template-driven serializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JinjaTemplate {
    #[serde(default)]
    pub template_folder: PathBuf,
    pub template_path: PathBuf,
    #[serde(default)]
    pub render_parameters: BTreeMap<String, serde_json::Value>,
}

impl JinjaTemplate {
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.template_folder.join(&self.template_path)
    }
}

/// Validated parameters, shaped per serializer kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SerializerParams {
    None,
    Attributes(Vec<AttributeMapping>),
    Diagram(DiagramParams),
    JinjaFields(BTreeMap<String, JinjaTemplate>),
    Jinja(JinjaTemplate),
}

/// One configured serialization step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializerConfig {
    /// The config key, including an optional `-suffix`.
    pub key: String,
    pub kind: SerializerKind,
    pub params: SerializerParams,
}

impl SerializerConfig {
    /// Validate `params` for the serializer named by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSerializer`] for unknown keys and
    /// [`ConfigError::SerializerParams`] for malformed parameters.
    pub fn parse(key: &str, params: Yaml) -> Result<Self, ConfigError> {
        let kind = SerializerKind::from_config_key(key)
            .ok_or_else(|| ConfigError::UnknownSerializer(key.to_string()))?;
        let invalid = |message: String| ConfigError::SerializerParams {
            serializer: key.to_string(),
            message,
        };

        let params = match kind {
            SerializerKind::IncludePreAndPostCondition | SerializerKind::LinkedTextAsDescription => {
                SerializerParams::None
            }
            SerializerKind::AddAttributes => {
                SerializerParams::Attributes(parse_attribute_mappings(params).map_err(invalid)?)
            }
            SerializerKind::Diagram | SerializerKind::AddContextDiagram | SerializerKind::AddTreeDiagram => {
                SerializerParams::Diagram(parse_diagram_params(params).map_err(invalid)?)
            }
            SerializerKind::AddJinjaFields => {
                SerializerParams::JinjaFields(parse_jinja_fields(params).map_err(invalid)?)
            }
            SerializerKind::JinjaAsDescription => {
                let template: JinjaTemplate =
                    serde_yaml::from_value(params).map_err(|e| invalid(e.to_string()))?;
                let resolved = template.resolved_path();
                if !resolved.is_file() {
                    return Err(invalid(format!(
                        "resolved template path {} does not exist or is not a file",
                        resolved.display()
                    )));
                }
                SerializerParams::Jinja(template)
            }
        };

        Ok(Self {
            key: key.to_string(),
            kind,
            params,
        })
    }
}

fn parse_attribute_mappings(params: Yaml) -> Result<Vec<AttributeMapping>, String> {
    let items = match params {
        Yaml::Null => return Ok(Vec::new()),
        Yaml::Sequence(items) => items,
        Yaml::Mapping(mut map) => match map.remove("attributes") {
            Some(Yaml::Sequence(items)) => items,
            Some(Yaml::Null) | None if map.is_empty() => return Ok(Vec::new()),
            _ => return Err("expected a list of attributes".to_string()),
        },
        _ => return Err("expected a list of attributes".to_string()),
    };

    items
        .into_iter()
        .map(|item| match item {
            Yaml::String(attr) => Ok(AttributeMapping {
                polarion_id: attr.clone(),
                capella_attr: attr,
            }),
            Yaml::Mapping(map) => {
                let get = |key: &str| map.get(key).and_then(Yaml::as_str).map(str::to_string);
                let capella_attr = get("capella_attr")
                    .ok_or_else(|| "attribute entry is missing 'capella_attr'".to_string())?;
                Ok(AttributeMapping {
                    polarion_id: get("polarion_id").unwrap_or_else(|| capella_attr.clone()),
                    capella_attr,
                })
            }
            other => Err(format!("unsupported attribute entry {other:?}")),
        })
        .collect()
}

fn parse_diagram_params(params: Yaml) -> Result<DiagramParams, String> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFilter {
        Name(String),
        Full {
            func: String,
            #[serde(default)]
            args: BTreeMap<String, serde_json::Value>,
        },
    }

    #[derive(Deserialize, Default)]
    struct RawDiagramParams {
        #[serde(default)]
        filters: Vec<RawFilter>,
        #[serde(default)]
        render_params: BTreeMap<String, serde_json::Value>,
    }

    let raw: RawDiagramParams = if params.is_null() {
        RawDiagramParams::default()
    } else {
        serde_yaml::from_value(params).map_err(|e| e.to_string())?
    };
    Ok(DiagramParams {
        filters: raw
            .filters
            .into_iter()
            .map(|filter| match filter {
                RawFilter::Name(func) => DiagramFilter {
                    func,
                    args: BTreeMap::new(),
                },
                RawFilter::Full { func, args } => DiagramFilter { func, args },
            })
            .collect(),
        render_params: raw.render_params,
    })
}

fn parse_jinja_fields(params: Yaml) -> Result<BTreeMap<String, JinjaTemplate>, String> {
    let fields = match params {
        Yaml::Null => return Ok(BTreeMap::new()),
        Yaml::Mapping(mut map) => match map.remove("fields") {
            Some(fields @ Yaml::Mapping(_)) => fields,
            Some(_) => return Err("'fields' must be a mapping".to_string()),
            None => Yaml::Mapping(map),
        },
        _ => return Err("expected a mapping of field id to template".to_string()),
    };
    serde_yaml::from_value(fields).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A processed link rule with all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkConfig {
    /// Attribute path on the model element, or a custom resolver name.
    pub capella_attr: String,
    pub polarion_role: String,
    /// Grouped field on the primary work item.
    pub link_field: String,
    /// Grouped field on the secondary work items.
    pub reverse_field: String,
    /// `display name -> attribute` of targets listed under each link.
    pub include: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLink {
    Attr(String),
    Full(RawLinkConfig),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLinkConfig {
    capella_attr: String,
    polarion_role: Option<String>,
    link_field: Option<String>,
    reverse_field: Option<String>,
    #[serde(default)]
    include: BTreeMap<String, String>,
}

impl RawLink {
    fn process(self, role_prefix: &str) -> LinkConfig {
        let raw = match self {
            Self::Attr(capella_attr) => RawLinkConfig {
                capella_attr,
                polarion_role: None,
                link_field: None,
                reverse_field: None,
                include: BTreeMap::new(),
            },
            Self::Full(raw) => raw,
        };
        let base_id = raw
            .polarion_role
            .filter(|role| !role.is_empty())
            .unwrap_or_else(|| raw.capella_attr.clone());
        let link_field = raw
            .link_field
            .filter(|field| !field.is_empty())
            .unwrap_or_else(|| base_id.clone());
        let reverse_field = raw
            .reverse_field
            .filter(|field| !field.is_empty())
            .unwrap_or_else(|| format!("{link_field}_reverse"));
        LinkConfig {
            capella_attr: raw.capella_attr,
            polarion_role: prefix_id(&base_id, role_prefix),
            link_field,
            reverse_field,
            include: raw.include,
        }
    }
}

// ---------------------------------------------------------------------------
// Type entries
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTypeEntry {
    polarion_type: Option<String>,
    #[serde(default)]
    links: Vec<RawLink>,
    #[serde(default)]
    serializer: Yaml,
    is_actor: Option<bool>,
    nature: Option<String>,
}

/// Contextual attributes of a model element used for rule matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ElementTraits {
    pub is_actor: Option<bool>,
    pub nature: Option<String>,
}

/// A fully processed type configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeConfig {
    /// Tracker work item type, prefixed.
    pub p_type: String,
    pub serializers: Vec<SerializerConfig>,
    pub links: Vec<LinkConfig>,
    pub is_actor: Option<bool>,
    pub nature: Option<String>,
}

impl TypeConfig {
    /// Whether every specifier of this entry agrees with `traits`.
    #[must_use]
    pub fn matches(&self, traits: &ElementTraits) -> bool {
        let actor_ok = self.is_actor.is_none_or(|want| traits.is_actor == Some(want));
        let nature_ok = self
            .nature
            .as_deref()
            .is_none_or(|want| traits.nature.as_deref() == Some(want));
        actor_ok && nature_ok
    }

    /// Lower is more specific.
    const fn rank(&self) -> u8 {
        match (self.nature.is_some(), self.is_actor.is_some()) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }

    #[must_use]
    pub fn has_serializer(&self, kind: SerializerKind) -> bool {
        self.serializers.iter().any(|s| s.kind == kind)
    }
}

/// Add `prefix` to `id`, joined by exactly one underscore.
#[must_use]
pub fn prefix_id(id: &str, prefix: &str) -> String {
    if prefix.is_empty() || id.is_empty() {
        return id.to_string();
    }
    format!(
        "{}_{}",
        prefix.trim_end_matches('_'),
        id.trim_start_matches('_')
    )
}

/// `SystemFunction` -> `systemFunction`.
#[must_use]
pub fn default_type_id(c_type: &str) -> String {
    let mut chars = c_type.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

type RawLayers = Vec<(String, Vec<(String, Vec<RawTypeEntry>)>)>;

/// The resolved rule set of one type configuration file.
#[derive(Debug, Clone, Default)]
pub struct TypeRules {
    layers: Vec<(String, Vec<(String, Vec<TypeConfig>)>)>,
    globals: BTreeMap<String, TypeConfig>,
    default: Option<TypeConfig>,
    diagram: Option<TypeConfig>,
    polarion_types: BTreeSet<String>,
    type_prefix: String,
}

impl TypeRules {
    /// Load and process a YAML rules file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or is invalid.
    pub fn from_path(path: &Path, type_prefix: &str, role_prefix: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, type_prefix, role_prefix)
    }

    /// Parse and process YAML rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the YAML is malformed, an entry does not
    /// validate or a serializer is unknown.
    pub fn from_yaml_str(text: &str, type_prefix: &str, role_prefix: &str) -> Result<Self, ConfigError> {
        let mut raw_layers = parse_layers(serde_yaml::from_str(text)?)?;
        let mut rules = Self {
            type_prefix: type_prefix.to_string(),
            ..Self::default()
        };
        let builder = EntryBuilder {
            type_prefix,
            role_prefix,
        };

        let mut global_types = match raw_layers.iter().position(|(layer, _)| layer == WILDCARD) {
            Some(idx) => raw_layers.remove(idx).1,
            None => Vec::new(),
        };

        if let Some(entries) = take_type(&mut global_types, WILDCARD) {
            let mut default = builder.build(first_entry(entries, WILDCARD), WILDCARD, WILDCARD, None)?;
            default.p_type.clear();
            rules.default = Some(default);
        }

        if let Some(entries) = take_type(&mut global_types, DIAGRAM_TYPE) {
            let diagram = builder.build(
                first_entry(entries, DIAGRAM_TYPE),
                WILDCARD,
                DIAGRAM_TYPE,
                rules.default.as_ref(),
            )?;
            rules.register_type(&diagram.p_type);
            rules.diagram = Some(diagram);
        }

        for (c_type, entries) in global_types {
            let global = builder.build(first_entry(entries, &c_type), WILDCARD, &c_type, rules.default.as_ref())?;
            rules.register_type(&global.p_type);
            rules.globals.insert(c_type, global);
        }

        for (layer, types) in raw_layers {
            let mut processed_types = Vec::with_capacity(types.len());
            for (c_type, entries) in types {
                let parent = rules.globals.get(&c_type).or(rules.default.as_ref());
                let mut processed = entries
                    .into_iter()
                    .map(|entry| builder.build(entry, &layer, &c_type, parent))
                    .collect::<Result<Vec<_>, _>>()?;
                processed.sort_by_key(TypeConfig::rank);
                for entry in &processed {
                    rules.polarion_types.insert(entry.p_type.clone());
                }
                processed_types.push((c_type, processed));
            }
            rules.layers.push((layer, processed_types));
        }
        rules.polarion_types.remove("");

        Ok(rules)
    }

    fn register_type(&mut self, p_type: &str) {
        if !p_type.is_empty() {
            self.polarion_types.insert(p_type.to_string());
        }
    }

    /// The most specific configuration for an element, or `None`.
    #[must_use]
    pub fn get_type_config(&self, layer: &str, c_type: &str, traits: &ElementTraits) -> Option<TypeConfig> {
        let layer_entries = self
            .layers
            .iter()
            .find(|(name, _)| name == layer)
            .and_then(|(_, types)| types.iter().find(|(name, _)| name == c_type))
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or_default();
        if let Some(found) = layer_entries.iter().find(|entry| entry.matches(traits)) {
            return Some(found.clone());
        }
        if let Some(global) = self.globals.get(c_type).filter(|global| global.matches(traits)) {
            return Some(global.clone());
        }
        self.default.as_ref().map(|default| {
            let mut resolved = default.clone();
            if resolved.p_type.is_empty() && c_type != WILDCARD && c_type != DIAGRAM_TYPE {
                resolved.p_type = prefix_id(&default_type_id(c_type), &self.type_prefix);
            }
            resolved
        })
    }

    #[must_use]
    pub fn contains(&self, layer: &str, c_type: &str, traits: &ElementTraits) -> bool {
        self.get_type_config(layer, c_type, traits).is_some()
    }

    #[must_use]
    pub const fn diagram_config(&self) -> Option<&TypeConfig> {
        self.diagram.as_ref()
    }

    #[must_use]
    pub const fn default_config(&self) -> Option<&TypeConfig> {
        self.default.as_ref()
    }

    /// Every tracker type named by the rules, used to scope remote queries.
    #[must_use]
    pub const fn polarion_types(&self) -> &BTreeSet<String> {
        &self.polarion_types
    }

    /// Unique `(layer, type)` pairs to search the model for.
    ///
    /// Layer entries come first, followed by every global type for each
    /// configured layer that does not configure that type itself.
    #[must_use]
    pub fn layers_and_types(&self) -> Vec<(String, String)> {
        let mut seen = BTreeSet::new();
        let mut pairs = Vec::new();
        for (layer, types) in &self.layers {
            for (c_type, _) in types {
                if seen.insert((layer.clone(), c_type.clone())) {
                    pairs.push((layer.clone(), c_type.clone()));
                }
            }
        }
        for (layer, _) in &self.layers {
            for c_type in self.globals.keys() {
                if seen.insert((layer.clone(), c_type.clone())) {
                    pairs.push((layer.clone(), c_type.clone()));
                }
            }
        }
        pairs
    }

    /// Every processed entry as `(layer, type, config)`, ranked within a
    /// type. Global entries are listed under the `*` layer.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &TypeConfig)> {
        let layered = self.layers.iter().flat_map(|(layer, types)| {
            types.iter().flat_map(move |(c_type, entries)| {
                entries
                    .iter()
                    .map(move |entry| (layer.as_str(), c_type.as_str(), entry))
            })
        });
        let globals = self
            .globals
            .iter()
            .map(|(c_type, entry)| (WILDCARD, c_type.as_str(), entry));
        layered.chain(globals)
    }
}

struct EntryBuilder<'a> {
    type_prefix: &'a str,
    role_prefix: &'a str,
}

impl EntryBuilder<'_> {
    fn build(
        &self,
        raw: RawTypeEntry,
        layer: &str,
        c_type: &str,
        parent: Option<&TypeConfig>,
    ) -> Result<TypeConfig, ConfigError> {
        let mut links: Vec<LinkConfig> = Vec::new();
        for link in raw.links.into_iter().map(|link| link.process(self.role_prefix)) {
            match links.iter_mut().find(|l| l.capella_attr == link.capella_attr) {
                Some(existing) => *existing = link,
                None => links.push(link),
            }
        }
        if let Some(parent) = parent {
            for link in &parent.links {
                if !links.iter().any(|l| l.capella_attr == link.capella_attr) {
                    links.push(link.clone());
                }
            }
        }
        if c_type == DIAGRAM_TYPE {
            links.retain(|link| {
                let available = link.capella_attr == DIAGRAM_ELEMENTS || link.capella_attr == DESCRIPTION_REFERENCE;
                if !available {
                    warn!(attribute = %link.capella_attr, c_type, "link attribute is not available on type, link ignored");
                }
                available
            });
        }

        let mut serializers = parent.map(|p| p.serializers.clone()).unwrap_or_default();
        for (key, params) in normalize_serializers(raw.serializer).map_err(|message| ConfigError::Entry {
            layer: layer.to_string(),
            c_type: c_type.to_string(),
            message,
        })? {
            let serializer = SerializerConfig::parse(&key, params)?;
            match serializers.iter_mut().find(|s| s.key == serializer.key) {
                Some(existing) => *existing = serializer,
                None => serializers.push(serializer),
            }
        }

        let p_type = match raw.polarion_type.filter(|t| !t.is_empty()) {
            Some(own) => prefix_id(&own, self.type_prefix),
            None => match parent.map(|p| p.p_type.as_str()).filter(|t| !t.is_empty()) {
                Some(inherited) => inherited.to_string(),
                None if c_type != WILDCARD && c_type != DIAGRAM_TYPE => {
                    prefix_id(&default_type_id(c_type), self.type_prefix)
                }
                None => String::new(),
            },
        };

        Ok(TypeConfig {
            p_type,
            serializers,
            links,
            is_actor: raw.is_actor,
            nature: raw.nature,
        })
    }
}

/// `name`, `[names]` or `{name: params}` -> ordered `(name, params)` pairs.
fn normalize_serializers(value: Yaml) -> Result<Vec<(String, Yaml)>, String> {
    match value {
        Yaml::Null => Ok(Vec::new()),
        Yaml::String(name) => Ok(vec![(name, Yaml::Null)]),
        Yaml::Sequence(names) => names
            .into_iter()
            .map(|name| match name {
                Yaml::String(name) => Ok((name, Yaml::Null)),
                _ => Err("serializer list must contain only strings".to_string()),
            })
            .collect(),
        Yaml::Mapping(map) => map
            .into_iter()
            .map(|(name, params)| match name {
                Yaml::String(name) => Ok((name, params)),
                _ => Err("serializer names must be strings".to_string()),
            })
            .collect(),
        _ => Err("serializer must be a string, a list or a mapping".to_string()),
    }
}

fn first_entry(mut entries: Vec<RawTypeEntry>, c_type: &str) -> RawTypeEntry {
    if entries.len() > 1 {
        warn!(c_type, "multiple global configurations found, using the first one");
    }
    if entries.is_empty() {
        RawTypeEntry::default()
    } else {
        entries.swap_remove(0)
    }
}

fn take_type(types: &mut Vec<(String, Vec<RawTypeEntry>)>, c_type: &str) -> Option<Vec<RawTypeEntry>> {
    let idx = types.iter().position(|(name, _)| name == c_type)?;
    Some(types.remove(idx).1)
}

fn parse_layers(root: Yaml) -> Result<RawLayers, ConfigError> {
    let layers = match root {
        Yaml::Null => return Ok(Vec::new()),
        Yaml::Mapping(layers) => layers,
        _ => {
            return Err(ConfigError::Shape(
                "the root must be a mapping of layers".to_string(),
            ));
        }
    };

    let mut out = Vec::with_capacity(layers.len());
    for (layer, types) in layers {
        let Yaml::String(layer) = layer else {
            return Err(ConfigError::Shape("layer names must be strings".to_string()));
        };
        let types = match types {
            Yaml::Null => serde_yaml::Mapping::new(),
            Yaml::Mapping(types) => types,
            _ => {
                return Err(ConfigError::Shape(format!(
                    "layer {layer:?} configuration must be a mapping"
                )));
            }
        };

        let mut processed = Vec::with_capacity(types.len());
        for (c_type, entry) in types {
            let Yaml::String(c_type) = c_type else {
                return Err(ConfigError::Shape(format!("type names in layer {layer:?} must be strings")));
            };
            let entry_error = |message: String| ConfigError::Entry {
                layer: layer.clone(),
                c_type: c_type.clone(),
                message,
            };
            let entries = match entry {
                Yaml::Null => vec![RawTypeEntry::default()],
                Yaml::Mapping(_) => {
                    vec![serde_yaml::from_value(entry).map_err(|e| entry_error(e.to_string()))?]
                }
                Yaml::Sequence(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        if item.is_mapping() {
                            serde_yaml::from_value(item).map_err(|e| entry_error(e.to_string()))
                        } else {
                            Err(entry_error(format!("item {idx} must be a mapping")))
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => {
                    return Err(entry_error(
                        "config must be a mapping, a list or null".to_string(),
                    ));
                }
            };
            processed.push((c_type, entries));
        }
        out.push((layer, processed));
    }
    Ok(out)
}
