//! Work item links and grouped link fields.
//!
//! Links are computed per element from its link rules. Grouped fields
//! render the links of one role as an HTML list on the primary work item
//! (`link_field`) and, once every primary is processed, on each secondary
//! work item (`reverse_field`).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, warn};

use super::html::link_field_list;
use super::{ConverterData, ConverterSession};
use crate::config::{DESCRIPTION_REFERENCE, DIAGRAM_ELEMENTS, LinkConfig};
use crate::context::RunContext;
use crate::identity::IdentityRepository;
use crate::model::{AttributeValue, Link, TextContent, WorkItem};
use crate::pool::{self, PoolError};
use crate::source::{AttrValue, ModelObject, ModelSource};

/// Links pointing at a work item: `secondary id -> reverse field -> links`.
pub type BackLinks = BTreeMap<String, BTreeMap<String, Vec<Link>>>;

/// Links of one element and the errors met computing them.
///
/// Each error names the requested attribute followed by the reason.
#[derive(Debug, Default)]
pub struct LinkOutcome {
    pub links: Vec<Link>,
    pub errors: Vec<String>,
}

/// Forward fields of one work item and the back links they imply.
#[derive(Debug, Default)]
pub struct GroupedFields {
    pub fields: BTreeMap<String, AttributeValue>,
    pub back_links: BackLinks,
}

/// Computes links of serialized elements.
pub struct LinkSerializer<'a> {
    repo: &'a IdentityRepository,
    model: &'a dyn ModelSource,
    project_id: &'a str,
}

impl<'a> LinkSerializer<'a> {
    #[must_use]
    pub fn new(repo: &'a IdentityRepository, model: &'a dyn ModelSource, project_id: &'a str) -> Self {
        Self {
            repo,
            model,
            project_id,
        }
    }

    /// All links of the element `uuid`, deduplicated and sorted.
    ///
    /// Elements without a work item or without a remote id have no links.
    #[must_use]
    pub fn create_links(&self, uuid: &str, data: &ConverterData) -> LinkOutcome {
        let Some(primary) = data.work_item.as_ref().and_then(|item| item.id.as_deref()) else {
            return LinkOutcome::default();
        };
        let obj = match self.model.by_uuid(uuid) {
            Ok(obj) => obj,
            Err(err) => {
                return LinkOutcome {
                    links: Vec::new(),
                    errors: vec![err.to_string()],
                };
            }
        };

        let mut links = BTreeSet::new();
        let mut errors = Vec::new();
        for config in &data.type_config.links {
            let targets = match config.capella_attr.as_str() {
                DESCRIPTION_REFERENCE => Ok(data.description_references.clone()),
                DIAGRAM_ELEMENTS => self.diagram_elements(obj),
                path => self.attribute_targets(obj, path),
            };
            match targets {
                Ok(targets) => {
                    for target in targets {
                        match self.work_item_id(&target, config, primary) {
                            Ok(Some(secondary)) => {
                                links.insert(Link::new(primary, secondary, &config.polarion_role, self.project_id));
                            }
                            Ok(None) => {}
                            Err(message) => errors.push(link_error(&config.capella_attr, &message)),
                        }
                    }
                }
                Err(message) => errors.push(link_error(&config.capella_attr, &message)),
            }
        }

        let links: Vec<Link> = links.into_iter().collect();
        if !errors.is_empty() {
            let joined = errors.join("\n\t");
            let short = obj.short_repr();
            if links.is_empty() {
                error!("Link creation for {short} failed:\n\t{joined}");
            } else {
                warn!("Link creation for {short} partially successful. Some links were not created:\n\t{joined}");
            }
        }
        LinkOutcome { links, errors }
    }

    /// Forward fields for every link role of `data`, plus the back links
    /// they imply on secondaries.
    #[must_use]
    pub fn grouped_link_fields(&self, data: &ConverterData) -> GroupedFields {
        let mut grouped = GroupedFields::default();
        let Some(item) = data.work_item.as_ref() else {
            return grouped;
        };
        for config in &data.type_config.links {
            let links: Vec<&Link> = item
                .linked_items
                .iter()
                .filter(|link| link.role == config.polarion_role)
                .collect();
            if links.is_empty() {
                continue;
            }

            let mut link_map = BTreeMap::new();
            for link in &links {
                link_map.insert(link.secondary_id.clone(), self.includes(&link.secondary_id, config));
                grouped
                    .back_links
                    .entry(link.secondary_id.clone())
                    .or_default()
                    .entry(config.reverse_field.clone())
                    .or_default()
                    .push((*link).clone());
            }
            grouped
                .fields
                .insert(config.link_field.clone(), link_field_value(&link_map));
        }
        grouped
    }

    /// Reverse fields of `item`, listing the primaries linking to it.
    #[must_use]
    pub fn back_link_fields(
        &self,
        item: &WorkItem,
        links_by_field: &BTreeMap<String, Vec<Link>>,
    ) -> BTreeMap<String, AttributeValue> {
        debug!(work_item = %item.label(), fields = links_by_field.len(), "rendering reverse link fields");
        links_by_field
            .iter()
            .map(|(field, links)| {
                let link_map = links
                    .iter()
                    .map(|link| (link.primary_id.clone(), Vec::new()))
                    .collect();
                (field.clone(), link_field_value(&link_map))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Target resolution
    // -----------------------------------------------------------------------

    /// Element ids behind a dotted attribute path, mapping through lists.
    fn attribute_targets(&self, obj: ModelObject<'_>, path: &str) -> Result<Vec<String>, String> {
        let mut current = vec![obj.uuid().to_string()];
        for segment in path.split('.') {
            let mut next = Vec::new();
            for uuid in &current {
                let holder = self.model.by_uuid(uuid).map_err(|err| err.to_string())?;
                match holder.attribute(segment) {
                    None => {
                        return Err(format!(
                            "Attribute {segment:?} not found on {}",
                            holder.short_repr()
                        ));
                    }
                    Some(AttrValue::Null) => {
                        info!(
                            "For model element {} attribute \"{segment}\" is not set",
                            holder.short_repr()
                        );
                    }
                    Some(value) => next.extend(value.refs().into_iter().map(str::to_string)),
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Elements shown on a diagram; parts stand for their type.
    fn diagram_elements(&self, obj: ModelObject<'_>) -> Result<Vec<String>, String> {
        let ModelObject::Diagram(diagram) = obj else {
            return Err(format!("{DIAGRAM_ELEMENTS} is only available on diagrams"));
        };
        Ok(diagram
            .nodes
            .iter()
            .map(|node| {
                let part_type = self
                    .model
                    .by_uuid(node)
                    .ok()
                    .and_then(|found| found.as_element())
                    .filter(|element| element.type_name == "Part")
                    .and_then(|element| element.attribute("type"))
                    .and_then(|value| value.refs().first().map(|uuid| (*uuid).to_string()));
                part_type.unwrap_or_else(|| node.clone())
            })
            .collect())
    }

    fn work_item_id(
        &self,
        uuid: &str,
        config: &LinkConfig,
        primary: &str,
    ) -> Result<Option<String>, String> {
        if let Some(id) = self.repo.lookup_remote_id(uuid) {
            return Ok(Some(id.to_string()));
        }
        let target = self.model.by_uuid(uuid).map_err(|err| err.to_string())?;
        info!(
            "Unable to create work item link {:?} for [{primary}]. Couldn't identify work item for {}",
            config.polarion_role,
            target.short_repr()
        );
        Ok(None)
    }

    /// `(display name, ids)` of the include attributes of a link target.
    fn includes(&self, secondary_id: &str, config: &LinkConfig) -> Vec<(String, Vec<String>)> {
        if config.include.is_empty() {
            return Vec::new();
        }
        let Some(target) = self
            .repo
            .lookup_local_id(secondary_id)
            .and_then(|uuid| self.model.by_uuid(uuid).ok())
        else {
            return Vec::new();
        };
        config
            .include
            .iter()
            .map(|(display, attr)| {
                let ids = target
                    .attribute(attr)
                    .map(|value| {
                        value
                            .refs()
                            .into_iter()
                            .filter_map(|uuid| self.repo.lookup_remote_id(uuid))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (display.clone(), ids)
            })
            .collect()
    }
}

fn link_error(attr: &str, message: &str) -> String {
    format!("Requested attribute: {attr:?}\n\t{message}\n\t--------")
}

fn link_field_value(link_map: &BTreeMap<String, Vec<(String, Vec<String>)>>) -> AttributeValue {
    TextContent::html(link_field_list(link_map)).into()
}

/// Store computed links on the work item of `data`.
pub fn apply_links(data: &mut ConverterData, outcome: LinkOutcome) {
    if let Some(item) = data.work_item.as_mut() {
        item.linked_items = outcome.links;
    }
    data.link_errors = outcome.errors;
}

pub fn merge_back_links(into: &mut BackLinks, from: BackLinks) {
    for (secondary, fields) in from {
        let entry = into.entry(secondary).or_default();
        for (field, links) in fields {
            entry.entry(field).or_default().extend(links);
        }
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Links and grouped fields for the whole session on the calling thread.
pub fn generate_sequential(serializer: &LinkSerializer<'_>, session: &mut ConverterSession, grouped: bool) {
    for (uuid, data) in session.iter_mut() {
        let outcome = serializer.create_links(uuid, data);
        apply_links(data, outcome);
    }
    if !grouped {
        return;
    }

    let mut back_links = BackLinks::new();
    for data in session.values_mut() {
        let fields = serializer.grouped_link_fields(data);
        if let Some(item) = data.work_item.as_mut() {
            item.additional_attributes.extend(fields.fields);
        }
        merge_back_links(&mut back_links, fields.back_links);
    }
    apply_back_links(serializer, session, &back_links);
}

fn apply_back_links(serializer: &LinkSerializer<'_>, session: &mut ConverterSession, back_links: &BackLinks) {
    for data in session.values_mut() {
        let Some(item) = data.work_item.as_mut() else {
            continue;
        };
        let Some(links) = item.id.as_deref().and_then(|id| back_links.get(id)) else {
            continue;
        };
        let fields = serializer.back_link_fields(item, links);
        item.additional_attributes.extend(fields);
    }
}

/// The sequential result, computed in three pool phases.
///
/// Links, then forward fields, then reverse fields; each phase runs on the
/// pool and its results are merged on the calling thread before the next
/// phase starts.
///
/// # Errors
///
/// Returns [`PoolError`] if a worker panicked; the session may then hold a
/// partial result and must be regenerated.
pub fn generate_parallel(
    ctx: &RunContext,
    serializer: &LinkSerializer<'_>,
    session: &mut ConverterSession,
    grouped: bool,
    max_workers: usize,
) -> Result<(), PoolError> {
    let targets: Vec<(&String, &ConverterData)> = session
        .iter()
        .filter(|(_, data)| data.work_item.is_some())
        .collect();
    debug!(work_items = targets.len(), "creating links in parallel");
    let created = pool::map_parallel(ctx, targets, max_workers, |(uuid, data)| {
        (uuid.clone(), serializer.create_links(uuid, data))
    })?;
    for (uuid, outcome) in created {
        if let Some(data) = session.get_mut(&uuid) {
            apply_links(data, outcome);
        }
    }
    if !grouped {
        return Ok(());
    }

    let targets: Vec<(&String, &ConverterData)> = session
        .iter()
        .filter(|(_, data)| data.work_item.is_some())
        .collect();
    let forward = pool::map_parallel(ctx, targets, max_workers, |(uuid, data)| {
        (uuid.clone(), serializer.grouped_link_fields(data))
    })?;
    let mut back_links = BackLinks::new();
    for (uuid, fields) in forward {
        if let Some(item) = session.get_mut(&uuid).and_then(|data| data.work_item.as_mut()) {
            item.additional_attributes.extend(fields.fields);
        }
        merge_back_links(&mut back_links, fields.back_links);
    }

    let targets: Vec<(&String, &WorkItem, &BTreeMap<String, Vec<Link>>)> = session
        .iter()
        .filter_map(|(uuid, data)| {
            let item = data.work_item.as_ref()?;
            let links = back_links.get(item.id.as_deref()?)?;
            Some((uuid, item, links))
        })
        .collect();
    let reverse = pool::map_parallel(ctx, targets, max_workers, |(uuid, item, links)| {
        (uuid.clone(), serializer.back_link_fields(item, links))
    })?;
    for (uuid, fields) in reverse {
        if let Some(item) = session.get_mut(&uuid).and_then(|data| data.work_item.as_mut()) {
            item.additional_attributes.extend(fields);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeRules;
    use crate::source::SnapshotModel;

    const MODEL: &str = r#"{
        "elements": [
            {"uuid": "f1", "name": "Brake", "type": "Function", "layer": "sa",
             "attributes": {"outputs": [{"ref": "x1"}, {"ref": "x2"}], "owner": null}},
            {"uuid": "x1", "name": "out1", "type": "Exchange", "layer": "sa",
             "attributes": {"target": {"ref": "f2"}, "items": [{"ref": "i1"}]}},
            {"uuid": "x2", "name": "out2", "type": "Exchange", "layer": "sa",
             "attributes": {"target": {"ref": "f3"}, "items": []}},
            {"uuid": "f2", "name": "Stop", "type": "Function", "layer": "sa",
             "attributes": {"outputs": [], "owner": {"ref": "ghost"}}},
            {"uuid": "f3", "name": "Skid", "type": "Function", "layer": "sa",
             "attributes": {"outputs": [], "owner": null}},
            {"uuid": "i1", "name": "pressure", "type": "ExchangeItem", "layer": "sa"},
            {"uuid": "p1", "name": "brake part", "type": "Part", "layer": "sa",
             "attributes": {"type": {"ref": "f2"}}}
        ],
        "diagrams": [{"uuid": "d1", "name": "Overview", "layer": "sa", "nodes": ["p1", "f1"]}]
    }"#;

    const RULES: &str = r#"
"*":
  Diagram:
    links: [diagram_elements]
sa:
  Function:
    links:
      - capella_attr: outputs
        polarion_role: output_exchanges
        include: {Exchange Items: items}
      - outputs.target
      - owner
  Exchange: {}
"#;

    fn session(model: &SnapshotModel, repo: &IdentityRepository) -> ConverterSession {
        session_with(model, repo, RULES)
    }

    fn session_with(model: &SnapshotModel, repo: &IdentityRepository, rules: &str) -> ConverterSession {
        let rules = TypeRules::from_yaml_str(rules, "", "").expect("valid rules");
        let mut session = ConverterSession::new();
        for element in model.elements() {
            if let Some(config) = rules.get_type_config(&element.layer, &element.type_name, &element.traits()) {
                let mut data = ConverterData::new(&element.layer, &element.type_name, config);
                data.work_item = repo
                    .get_snapshot(&element.uuid)
                    .cloned()
                    .or_else(|| Some(WorkItem::new(&element.uuid, "x", &element.name)));
                session.insert(element.uuid.clone(), data);
            }
        }
        let mut diagram = ConverterData::new(
            "sa",
            "Diagram",
            rules.diagram_config().expect("diagram config").clone(),
        );
        diagram.work_item = repo.get_snapshot("d1").cloned();
        session.insert("d1".to_string(), diagram);
        session
    }

    fn repo() -> IdentityRepository {
        IdentityRepository::from_items(
            [("f1", "P-1"), ("f2", "P-2"), ("f3", "P-3"), ("x1", "P-4"), ("i1", "P-5"), ("d1", "P-6")]
                .into_iter()
                .map(|(local, remote)| WorkItem::new(local, "x", local).with_id(remote)),
        )
        .expect("ids are set")
    }

    fn linked(session: &ConverterSession, uuid: &str) -> Vec<(String, String)> {
        session[uuid]
            .work_item
            .as_ref()
            .expect("work item")
            .linked_items
            .iter()
            .map(|link| (link.role.clone(), link.secondary_id.clone()))
            .collect()
    }

    #[test]
    fn attribute_paths_map_through_lists() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut session = session(&model, &repo);
        generate_sequential(&serializer, &mut session, false);

        assert_eq!(
            linked(&session, "f1"),
            vec![
                ("output_exchanges".to_string(), "P-4".to_string()),
                ("outputs.target".to_string(), "P-2".to_string()),
                ("outputs.target".to_string(), "P-3".to_string()),
            ]
        );
        assert!(session["f1"].link_errors.is_empty(), "unmapped x2 is only omitted");
        assert!(session["f1"].work_item.as_ref().expect("item").linked_items[0].secondary_project == "PROJ");
    }

    #[test]
    fn reserved_link_names_only_match_themselves() {
        const RESERVED: &str = r#"
"*":
  Diagram:
    links: [diagram_elements]
sa:
  Function:
    links: [description_reference, outputs.target]
"#;
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut session = session_with(&model, &repo, RESERVED);
        session.get_mut("f1").expect("f1").description_references = vec!["f3".to_string()];
        generate_sequential(&serializer, &mut session, false);

        let mut links = linked(&session, "f1");
        links.sort();
        assert_eq!(
            links,
            vec![
                ("description_reference".to_string(), "P-3".to_string()),
                ("outputs.target".to_string(), "P-2".to_string()),
                ("outputs.target".to_string(), "P-3".to_string()),
            ]
        );
        assert!(linked(&session, "f2").is_empty(), "outputs.target walks the model attribute");
    }

    #[test]
    fn unknown_targets_are_link_errors() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut session = session(&model, &repo);
        generate_sequential(&serializer, &mut session, false);

        let errors = &session["f2"].link_errors;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Requested attribute: \"owner\"\n\t"));
        assert!(errors[0].contains("ghost"));
    }

    #[test]
    fn diagram_parts_resolve_to_their_type() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut session = session(&model, &repo);
        generate_sequential(&serializer, &mut session, false);

        assert_eq!(
            linked(&session, "d1"),
            vec![
                ("diagram_elements".to_string(), "P-1".to_string()),
                ("diagram_elements".to_string(), "P-2".to_string()),
            ]
        );
    }

    #[test]
    fn grouped_fields_are_symmetric() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut session = session(&model, &repo);
        generate_sequential(&serializer, &mut session, true);

        let field = |uuid: &str, name: &str| {
            session[uuid]
                .work_item
                .as_ref()
                .expect("work item")
                .additional_attributes
                .get(name)
                .and_then(AttributeValue::as_text)
                .map(|text| text.value.clone())
        };
        let forward = field("f1", "output_exchanges").expect("forward field");
        assert!(forward.contains(r#"data-item-id="P-4""#));
        assert!(forward.contains("<div>Exchange Items:</div>"));
        assert!(forward.contains(r#"data-item-id="P-5""#));

        let reverse = field("x1", "output_exchanges_reverse").expect("reverse field");
        assert!(reverse.contains(r#"data-item-id="P-1""#));
        assert!(field("f2", "outputs.target_reverse").is_some());
        assert!(field("f1", "owner").is_none(), "no links, no field");
    }

    #[test]
    fn parallel_generation_matches_sequential() {
        let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
        let repo = repo();
        let serializer = LinkSerializer::new(&repo, &model, "PROJ");
        let mut sequential = session(&model, &repo);
        generate_sequential(&serializer, &mut sequential, true);
        let mut parallel = session(&model, &repo);
        generate_parallel(&RunContext::detached(), &serializer, &mut parallel, true, 3).expect("no panics");

        for (uuid, data) in &sequential {
            let left = data.work_item.as_ref().map(|item| (&item.linked_items, &item.additional_attributes));
            let right = parallel[uuid]
                .work_item
                .as_ref()
                .map(|item| (&item.linked_items, &item.additional_attributes));
            assert_eq!(left, right, "{uuid}");
        }
    }
}
