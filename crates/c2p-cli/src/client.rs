//! Blocking Polarion REST v1 client.
//!
//! Speaks the JSON:API dialect of `/polarion/rest/v1`. Work items, links,
//! attachments and documents are mapped onto the `c2p_core` model; paging
//! is followed until the server stops returning a `next` link.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use c2p_core::config::TrackerConnection;
use c2p_core::model::attachment::{MIME_PNG, MIME_SVG};
use c2p_core::model::{
    Attachment, AttributeValue, CHECKSUM_ATTRIBUTE, Document, LOCAL_ID_ATTRIBUTE, LazyContent, Link,
    RenderingLayout, TextContent, WorkItem,
};
use c2p_core::tracker::{ApiError, TrackerClient, group_links_by_primary};
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

const API_PATH: &str = "/polarion/rest/v1";
const PAGE_SIZE: usize = 100;
/// Longest response excerpt kept in an [`ApiError`].
const ERROR_BODY_LIMIT: usize = 512;

/// Attributes the tracker manages itself; never diffed as custom fields.
const BUILT_IN_ATTRIBUTES: &[&str] = &[
    "id",
    "title",
    "type",
    "status",
    "description",
    "created",
    "updated",
    "outlineNumber",
    "hyperlinks",
    "resolution",
    "resolvedOn",
    "priority",
    "severity",
    "dueDate",
    "plannedStart",
    "plannedEnd",
    "initialEstimate",
    "remainingEstimate",
    "timeSpent",
];

/// A [`TrackerClient`] for one Polarion project.
pub struct PolarionClient {
    agent: ureq::Agent,
    base_url: String,
    project_id: String,
    token: Option<String>,
}

impl PolarionClient {
    pub fn new(connection: &TrackerConnection) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("c2p/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: format!("{}{API_PATH}", connection.url),
            project_id: connection.project_id.clone(),
            token: connection.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{}{path}", self.base_url, self.project_id)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let request = self.agent.request(method, url).set("Accept", "application/json");
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    /// Issue a request and decode the JSON answer, `None` for empty bodies.
    fn send(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let mut request = self.request(method, url);
        for (key, value) in query {
            request = request.query(key, value);
        }
        trace!(method, url, "tracker request");
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        read_response(response)
    }

    fn send_multipart(&self, method: &str, url: &str, form: &Multipart) -> Result<Option<Value>, ApiError> {
        let response = self
            .request(method, url)
            .set("Content-Type", &form.content_type())
            .send_bytes(&form.body);
        read_response(response)
    }

    /// Follow `links.next` and collect every `data` resource.
    fn get_paged(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<Value>, ApiError> {
        let mut resources = Vec::new();
        for page in 1.. {
            let mut paged = query.to_vec();
            paged.push(("page[size]", PAGE_SIZE.to_string()));
            paged.push(("page[number]", page.to_string()));
            let Some(mut answer) = self.send("GET", url, &paged, None)? else {
                break;
            };
            let data = match answer.get_mut("data").map(Value::take) {
                Some(Value::Array(data)) => data,
                _ => Vec::new(),
            };
            let count = data.len();
            resources.extend(data);
            let has_next = answer.pointer("/links/next").is_some_and(|next| !next.is_null());
            if !has_next || count < PAGE_SIZE {
                break;
            }
        }
        Ok(resources)
    }

    fn work_item_url(&self, id: &str) -> String {
        self.url(&format!("/workitems/{id}"))
    }

    fn document_url(&self, space: &str, name: &str) -> String {
        self.url(&format!("/spaces/{space}/documents/{name}"))
    }

    fn upload_attachments(&self, work_item_id: &str, attachments: &mut [Attachment]) -> Result<(), ApiError> {
        if attachments.is_empty() {
            return Ok(());
        }
        let resources: Vec<Value> = attachments
            .iter()
            .map(|attachment| {
                json!({
                    "type": "workitem_attachments",
                    "attributes": {"fileName": attachment.file_name, "title": attachment.title},
                })
            })
            .collect();
        let mut form = Multipart::new(&json!({ "data": resources }));
        for attachment in attachments.iter() {
            form.add_file(&attachment.file_name, &attachment.mime_type, attachment.content());
        }
        form.finish();

        let answer = self.send_multipart("POST", &self.url(&format!("/workitems/{work_item_id}/attachments")), &form)?;
        let ids = created_ids(answer.as_ref());
        if ids.len() != attachments.len() {
            return Err(ApiError::new(
                None,
                format!("expected {} attachment ids, got {}", attachments.len(), ids.len()),
            ));
        }
        for (attachment, id) in attachments.iter_mut().zip(ids) {
            attachment.id = Some(id);
            attachment.work_item_id = Some(work_item_id.to_string());
        }
        Ok(())
    }
}

impl TrackerClient for PolarionClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn project_exists(&self) -> Result<bool, ApiError> {
        match self.send("GET", &self.url(""), &[], None) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn get_all_work_items(&self, query: &str, fields: &str) -> Result<Vec<WorkItem>, ApiError> {
        let resources = self.get_paged(
            &self.url("/workitems"),
            &[("query", query.to_string()), ("fields[workitems]", fields.to_string())],
        )?;
        debug!(count = resources.len(), query, "fetched work items");
        Ok(resources.iter().map(work_item_from_resource).collect())
    }

    fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, ApiError> {
        let answer = match self.send(
            "GET",
            &self.work_item_url(id),
            &[
                ("fields[workitems]", "@all".to_string()),
                ("fields[linkedworkitems]", "id,role".to_string()),
            ],
            None,
        ) {
            Ok(answer) => answer,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(resource) = answer.as_ref().and_then(|answer| answer.get("data")) else {
            return Ok(None);
        };
        let mut item = work_item_from_resource(resource);
        item.attachments = self.get_all_work_item_attachments(id)?;
        Ok(Some(item))
    }

    fn create_work_items(&self, items: &mut [WorkItem]) -> Result<(), ApiError> {
        let resources: Vec<Value> = items
            .iter()
            .map(|item| json!({"type": "workitems", "attributes": work_item_attributes(item)}))
            .collect();
        let answer = self.send("POST", &self.url("/workitems"), &[], Some(&json!({ "data": resources })))?;
        let ids = created_ids(answer.as_ref());
        if ids.len() != items.len() {
            return Err(ApiError::new(
                None,
                format!("expected {} work item ids, got {}", items.len(), ids.len()),
            ));
        }

        for (item, id) in items.iter_mut().zip(ids) {
            for link in &mut item.linked_items {
                link.primary_id.clone_from(&id);
            }
            for attachment in &mut item.attachments {
                attachment.work_item_id = Some(id.clone());
            }
            item.id = Some(id);
        }
        for item in items.iter_mut() {
            let Some(id) = item.id.clone() else { continue };
            self.upload_attachments(&id, &mut item.attachments)?;
            if !item.linked_items.is_empty() {
                self.create_work_item_links(&item.linked_items)?;
            }
        }
        Ok(())
    }

    fn update_work_item(&self, item: &WorkItem) -> Result<(), ApiError> {
        let Some(id) = item.id.as_deref() else {
            return Err(ApiError::new(None, format!("work item {} has no id", item.local_id)));
        };
        let body = json!({"data": work_item_update_resource(&self.project_id, id, item)});
        self.send("PATCH", &self.work_item_url(id), &[], Some(&body))?;
        Ok(())
    }

    fn update_work_items(&self, items: &[WorkItem]) -> Result<(), ApiError> {
        let mut resources = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = item.id.as_deref() else {
                return Err(ApiError::new(None, format!("work item {} has no id", item.local_id)));
            };
            resources.push(work_item_update_resource(&self.project_id, id, item));
        }
        if resources.is_empty() {
            return Ok(());
        }
        self.send("PATCH", &self.url("/workitems"), &[], Some(&json!({ "data": resources })))?;
        Ok(())
    }

    fn delete_work_items(&self, ids: &[String]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        let resources: Vec<Value> = ids
            .iter()
            .map(|id| json!({"type": "workitems", "id": format!("{}/{id}", self.project_id)}))
            .collect();
        self.send("DELETE", &self.url("/workitems"), &[], Some(&json!({ "data": resources })))?;
        Ok(())
    }

    fn get_all_work_item_links(&self, id: &str) -> Result<Vec<Link>, ApiError> {
        let resources = self.get_paged(
            &self.url(&format!("/workitems/{id}/linkedworkitems")),
            &[("fields[linkedworkitems]", "id,role".to_string())],
        )?;
        Ok(resources
            .iter()
            .filter_map(|resource| resource.get("id").and_then(Value::as_str))
            .filter_map(parse_link_id)
            .collect())
    }

    fn create_work_item_links(&self, links: &[Link]) -> Result<(), ApiError> {
        for (primary, group) in group_links_by_primary(links) {
            let resources: Vec<Value> = group
                .iter()
                .map(|link| {
                    json!({
                        "type": "linkedworkitems",
                        "attributes": {"role": link.role},
                        "relationships": {"workItem": {"data": {
                            "type": "workitems",
                            "id": format!("{}/{}", link.secondary_project, link.secondary_id),
                        }}},
                    })
                })
                .collect();
            self.send(
                "POST",
                &self.url(&format!("/workitems/{primary}/linkedworkitems")),
                &[],
                Some(&json!({ "data": resources })),
            )?;
        }
        Ok(())
    }

    fn delete_work_item_links(&self, links: &[Link]) -> Result<(), ApiError> {
        for (primary, group) in group_links_by_primary(links) {
            let resources: Vec<Value> = group
                .iter()
                .map(|link| json!({"type": "linkedworkitems", "id": link_id(&self.project_id, link)}))
                .collect();
            self.send(
                "DELETE",
                &self.url(&format!("/workitems/{primary}/linkedworkitems")),
                &[],
                Some(&json!({ "data": resources })),
            )?;
        }
        Ok(())
    }

    fn get_all_work_item_attachments(&self, work_item_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let resources = self.get_paged(
            &self.url(&format!("/workitems/{work_item_id}/attachments")),
            &[("fields[workitem_attachments]", "id,fileName,title".to_string())],
        )?;
        Ok(resources
            .iter()
            .filter_map(|resource| attachment_from_resource(work_item_id, resource))
            .collect())
    }

    fn create_work_item_attachments(&self, attachments: &mut [Attachment]) -> Result<(), ApiError> {
        let mut by_work_item: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, attachment) in attachments.iter().enumerate() {
            let Some(work_item_id) = attachment.work_item_id.clone() else {
                return Err(ApiError::new(None, format!("attachment {} has no work item", attachment.file_name)));
            };
            by_work_item.entry(work_item_id).or_default().push(idx);
        }
        for (work_item_id, indices) in by_work_item {
            let mut batch: Vec<Attachment> = indices.iter().map(|&idx| attachments[idx].clone()).collect();
            self.upload_attachments(&work_item_id, &mut batch)?;
            for (idx, uploaded) in indices.into_iter().zip(batch) {
                attachments[idx].id = uploaded.id;
            }
        }
        Ok(())
    }

    fn update_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError> {
        let (Some(work_item_id), Some(id)) = (attachment.work_item_id.as_deref(), attachment.id.as_deref()) else {
            return Err(ApiError::new(None, format!("attachment {} is not on the tracker", attachment.file_name)));
        };
        let mut form = Multipart::new(&json!({"data": {
            "type": "workitem_attachments",
            "id": format!("{}/{work_item_id}/{id}", self.project_id),
            "attributes": {"title": attachment.title},
        }}));
        form.add_file(&attachment.file_name, &attachment.mime_type, attachment.content());
        form.finish();
        self.send_multipart(
            "PATCH",
            &self.url(&format!("/workitems/{work_item_id}/attachments/{id}")),
            &form,
        )?;
        Ok(())
    }

    fn delete_work_item_attachment(&self, attachment: &Attachment) -> Result<(), ApiError> {
        let (Some(work_item_id), Some(id)) = (attachment.work_item_id.as_deref(), attachment.id.as_deref()) else {
            return Ok(());
        };
        self.send(
            "DELETE",
            &self.url(&format!("/workitems/{work_item_id}/attachments/{id}")),
            &[],
            None,
        )?;
        Ok(())
    }

    fn get_document(&self, space: &str, name: &str) -> Result<Option<Document>, ApiError> {
        match self.send(
            "GET",
            &self.document_url(space, name),
            &[("fields[documents]", "@all".to_string())],
            None,
        ) {
            Ok(answer) => Ok(answer
                .as_ref()
                .and_then(|answer| answer.get("data"))
                .map(|resource| document_from_resource(space, name, resource))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create_documents(&self, documents: &[Document]) -> Result<(), ApiError> {
        let mut by_space: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for document in documents {
            let mut attributes = document_attributes(document);
            attributes.insert("moduleName".to_string(), json!(document.module_name));
            by_space
                .entry(document.module_folder.as_str())
                .or_default()
                .push(json!({"type": "documents", "attributes": attributes}));
        }
        for (space, resources) in by_space {
            self.send(
                "POST",
                &self.url(&format!("/spaces/{space}/documents")),
                &[],
                Some(&json!({ "data": resources })),
            )?;
        }
        Ok(())
    }

    fn update_documents(&self, documents: &[Document]) -> Result<(), ApiError> {
        for document in documents {
            let body = json!({"data": {
                "type": "documents",
                "id": format!("{}/{}/{}", self.project_id, document.module_folder, document.module_name),
                "attributes": document_attributes(document),
            }});
            self.send(
                "PATCH",
                &self.document_url(&document.module_folder, &document.module_name),
                &[],
                Some(&body),
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn read_response(response: Result<ureq::Response, ureq::Error>) -> Result<Option<Value>, ApiError> {
    match response {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|err| ApiError::transport(format!("failed to read response: {err}")))?;
            if text.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| ApiError::transport(format!("failed to decode response: {err}")))
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(ApiError::new(Some(status), error_message(&body)))
        }
        Err(ureq::Error::Transport(transport)) => Err(ApiError::transport(transport.to_string())),
    }
}

/// The `errors[].detail` of a JSON:API error document, else the raw body.
fn error_message(body: &str) -> String {
    let details: Vec<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("errors").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|err| err.get("detail").and_then(Value::as_str).map(str::to_string))
        .collect();
    if details.is_empty() {
        body.chars().take(ERROR_BODY_LIMIT).collect()
    } else {
        details.join("; ")
    }
}

/// Short ids of the resources in a create response, in request order.
fn created_ids(answer: Option<&Value>) -> Vec<String> {
    answer
        .and_then(|answer| answer.get("data"))
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|resource| resource.get("id").and_then(Value::as_str))
                .map(|id| short_id(id).to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// `PROJ/WI-1` -> `WI-1`.
fn short_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

fn text_content(value: &Value) -> Option<TextContent> {
    serde_json::from_value(value.clone()).ok()
}

fn work_item_from_resource(resource: &Value) -> WorkItem {
    let mut item = WorkItem {
        id: resource.get("id").and_then(Value::as_str).map(|id| short_id(id).to_string()),
        ..WorkItem::default()
    };
    let string = |value: &Value| value.as_str().map(str::to_string);

    if let Some(attributes) = resource.get("attributes").and_then(Value::as_object) {
        for (key, value) in attributes {
            match key.as_str() {
                "title" => item.title = string(value),
                "type" => item.work_item_type = string(value),
                "status" => item.status = string(value),
                "description" => item.description = text_content(value),
                CHECKSUM_ATTRIBUTE => item.checksum = string(value),
                LOCAL_ID_ATTRIBUTE => item.local_id = string(value).unwrap_or_default(),
                key if BUILT_IN_ATTRIBUTES.contains(&key) => {}
                key => {
                    if let Ok(value) = serde_json::from_value::<AttributeValue>(value.clone()) {
                        item.additional_attributes.insert(key.to_string(), value);
                    }
                }
            }
        }
    }

    if let Some(linked) = resource.pointer("/relationships/linkedWorkItems") {
        item.linked_items = linked
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|link| link.get("id").and_then(Value::as_str))
                    .filter_map(parse_link_id)
                    .collect()
            })
            .unwrap_or_default();
        let total = linked
            .pointer("/meta/totalCount")
            .and_then(Value::as_u64)
            .and_then(|total| usize::try_from(total).ok());
        item.linked_items_truncated = total.is_some_and(|total| total > item.linked_items.len());
    }
    item
}

/// Attribute map of `item`; `None` fields are left out.
fn work_item_attributes(item: &WorkItem) -> Map<String, Value> {
    let mut attributes = Map::new();
    for (key, value) in &item.additional_attributes {
        attributes.insert(key.clone(), serde_json::to_value(value).unwrap_or(Value::Null));
    }
    if let Some(title) = &item.title {
        attributes.insert("title".to_string(), json!(title));
    }
    if let Some(work_item_type) = &item.work_item_type {
        attributes.insert("type".to_string(), json!(work_item_type));
    }
    if let Some(status) = &item.status {
        attributes.insert("status".to_string(), json!(status));
    }
    if let Some(description) = &item.description {
        attributes.insert(
            "description".to_string(),
            json!({"type": description.mime_type, "value": description.value}),
        );
    }
    if let Some(checksum) = &item.checksum {
        attributes.insert(CHECKSUM_ATTRIBUTE.to_string(), json!(checksum));
    }
    if !item.local_id.is_empty() {
        attributes.insert(LOCAL_ID_ATTRIBUTE.to_string(), json!(item.local_id));
    }
    attributes
}

fn work_item_update_resource(project_id: &str, id: &str, item: &WorkItem) -> Value {
    json!({
        "type": "workitems",
        "id": format!("{project_id}/{id}"),
        "attributes": work_item_attributes(item),
    })
}

// ---------------------------------------------------------------------------
// Links and attachments
// ---------------------------------------------------------------------------

/// `PROJ/WI-1/parent/OTHER/WI-2` -> link from `WI-1` to `OTHER/WI-2`.
fn parse_link_id(id: &str) -> Option<Link> {
    let mut parts = id.split('/');
    let (_project, primary, role, secondary_project, secondary) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(Link::new(primary, secondary, role, secondary_project))
}

fn link_id(project_id: &str, link: &Link) -> String {
    format!(
        "{project_id}/{}/{}/{}/{}",
        link.primary_id, link.role, link.secondary_project, link.secondary_id
    )
}

/// Remote attachment metadata; the content is not downloaded.
fn attachment_from_resource(work_item_id: &str, resource: &Value) -> Option<Attachment> {
    let id = resource.get("id").and_then(Value::as_str)?;
    let attributes = resource.get("attributes")?;
    let file_name = attributes.get("fileName").and_then(Value::as_str)?;
    let title = attributes.get("title").and_then(Value::as_str).unwrap_or(file_name);
    let mut attachment = Attachment::new(file_name, title, mime_for(file_name), LazyContent::eager(Vec::new()))
        .with_id(short_id(id));
    attachment.work_item_id = Some(work_item_id.to_string());
    Some(attachment)
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next() {
        Some("svg") => MIME_SVG,
        Some("png") => MIME_PNG,
        _ => "application/octet-stream",
    }
}

/// A `multipart/form-data` body with one `resource` part and `files` parts.
struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    fn new(resource: &Value) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let mut form = Self {
            boundary: format!("c2p-{nanos:032x}"),
            body: Vec::new(),
        };
        form.open_part("Content-Disposition: form-data; name=\"resource\"", "application/json");
        form.body.extend_from_slice(resource.to_string().as_bytes());
        form.body.extend_from_slice(b"\r\n");
        form
    }

    fn open_part(&mut self, disposition: &str, content_type: &str) {
        self.body.extend_from_slice(
            format!("--{}\r\n{disposition}\r\nContent-Type: {content_type}\r\n\r\n", self.boundary).as_bytes(),
        );
    }

    fn add_file(&mut self, file_name: &str, mime_type: &str, content: &[u8]) {
        let disposition = format!("Content-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"");
        self.open_part(&disposition, mime_type);
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
    }

    fn finish(&mut self) {
        self.body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn document_from_resource(space: &str, name: &str, resource: &Value) -> Document {
    let mut document = Document::new(space, name);
    let Some(attributes) = resource.get("attributes") else {
        return document;
    };
    let string = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_string);
    document.title = string("title");
    document.document_type = string("type");
    document.status = string("status");
    document.home_page_content = attributes.get("homePageContent").and_then(text_content);
    document.rendering_layouts = attributes
        .get("renderingLayouts")
        .and_then(|layouts| serde_json::from_value::<Vec<RenderingLayout>>(layouts.clone()).ok())
        .unwrap_or_default();
    document.outline_numbering = attributes.get("outlineNumbering").and_then(Value::as_bool);
    document
}

fn document_attributes(document: &Document) -> Map<String, Value> {
    let mut attributes = Map::new();
    if let Some(title) = &document.title {
        attributes.insert("title".to_string(), json!(title));
    }
    if let Some(document_type) = &document.document_type {
        attributes.insert("type".to_string(), json!(document_type));
    }
    if let Some(status) = &document.status {
        attributes.insert("status".to_string(), json!(status));
    }
    if let Some(content) = &document.home_page_content {
        attributes.insert(
            "homePageContent".to_string(),
            json!({"type": content.mime_type, "value": content.value}),
        );
    }
    if !document.rendering_layouts.is_empty() {
        attributes.insert(
            "renderingLayouts".to_string(),
            serde_json::to_value(&document.rendering_layouts).unwrap_or(Value::Null),
        );
    }
    if let Some(numbering) = document.outline_numbering {
        attributes.insert("outlineNumbering".to_string(), json!(numbering));
    }
    attributes
}
