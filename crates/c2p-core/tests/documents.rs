use std::fs;

use c2p_core::config::{SyncSettings, TypeRules};
use c2p_core::context::RunContext;
use c2p_core::convert::html::WI_ID_PREFIX;
use c2p_core::document::areas::{AREA_END_CLS, AREA_START_CLS, area_marker};
use c2p_core::document::{
    DocumentConfigs, DocumentRenderer, MassDocumentRenderer, TEXT_WORK_ITEM_ID_FIELD, fetch_existing_documents,
    fetch_text_work_items, push_documents,
};
use c2p_core::model::{AttributeValue, Document, TextContent};
use c2p_core::source::SnapshotModel;
use c2p_core::sync::SyncWorker;
use c2p_core::tracker::memory::{MemoryTracker, Operation};

const RULES: &str = r#"
sa:
  SystemFunction: {}
"#;

const MODEL: &str = r#"{
    "elements": [
        {"uuid": "f1", "name": "Open door", "type": "SystemFunction", "layer": "sa"},
        {"uuid": "f2", "name": "Close door", "type": "SystemFunction", "layer": "sa"}
    ]
}"#;

#[test]
fn synchronized_items_are_embedded_into_documents() {
    let tracker = MemoryTracker::new("PROJ");
    let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
    let rules = TypeRules::from_yaml_str(RULES, "", "").expect("valid rules");
    let mut worker = SyncWorker::new(&tracker, SyncSettings::default(), RunContext::new("PROJ"));
    worker.run(&model, &rules).expect("sync succeeds");

    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(
        dir.path().join("functions.j2"),
        r#"{{ heading(2, "Functions") }}{% for f in search("sa", "SystemFunction") %}{{ insert_work_item(f) }}{% endfor %}"#,
    )
    .expect("write template");
    let configs = DocumentConfigs::from_yaml_str(&format!(
        "full_authority:\n  - template_directory: {dir}\n    template: functions.j2\n    instances:\n      - {{polarion_space: _default, polarion_name: Functions}}\nmixed_authority:\n  - template_directory: {dir}\n    sections:\n      generated: functions.j2\n    instances:\n      - {{polarion_space: _default, polarion_name: Handbook}}\n",
        dir = dir.path().display()
    ))
    .expect("valid config");

    let mut handbook = Document::new("_default", "Handbook");
    handbook.home_page_content = Some(TextContent::html(format!(
        "<p>written by hand</p>{}{}",
        area_marker(AREA_START_CLS, "generated"),
        area_marker(AREA_END_CLS, "generated"),
    )));
    tracker.insert_document(handbook);

    let existing = fetch_existing_documents(&tracker, &configs.iterate_documents()).expect("fetched");
    let renderer = DocumentRenderer::new(worker.repo(), &model, "PROJ");
    let outcome = MassDocumentRenderer::new(renderer, false, false).render_documents(&configs, &existing);
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);

    tracker.clear_calls();
    push_documents(&tracker, &outcome.projects[&None]).expect("pushed");
    assert_eq!(tracker.count(Operation::CreateDocuments), 1);
    assert_eq!(tracker.count(Operation::UpdateDocuments), 1);
    assert_eq!(tracker.count(Operation::UpdateWorkItems), 0);

    let f1 = worker.repo().lookup_remote_id("f1").expect("synchronized");
    let functions = tracker.document("_default", "Functions").expect("created");
    let content = functions.home_page_content.expect("content").value;
    assert!(content.starts_with("<h2>Functions</h2>"));
    assert!(content.contains(&format!("{WI_ID_PREFIX}{f1}|layout=0|external=true")));

    let handbook = tracker.document("_default", "Handbook").expect("updated");
    let content = handbook.home_page_content.expect("content").value;
    assert!(content.contains("<p>written by hand</p>"));
    assert!(content.contains(&format!("{WI_ID_PREFIX}{f1}|")));
}

#[test]
fn text_work_items_are_created_once_and_reused() {
    let tracker = MemoryTracker::new("PROJ");
    let model = SnapshotModel::from_json_str(MODEL).expect("valid snapshot");
    let rules = TypeRules::from_yaml_str(RULES, "", "").expect("valid rules");
    let mut worker = SyncWorker::new(&tracker, SyncSettings::default(), RunContext::new("PROJ"));
    worker.run(&model, &rules).expect("sync succeeds");

    let dir = tempfile::tempdir().expect("temp dir");
    let configs = DocumentConfigs::from_yaml_str(&format!(
        "full_authority:\n  - template_directory: {}\n    template: intro.j2\n    instances:\n      - {{polarion_space: _default, polarion_name: Intro}}\n",
        dir.path().display()
    ))
    .expect("valid config");

    let render_and_push = |body: &str| {
        fs::write(
            dir.path().join("intro.j2"),
            format!(r#"<h1>Intro</h1><workitem id="intro">{body}</workitem>"#),
        )
        .expect("write template");
        let existing = fetch_existing_documents(&tracker, &configs.iterate_documents()).expect("fetched");
        let text_items = fetch_text_work_items(&tracker, &configs, &existing).expect("fetched text items");
        let renderer = DocumentRenderer::new(worker.repo(), &model, "PROJ");
        let outcome = MassDocumentRenderer::new(renderer, false, false)
            .with_text_work_items(text_items)
            .render_documents(&configs, &existing);
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        tracker.clear_calls();
        push_documents(&tracker, &outcome.projects[&None]).expect("pushed");
    };

    render_and_push("<p>Hello</p>");
    assert_eq!(tracker.count(Operation::CreateWorkItems), 1);
    assert_eq!(tracker.count(Operation::CreateDocuments), 1);
    let text_item = tracker.calls_of(Operation::CreateWorkItems)[0].items[0].clone();
    assert_eq!(text_item.work_item_type.as_deref(), Some("text"));
    assert_eq!(
        text_item.additional_attributes.get(TEXT_WORK_ITEM_ID_FIELD),
        Some(&AttributeValue::from("intro"))
    );
    let content = tracker
        .document("_default", "Intro")
        .and_then(|d| d.home_page_content)
        .expect("content")
        .value;
    assert!(!content.contains("<workitem"));
    let text_id = tracker
        .work_items()
        .into_iter()
        .find(|item| item.work_item_type.as_deref() == Some("text"))
        .and_then(|item| item.id)
        .expect("text work item created");
    assert!(content.contains(&format!("{WI_ID_PREFIX}{text_id}|layout=0|external=true")));

    render_and_push("<p>Hello again</p>");
    assert_eq!(tracker.count(Operation::CreateWorkItems), 0, "{:?}", tracker.calls());
    assert_eq!(tracker.count(Operation::UpdateWorkItems), 1);
    assert_eq!(tracker.count(Operation::UpdateDocuments), 1);
    let text_item = tracker.work_item(&text_id).expect("still there");
    assert_eq!(text_item.description.map(|d| d.value), Some("<p>Hello again</p>".to_string()));
    let content = tracker
        .document("_default", "Intro")
        .and_then(|d| d.home_page_content)
        .expect("content")
        .value;
    assert!(content.contains(&format!("{WI_ID_PREFIX}{text_id}|layout=0|external=true")));
}
