//! `c2p render-documents`: render configured live documents and push them.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use c2p_core::collector::{EXIT_CRITICAL, EXIT_OK, EXIT_PARTIAL};
use c2p_core::config::load_project_settings;
use c2p_core::context::RunContext;
use c2p_core::document::{
    DocumentConfigs, DocumentInfo, DocumentRenderer, MassDocumentRenderer, fetch_existing_documents,
    fetch_text_work_items, push_documents,
};
use c2p_core::sync::SyncWorker;
use c2p_core::tracker::TrackerClient;
use clap::Args;
use serde::Serialize;
use tracing::{error, info};

use super::{connect, load_model, load_rules, resolve_path};
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render, render_error};

/// Arguments for `c2p render-documents`.
#[derive(Args, Debug, Default)]
pub struct RenderDocumentsArgs {
    /// Model snapshot (JSON) the templates read from.
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Type configuration (YAML), scopes the work item lookup.
    #[arg(long, value_name = "PATH")]
    pub type_config: Option<PathBuf>,

    /// Document configuration (YAML).
    #[arg(long, value_name = "PATH")]
    pub document_config: Option<PathBuf>,

    /// Replace the rendering layouts of existing documents.
    #[arg(long)]
    pub overwrite_layouts: bool,

    /// Replace the heading numbering of existing documents.
    #[arg(long)]
    pub overwrite_numbering: bool,

    /// Render against an empty in-memory tracker instead.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct Failure {
    document: DocumentInfo,
    error_code: &'static str,
    message: String,
}

/// Report payload for `c2p render-documents`.
#[derive(Debug, Default, Serialize)]
struct RenderReport {
    created: usize,
    updated: usize,
    skipped: Vec<DocumentInfo>,
    failures: Vec<Failure>,
}

/// Execute `c2p render-documents` and return the process exit code.
pub fn run_render_documents(
    args: &RenderDocumentsArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<i32> {
    let settings = load_project_settings(project_root)?;
    let model_path = resolve_path(
        project_root,
        args.model.as_deref(),
        settings.paths.model.as_ref(),
        "model snapshot",
        "--model",
    )?;
    let rules_path = resolve_path(
        project_root,
        args.type_config.as_deref(),
        settings.paths.type_config.as_ref(),
        "type configuration",
        "--type-config",
    )?;
    let config_path = resolve_path(
        project_root,
        args.document_config.as_deref(),
        settings.paths.document_config.as_ref(),
        "document configuration",
        "--document-config",
    )?;

    let rules = load_rules(&rules_path, &settings)?;
    let model = load_model(&model_path)?;
    let configs = DocumentConfigs::from_path(&config_path)?;
    if configs.is_empty() {
        info!(path = %config_path.display(), "No documents configured");
    }

    let client = connect(&settings, args.dry_run, None)?;
    let model_project = client.project_id().to_string();
    let mut worker = SyncWorker::new(client.as_ref(), settings.sync.clone(), RunContext::new(&model_project));
    if let Err(err) = worker
        .check_project()
        .and_then(|()| worker.load_work_item_map(rules.polarion_types().iter().map(String::as_str)))
    {
        render_error(output, &CliError::from_code(err.to_string(), err.code()))?;
        return Ok(EXIT_CRITICAL);
    }

    let mut clients: BTreeMap<String, Box<dyn TrackerClient>> = BTreeMap::new();
    for project in configs.projects().into_iter().flatten() {
        if project != model_project {
            let project_client = connect(&settings, args.dry_run, Some(&project))?;
            clients.insert(project, project_client);
        }
    }

    let documents = configs.iterate_documents();
    let mut existing = BTreeMap::new();
    let mut text_work_items = BTreeMap::new();
    for project in configs.projects() {
        let in_project = documents.iter().filter(|info| info.project_id == project);
        let project_client = client_for(client.as_ref(), &clients, project.as_deref());
        let found = fetch_existing_documents(project_client, in_project)?;
        text_work_items.extend(fetch_text_work_items(project_client, &configs, &found)?);
        existing.extend(found);
    }

    let renderer = DocumentRenderer::new(worker.repo(), &model, &model_project);
    let outcome = MassDocumentRenderer::new(renderer, args.overwrite_layouts, args.overwrite_numbering)
        .with_text_work_items(text_work_items)
        .render_documents(&configs, &existing);

    let mut report = RenderReport {
        skipped: outcome.skipped.clone(),
        ..RenderReport::default()
    };
    for (info, err) in &outcome.failures {
        report.failures.push(Failure {
            document: info.clone(),
            error_code: err.code().code(),
            message: err.to_string(),
        });
    }
    for (project, documents) in &outcome.projects {
        match push_documents(client_for(client.as_ref(), &clients, project.as_deref()), documents) {
            Ok(()) => {
                report.created += documents.new_docs.len();
                report.updated += documents.updated_docs.len();
            }
            Err(err) => {
                error!(project = ?project, error = %err, "Pushing documents failed");
                let code = err.code().code();
                report.failures.extend(
                    documents
                        .new_docs
                        .iter()
                        .chain(&documents.updated_docs)
                        .map(|rendered| Failure {
                            document: DocumentInfo {
                                project_id: project.clone(),
                                space: rendered.document.module_folder.clone(),
                                name: rendered.document.module_name.clone(),
                            },
                            error_code: code,
                            message: err.to_string(),
                        }),
                );
            }
        }
    }

    render(output, &report, |report, w| write_report(report, output, w))?;
    Ok(if report.failures.is_empty() { EXIT_OK } else { EXIT_PARTIAL })
}

/// The client of `project`, the model project's for `None`.
fn client_for<'a>(
    default: &'a dyn TrackerClient,
    clients: &'a BTreeMap<String, Box<dyn TrackerClient>>,
    project: Option<&str>,
) -> &'a dyn TrackerClient {
    project.and_then(|project| clients.get(project)).map_or(default, |client| client.as_ref())
}

fn document_label(info: &DocumentInfo) -> String {
    match &info.project_id {
        Some(project) => format!("{project}:{}/{}", info.space, info.name),
        None => format!("{}/{}", info.space, info.name),
    }
}

fn write_report(report: &RenderReport, output: OutputMode, w: &mut dyn Write) -> io::Result<()> {
    if output.is_pretty() {
        pretty_section(w, "Documents")?;
    }
    pretty_kv(w, "created", report.created.to_string())?;
    pretty_kv(w, "updated", report.updated.to_string())?;
    pretty_kv(w, "skipped", report.skipped.len().to_string())?;
    pretty_kv(w, "failed", report.failures.len().to_string())?;
    for failure in &report.failures {
        writeln!(w, "  {} [{}] {}", document_label(&failure.document), failure.error_code, failure.message)?;
    }
    Ok(())
}
