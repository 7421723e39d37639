//! `c2p synchronize`: push the model snapshot into the tracker project.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use c2p_core::config::{DeleteMode, Strategy, SyncSettings, load_project_settings};
use c2p_core::context::RunContext;
use c2p_core::sync::{SyncReport, SyncWorker};
use clap::{Args, ValueEnum};
use tracing::info;

use super::{connect, load_model, load_rules, resolve_path};
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render, render_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Sequential,
    Parallel,
    Batched,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Sequential => Self::Sequential,
            StrategyArg::Parallel => Self::Parallel,
            StrategyArg::Batched => Self::Batched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeleteModeArg {
    Soft,
    Hard,
}

impl From<DeleteModeArg> for DeleteMode {
    fn from(value: DeleteModeArg) -> Self {
        match value {
            DeleteModeArg::Soft => Self::Soft,
            DeleteModeArg::Hard => Self::Hard,
        }
    }
}

/// Arguments for `c2p synchronize`. Flags override `.c2p/config.toml`.
#[derive(Args, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SynchronizeArgs {
    /// Model snapshot (JSON) to synchronize.
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Type configuration (YAML).
    #[arg(long, value_name = "PATH")]
    pub type_config: Option<PathBuf>,

    /// How changed work items are sent.
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Worker threads for the parallel and batched strategies.
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// What happens to work items whose element disappeared.
    #[arg(long, value_enum)]
    pub delete_mode: Option<DeleteModeArg>,

    /// Send every work item, even when its checksum matches.
    #[arg(long)]
    pub force_update: bool,

    /// Prefix for tracker work item types.
    #[arg(long, value_name = "PREFIX")]
    pub type_prefix: Option<String>,

    /// Prefix for tracker link roles.
    #[arg(long, value_name = "PREFIX")]
    pub role_prefix: Option<String>,

    /// Do not maintain the grouped link fields.
    #[arg(long)]
    pub no_grouped_links: bool,

    /// Number figures in diagram captions.
    #[arg(long)]
    pub generate_figure_captions: bool,

    /// Synchronize into an empty in-memory tracker instead.
    #[arg(long)]
    pub dry_run: bool,
}

impl SynchronizeArgs {
    fn apply(&self, settings: &mut SyncSettings) {
        if let Some(strategy) = self.strategy {
            settings.strategy = strategy.into();
        }
        if let Some(max_workers) = self.max_workers {
            settings.max_workers = max_workers;
        }
        if let Some(delete_mode) = self.delete_mode {
            settings.delete_mode = delete_mode.into();
        }
        if let Some(prefix) = &self.type_prefix {
            settings.type_prefix.clone_from(prefix);
        }
        if let Some(prefix) = &self.role_prefix {
            settings.role_prefix.clone_from(prefix);
        }
        settings.force_update |= self.force_update;
        settings.generate_figure_captions |= self.generate_figure_captions;
        if self.no_grouped_links {
            settings.generate_grouped_links = false;
        }
    }
}

/// Execute `c2p synchronize` and return the process exit code.
pub fn run_synchronize(args: &SynchronizeArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<i32> {
    let mut settings = load_project_settings(project_root)?;
    args.apply(&mut settings.sync);
    settings.sync.validate()?;

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
    let rules = load_rules(&rules_path, &settings)?;
    let model = load_model(&model_path)?;

    let client = connect(&settings, args.dry_run, None)?;
    let ctx = RunContext::new(client.project_id());
    let limit = settings.sync.error_report_limit;
    let mut worker = SyncWorker::new(client.as_ref(), settings.sync, ctx);

    match worker.run(&model, &rules) {
        Ok(report) => {
            render(output, &report, |report, w| write_report(report, output, w))?;
        }
        Err(err) => {
            if worker.collector().critical_error_count() == 0 {
                worker.collector().add_critical_error(&err);
            }
            render_error(output, &CliError::from_code(err.to_string(), err.code()))?;
        }
    }

    let code = worker.collector().log_report(limit);
    info!(exit_code = code, "synchronize finished");
    Ok(code)
}

fn write_report(report: &SyncReport, output: OutputMode, w: &mut dyn Write) -> io::Result<()> {
    if output.is_pretty() {
        pretty_section(w, "Synchronization")?;
    }
    pretty_kv(w, "run", &report.run_id)?;
    pretty_kv(w, "elements", report.elements.to_string())?;
    pretty_kv(w, "created", report.created.to_string())?;
    pretty_kv(w, "updated", report.patch.updated.to_string())?;
    pretty_kv(w, "checksum only", report.patch.checksum_only.to_string())?;
    pretty_kv(w, "unchanged", report.patch.unchanged.to_string())?;
    pretty_kv(w, "deleted", report.deleted.to_string())?;
    pretty_kv(w, "failed", report.patch.failed.to_string())?;
    let errors = &report.errors;
    let total = errors.work_item_errors.len() + errors.link_errors.len() + errors.critical_errors.len();
    pretty_kv(w, "errors", total.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_settings() {
        let args = SynchronizeArgs {
            strategy: Some(StrategyArg::Batched),
            max_workers: Some(2),
            delete_mode: Some(DeleteModeArg::Hard),
            type_prefix: Some("c2p".to_string()),
            no_grouped_links: true,
            force_update: true,
            ..SynchronizeArgs::default()
        };
        let mut settings = SyncSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.strategy, Strategy::Batched);
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.delete_mode, DeleteMode::Hard);
        assert_eq!(settings.type_prefix, "c2p");
        assert!(!settings.generate_grouped_links);
        assert!(settings.force_update);
    }

    #[test]
    fn absent_flags_keep_file_settings() {
        let mut settings = SyncSettings {
            strategy: Strategy::Parallel,
            force_update: true,
            ..SyncSettings::default()
        };
        SynchronizeArgs::default().apply(&mut settings);
        assert_eq!(settings.strategy, Strategy::Parallel);
        assert!(settings.force_update);
        assert!(settings.generate_grouped_links);
    }
}
