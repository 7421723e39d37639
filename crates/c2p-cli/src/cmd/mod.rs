//! Subcommand implementations and the project loading they share.

pub mod check_config;
pub mod render_documents;
pub mod synchronize;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use c2p_core::config::{ProjectSettings, TypeRules, load_user_settings, resolve_connection};
use c2p_core::source::SnapshotModel;
use c2p_core::tracker::{MemoryTracker, TrackerClient};
use tracing::{debug, info};

use crate::client::PolarionClient;

/// Project id used by `--dry-run` when none is configured.
const DRY_RUN_PROJECT: &str = "DRY-RUN";

/// `flag` if given, else the configured path relative to `project_root`.
pub fn resolve_path(
    project_root: &Path,
    flag: Option<&Path>,
    configured: Option<&PathBuf>,
    what: &str,
    hint: &str,
) -> Result<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| configured.map(|path| project_root.join(path)))
        .with_context(|| format!("No {what} given (pass {hint} or set it in .c2p/config.toml)"))
}

/// Load the type rules with the prefixes of `settings`.
pub fn load_rules(path: &Path, settings: &ProjectSettings) -> Result<TypeRules> {
    let rules = TypeRules::from_path(path, &settings.sync.type_prefix, &settings.sync.role_prefix)
        .with_context(|| format!("Failed to load type rules from {}", path.display()))?;
    debug!(path = %path.display(), types = rules.polarion_types().len(), "loaded type rules");
    Ok(rules)
}

pub fn load_model(path: &Path) -> Result<SnapshotModel> {
    let model = SnapshotModel::from_path(path)
        .with_context(|| format!("Failed to load model snapshot {}", path.display()))?;
    info!(path = %path.display(), elements = model.elements().len(), "loaded model");
    Ok(model)
}

/// Connect to the configured tracker, or to an empty in-memory one.
///
/// `project` replaces the configured project id.
pub fn connect(settings: &ProjectSettings, dry_run: bool, project: Option<&str>) -> Result<Box<dyn TrackerClient>> {
    if dry_run {
        let project = project
            .map(str::to_string)
            .or_else(|| env::var("POLARION_PROJECT_ID").ok().filter(|id| !id.is_empty()))
            .or_else(|| settings.tracker.project_id.clone())
            .unwrap_or_else(|| DRY_RUN_PROJECT.to_string());
        info!(project = %project, "dry run against an in-memory tracker");
        return Ok(Box::new(MemoryTracker::new(project)));
    }

    let user = load_user_settings()?;
    let mut connection = resolve_connection(&settings.tracker, &user.tracker, |var| env::var(var).ok())?;
    if let Some(project) = project {
        connection.project_id = project.to_string();
    }
    info!(url = %connection.url, project = %connection.project_id, "connecting to tracker");
    Ok(Box::new(PolarionClient::new(&connection)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_configured_path() {
        let root = Path::new("/work");
        let configured = PathBuf::from("model.json");
        let path = resolve_path(root, Some(Path::new("/other.json")), Some(&configured), "model", "--model")
            .expect("path resolves");
        assert_eq!(path, PathBuf::from("/other.json"));

        let path = resolve_path(root, None, Some(&configured), "model", "--model").expect("path resolves");
        assert_eq!(path, PathBuf::from("/work/model.json"));
    }

    #[test]
    fn missing_path_names_the_flag() {
        let err = resolve_path(Path::new("."), None, None, "model", "--model").expect_err("nothing configured");
        assert!(err.to_string().contains("--model"));
    }
}
