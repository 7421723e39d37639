use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread;

use super::ConfigError;

/// How the patch phase schedules work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Sequential,
    Parallel,
    Batched,
}

/// What happens to work items whose model element disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Mark as `deleted`; the item stays on the tracker.
    #[default]
    Soft,
    /// Remove from the tracker.
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default)]
    pub delete_mode: DeleteMode,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_true")]
    pub generate_links: bool,
    #[serde(default = "default_true")]
    pub generate_attachments: bool,
    #[serde(default = "default_true")]
    pub generate_grouped_links: bool,
    #[serde(default)]
    pub generate_figure_captions: bool,
    #[serde(default = "default_error_report_limit")]
    pub error_report_limit: usize,
    #[serde(default)]
    pub type_prefix: String,
    #[serde(default)]
    pub role_prefix: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_workers: default_max_workers(),
            parallel_threshold: default_parallel_threshold(),
            failure_threshold: default_failure_threshold(),
            delete_mode: DeleteMode::default(),
            force_update: false,
            generate_links: default_true(),
            generate_attachments: default_true(),
            generate_grouped_links: default_true(),
            generate_figure_captions: false,
            error_report_limit: default_error_report_limit(),
            type_prefix: String::new(),
            role_prefix: String::new(),
        }
    }
}

impl SyncSettings {
    /// # Errors
    ///
    /// Returns [`ConfigError::Setting`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Setting {
                key: "max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(ConfigError::Setting {
                key: "failure_threshold",
                message: format!("{} is not within 0.0..=1.0", self.failure_threshold),
            });
        }
        Ok(())
    }
}

/// Connection data for the tracker. The token never comes from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Files a run reads, relative to the project root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(default)]
    pub type_config: Option<PathBuf>,
    #[serde(default)]
    pub document_config: Option<PathBuf>,
}

/// `.c2p/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

/// `<config dir>/c2p/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub tracker: TrackerSettings,
}

/// Fully resolved connection data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConnection {
    pub url: String,
    pub project_id: String,
    pub token: Option<String>,
}

pub fn load_project_settings(project_root: &Path) -> Result<ProjectSettings> {
    let path = project_root.join(".c2p/config.toml");
    if !path.exists() {
        return Ok(ProjectSettings::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let settings = toml::from_str::<ProjectSettings>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    settings
        .sync
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(settings)
}

pub fn load_user_settings() -> Result<UserSettings> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserSettings::default());
    };

    let path = config_dir.join("c2p/config.toml");
    if !path.exists() {
        return Ok(UserSettings::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserSettings>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve connection data: environment over project file over user file.
///
/// `env` looks up `POLARION_URL`, `POLARION_PROJECT_ID` and `POLARION_PAT`.
pub fn resolve_connection(
    project: &TrackerSettings,
    user: &TrackerSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<TrackerConnection> {
    let pick = |var: &str, project: Option<&String>, user: Option<&String>| {
        env(var)
            .filter(|value| !value.is_empty())
            .or_else(|| project.cloned())
            .or_else(|| user.cloned())
    };

    let url = pick("POLARION_URL", project.url.as_ref(), user.url.as_ref())
        .context("No tracker URL configured (set POLARION_URL or tracker.url)")?;
    let project_id = pick(
        "POLARION_PROJECT_ID",
        project.project_id.as_ref(),
        user.project_id.as_ref(),
    )
    .context("No project configured (set POLARION_PROJECT_ID or tracker.project_id)")?;

    Ok(TrackerConnection {
        url: url.trim_end_matches('/').to_string(),
        project_id,
        token: env("POLARION_PAT").filter(|token| !token.is_empty()),
    })
}

const fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get()).min(8)
}

const fn default_parallel_threshold() -> usize {
    5
}

const fn default_failure_threshold() -> f64 {
    0.1
}

const fn default_error_report_limit() -> usize {
    crate::collector::DEFAULT_REPORT_LIMIT
}
