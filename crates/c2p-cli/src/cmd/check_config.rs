//! `c2p check-config`: load the type configuration and print the resolved rules.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use c2p_core::config::{TypeConfig, TypeRules, load_project_settings};
use clap::Args;
use serde::Serialize;

use super::{load_rules, resolve_path};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};

/// Arguments for `c2p check-config`.
#[derive(Args, Debug, Default)]
pub struct CheckConfigArgs {
    /// Type configuration (YAML) to check.
    #[arg(long, value_name = "PATH")]
    pub type_config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RuleEntry<'a> {
    layer: &'a str,
    #[serde(rename = "type")]
    c_type: &'a str,
    #[serde(flatten)]
    config: &'a TypeConfig,
}

/// Report payload for `c2p check-config`.
#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    path: String,
    polarion_types: Vec<&'a str>,
    default: Option<&'a TypeConfig>,
    diagram: Option<&'a TypeConfig>,
    rules: Vec<RuleEntry<'a>>,
}

impl<'a> ConfigReport<'a> {
    fn new(path: &Path, rules: &'a TypeRules) -> Self {
        Self {
            path: path.display().to_string(),
            polarion_types: rules.polarion_types().iter().map(String::as_str).collect(),
            default: rules.default_config(),
            diagram: rules.diagram_config(),
            rules: rules
                .entries()
                .map(|(layer, c_type, config)| RuleEntry { layer, c_type, config })
                .collect(),
        }
    }
}

/// Execute `c2p check-config`.
pub fn run_check_config(args: &CheckConfigArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let settings = load_project_settings(project_root)?;
    let path = resolve_path(
        project_root,
        args.type_config.as_deref(),
        settings.paths.type_config.as_ref(),
        "type configuration",
        "--type-config",
    )?;
    let rules = load_rules(&path, &settings)?;
    let report = ConfigReport::new(&path, &rules);
    render(output, &report, |report, w| write_report(report, output, w))
}

fn describe(config: &TypeConfig) -> String {
    let mut parts = vec![config.p_type.clone()];
    if let Some(nature) = &config.nature {
        parts.push(format!("nature={nature}"));
    }
    if let Some(is_actor) = config.is_actor {
        parts.push(format!("is_actor={is_actor}"));
    }
    if !config.serializers.is_empty() {
        let keys: Vec<&str> = config.serializers.iter().map(|s| s.key.as_str()).collect();
        parts.push(format!("serializers=[{}]", keys.join(", ")));
    }
    if !config.links.is_empty() {
        let roles: Vec<&str> = config.links.iter().map(|l| l.polarion_role.as_str()).collect();
        parts.push(format!("links=[{}]", roles.join(", ")));
    }
    parts.join(" ")
}

fn write_report(report: &ConfigReport<'_>, output: OutputMode, w: &mut dyn Write) -> io::Result<()> {
    if output.is_pretty() {
        pretty_section(w, "Type configuration")?;
    }
    pretty_kv(w, "file", &report.path)?;
    pretty_kv(w, "types", report.polarion_types.join(", "))?;
    if let Some(default) = report.default {
        pretty_kv(w, "default", describe(default))?;
    }
    if let Some(diagram) = report.diagram {
        pretty_kv(w, "diagram", describe(diagram))?;
    }
    if output.is_pretty() {
        writeln!(w)?;
        pretty_section(w, "Rules")?;
    }
    for entry in &report.rules {
        writeln!(w, "{}/{}: {}", entry.layer, entry.c_type, describe(entry.config))?;
    }
    Ok(())
}
