#![forbid(unsafe_code)]

mod client;
mod cmd;
mod output;

use c2p_core::collector::EXIT_OK;
use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::process;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "c2p: synchronize engineering models into a requirements tracker",
    long_about = None
)]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Synchronize the model into the tracker project",
        long_about = "Convert every configured model element into a work item and create, update \
                      or delete tracker work items until the project matches the model.",
        after_help = "EXAMPLES:\n    # Synchronize with the paths from .c2p/config.toml\n    c2p synchronize\n\n    # Try a configuration without touching the tracker\n    c2p synchronize --model model.json --type-config rules.yaml --dry-run --json"
    )]
    Synchronize(cmd::synchronize::SynchronizeArgs),

    #[command(
        about = "Render live documents from templates",
        long_about = "Render the documents of a document configuration, embedding the \
                      synchronized work items, and create or update them on the tracker.",
        after_help = "EXAMPLES:\n    # Render all configured documents\n    c2p render-documents --document-config documents.yaml\n\n    # Replace layouts of existing documents\n    c2p render-documents --overwrite-layouts"
    )]
    RenderDocuments(cmd::render_documents::RenderDocumentsArgs),

    #[command(
        about = "Validate the type configuration",
        long_about = "Load the type configuration, apply inheritance and prefixes, and print \
                      the resolved rules.",
        after_help = "EXAMPLES:\n    # Print the resolved rules\n    c2p check-config --type-config rules.yaml\n\n    # Emit machine-readable output\n    c2p check-config --json"
    )]
    CheckConfig(cmd::check_config::CheckConfigArgs),
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_env("C2P_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if debug || env::var("DEBUG").is_ok() {
            "c2p=debug,info"
        } else {
            "c2p=info,warn"
        })
    });

    let format = env::var("C2P_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    debug!(command = ?cli.command, "starting");

    let project_root = env::current_dir()?;
    let output = cli.output_mode();

    let code = match cli.command {
        Commands::Synchronize(ref args) => cmd::synchronize::run_synchronize(args, output, &project_root)?,
        Commands::RenderDocuments(ref args) => {
            cmd::render_documents::run_render_documents(args, output, &project_root)?
        }
        Commands::CheckConfig(ref args) => {
            cmd::check_config::run_check_config(args, output, &project_root)?;
            EXIT_OK
        }
    };

    if code != EXIT_OK {
        process::exit(code);
    }
    Ok(())
}
