//! wbsx CLI - WBS template filler
//!
//! Fills a JSON list of WBS elements into the "Shared Template" sheet of a
//! macro-enabled workbook.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wbsx_core::{ElementList, TemplateFiller, TemplateVersion};
use wbsx_writer::{build_writer, ScaffoldRenderer, WriterConfig, WriterKind};

#[derive(Parser)]
#[command(name = "wbsx")]
#[command(author, version, about = "Fill WBS elements into the shared Excel template", long_about = None)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Template workbook (.xlsm)
    #[arg(value_name = "TEMPLATE", required = true)]
    template: Option<PathBuf>,

    /// Where to write the filled workbook
    #[arg(value_name = "OUTPUT", required = true)]
    output: Option<PathBuf>,

    /// JSON file with the WBS elements
    #[arg(value_name = "WBS_DATA_JSON", required = true)]
    data: Option<PathBuf>,

    /// Template layout version
    #[arg(long, default_value_t = TemplateVersion::Shared)]
    layout: TemplateVersion,

    /// Writer used to produce the document
    #[arg(long, default_value_t = WriterKind::Native)]
    writer: WriterKind,

    /// Automation host program (required with --writer automation)
    #[arg(long, env = "WBSX_HOST_PROGRAM")]
    host_program: Option<PathBuf>,

    /// Automation host timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a blank template workbook
    Scaffold {
        /// Output file path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Template layout version
        #[arg(long, default_value_t = TemplateVersion::Shared)]
        layout: TemplateVersion,

        /// Number of pre-formatted data rows
        #[arg(long, default_value_t = 50)]
        rows: u32,
    },

    /// Print the cell plan for a data file as JSON
    Plan {
        /// JSON file with the WBS elements
        #[arg(value_name = "WBS_DATA_JSON")]
        data: PathBuf,

        /// Template layout version
        #[arg(long, default_value_t = TemplateVersion::Shared)]
        layout: TemplateVersion,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Scaffold { output, layout, rows }) => cmd_scaffold(output, *layout, *rows),
        Some(Commands::Plan { data, layout }) => cmd_plan(data, *layout),
        None => cmd_fill(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}

fn cmd_fill(cli: &Cli) -> Result<()> {
    let (Some(template), Some(output), Some(data)) = (&cli.template, &cli.output, &cli.data) else {
        anyhow::bail!("usage: wbsx <TEMPLATE> <OUTPUT> <WBS_DATA_JSON>");
    };

    let elements = read_elements(data)?;
    if elements.is_empty() {
        warn!("no WBS elements in {}; only the header cells are cleared", data.display());
    }

    let writer = build_writer(&WriterConfig {
        kind: cli.writer,
        host_program: cli.host_program.clone(),
        host_args: None,
        timeout: Some(Duration::from_secs(cli.timeout)),
    })?;

    TemplateFiller::new(cli.layout)
        .fill_to_path(writer.as_ref(), template, output, &elements)
        .with_context(|| format!("Failed to fill {}", template.display()))?;

    info!(elements = elements.len(), output = %output.display(), "export complete");
    println!("Excel file filled and saved successfully.");
    Ok(())
}

fn cmd_scaffold(output: &Path, layout: TemplateVersion, rows: u32) -> Result<()> {
    let bytes = ScaffoldRenderer::new(layout).rows(rows).render_to_bytes()?;
    std::fs::write(output, bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Template written to {}", output.display());
    Ok(())
}

fn cmd_plan(data: &Path, layout: TemplateVersion) -> Result<()> {
    let elements = read_elements(data)?;
    let plan = TemplateFiller::new(layout).plan(&elements);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn read_elements(path: &Path) -> Result<ElementList> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ElementList::from_json_str(&json).with_context(|| format!("Invalid WBS data in {}", path.display()))
}
