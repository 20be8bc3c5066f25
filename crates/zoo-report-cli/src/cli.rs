use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use zoo_report_xlsx::download::{report_filename, ReportDownload};
use zoo_report_xlsx::{
    ensure_rows, BlockCatalog, DirTemplateStore, RenderEngine, RenderInstruction, RenderOptions,
    ReportError, ReportErrorKind, TemplateLoader, WriteOptions,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "zoo-report",
    about = "Inspect zoo report templates and render instruction files to XLSX."
)]
pub struct Args {
    /// Directory holding `<id>.xlsx` / `<id>.xltx` templates.
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    template_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the blocks of one template sheet.
    Blocks {
        /// Template id (file stem inside `--template-dir`).
        template: String,

        /// Template sheet to index.
        #[arg(long)]
        sheet: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Render a JSON instruction list into an `.xlsx` report.
    Render {
        /// Template id (file stem inside `--template-dir`).
        template: String,

        /// Template sheet whose blocks are rendered.
        #[arg(long)]
        sheet: String,

        /// JSON array of `{"block": ..., "data": {...}}` objects; `-` reads stdin.
        #[arg(long, value_name = "PATH")]
        instructions: PathBuf,

        /// JSON file with render options (`first_row`, `missing_field`, `fallback_sheet_name`).
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,

        /// Output file. Defaults to a generated name inside `--out-dir`.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Directory for the generated file name.
        #[arg(long, value_name = "DIR", default_value = ".", conflicts_with = "output")]
        out_dir: PathBuf,

        /// Extra components of the generated file name (repeatable).
        #[arg(long = "name-part", value_name = "TEXT")]
        name_parts: Vec<String>,

        /// Creation timestamp (RFC 3339) stamped into the document; makes output reproducible.
        #[arg(long, value_name = "TIMESTAMP")]
        created: Option<String>,

        #[arg(long, default_value = "zoo-report")]
        creator: String,

        /// Render even when the instructions contain no blocks.
        #[arg(long)]
        allow_empty: bool,
    },
}

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Library crates log through `log`; the subscriber picks those records up as well.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Process exit code for a failed run.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ReportError>().map(ReportError::kind) {
        Some(ReportErrorKind::NoData) => 2,
        Some(ReportErrorKind::ClientFault) => 3,
        Some(ReportErrorKind::ServerFault) | None => 1,
    }
}

pub fn run() -> Result<()> {
    run_with(Args::parse())
}

pub fn run_with(args: Args) -> Result<()> {
    let loader = TemplateLoader::new(DirTemplateStore::new(&args.template_dir));
    match args.command {
        Command::Blocks {
            template,
            sheet,
            format,
        } => {
            let catalog = load_catalog(&loader, &template, &sheet)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let written = match format {
                OutputFormat::Text => write_text_summary(&mut out, &catalog),
                OutputFormat::Json => write_json_summary(&mut out, &catalog),
            };
            ignore_broken_pipe(written)
        }
        Command::Render {
            template,
            sheet,
            instructions,
            options,
            output,
            out_dir,
            name_parts,
            created,
            creator,
            allow_empty,
        } => {
            let instructions = read_instructions(&instructions)?;
            if !allow_empty {
                ensure_rows(instructions.iter().filter(|i| !i.is_new_sheet()).count())?;
            }
            let render_options = match options {
                Some(path) => read_json::<RenderOptions>(&path)?,
                None => RenderOptions::default(),
            };
            let created = created
                .map(|text| {
                    DateTime::parse_from_rfc3339(&text)
                        .map(|at| at.with_timezone(&Utc))
                        .with_context(|| format!("invalid --created timestamp {text:?}"))
                })
                .transpose()?;

            let catalog = load_catalog(&loader, &template, &sheet)?;
            let document = RenderEngine::new(render_options)
                .render(&catalog, instructions)
                .map_err(ReportError::from)
                .with_context(|| format!("render {template}/{sheet}"))?;
            let bytes = document
                .serialize_with(&WriteOptions { creator, created })
                .map_err(ReportError::from)
                .context("serialize report")?;

            let path = match output {
                Some(path) => path,
                None => {
                    let stamp = created
                        .map(|at| at.naive_utc())
                        .unwrap_or_else(|| Local::now().naive_local());
                    let parts: Vec<&str> = name_parts.iter().map(String::as_str).collect();
                    out_dir.join(report_filename(&template, &parts, stamp))
                }
            };
            let download = ReportDownload::new(bytes, file_name(&path));
            std::fs::write(&path, &download.bytes)
                .with_context(|| format!("write {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                bytes = download.bytes.len(),
                sheets = document.sheets().len(),
                "wrote report"
            );
            ignore_broken_pipe(writeln!(std::io::stdout(), "{}", path.display()))
        }
    }
}

fn load_catalog(
    loader: &TemplateLoader<DirTemplateStore>,
    template: &str,
    sheet: &str,
) -> Result<BlockCatalog> {
    loader
        .load(template, sheet)
        .map_err(ReportError::from)
        .with_context(|| {
            format!(
                "load template {template:?} sheet {sheet:?} from {}",
                loader.store().root().display()
            )
        })
}

fn read_instructions(path: &Path) -> Result<Vec<RenderInstruction>> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read instructions from stdin")?;
        return serde_json::from_str(&text).context("parse instructions from stdin");
    }
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ignore_broken_pipe(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

#[derive(Debug, Serialize)]
struct JsonCatalog<'a> {
    template: &'a str,
    sheet: &'a str,
    blocks: Vec<JsonBlock<'a>>,
}

/// Row numbers are 1-based, as shown in Excel.
#[derive(Debug, Serialize)]
struct JsonBlock<'a> {
    name: &'a str,
    first_row: u32,
    last_row: u32,
    placeholders: Vec<&'a str>,
    merges: Vec<String>,
    formulas: usize,
}

fn json_catalog(catalog: &BlockCatalog) -> JsonCatalog<'_> {
    JsonCatalog {
        template: catalog.template_id(),
        sheet: catalog.sheet_name(),
        blocks: catalog
            .blocks()
            .iter()
            .map(|block| JsonBlock {
                name: block.name(),
                first_row: block.first_row() + 1,
                last_row: block.last_row() + 1,
                placeholders: block.placeholders().collect(),
                merges: block.merges().iter().map(ToString::to_string).collect(),
                formulas: block.formula_count(),
            })
            .collect(),
    }
}

fn write_json_summary(out: &mut impl Write, catalog: &BlockCatalog) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, &json_catalog(catalog))?;
    writeln!(out)
}

fn write_text_summary(out: &mut impl Write, catalog: &BlockCatalog) -> std::io::Result<()> {
    writeln!(
        out,
        "{} / {}: {} block(s)",
        catalog.template_id(),
        catalog.sheet_name(),
        catalog.len()
    )?;
    let summary = json_catalog(catalog);
    let width = summary.blocks.iter().map(|b| b.name.len()).max().unwrap_or(0);
    for block in &summary.blocks {
        let rows = if block.first_row == block.last_row {
            format!("row {}", block.first_row)
        } else {
            format!("rows {}-{}", block.first_row, block.last_row)
        };
        write!(out, "  {:<width$}  {rows}", block.name)?;
        if !block.placeholders.is_empty() {
            write!(out, "  fields: {}", block.placeholders.join(", "))?;
        }
        if !block.merges.is_empty() {
            write!(out, "  merges: {}", block.merges.join(" "))?;
        }
        if block.formulas > 0 {
            write!(out, "  formulas: {}", block.formulas)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
