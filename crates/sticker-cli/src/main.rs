use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sticker_contracts::config::{non_empty_env, proxy_prefix_from_env, ApiConfig};
use sticker_contracts::events::EventWriter;
use sticker_contracts::grid::{GridSpec, DEFAULT_COLS, DEFAULT_ROWS};
use sticker_contracts::reference::{ImageReference, SourceImage};
use sticker_contracts::StickerError;
use sticker_engine::fetch::{ResilientFetcher, SaveOutcome};
use sticker_engine::slicer::SliceReport;
use sticker_engine::{http_client, StickerEngine, ARCHIVE_FILE_NAME};

#[derive(Debug, Parser)]
#[command(
    name = "stickerforge",
    version,
    about = "Turn a photo into a sliced sticker pack"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask the completion endpoint for a sticker sheet.
    Generate(GenerateArgs),
    /// Cut an existing sheet into a zip of stickers.
    Slice(SliceArgs),
    /// Generate a sheet and slice it in one go.
    Run(RunArgs),
    /// Save a single image reference to a file.
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
struct ApiArgs {
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Replaces the built-in sticker prompt.
    #[arg(long)]
    prompt_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GridArgs {
    /// Grid as ROWSxCOLS, e.g. 4x6.
    #[arg(long, conflicts_with_all = ["rows", "cols"])]
    grid: Option<GridSpec>,
    #[arg(long)]
    rows: Option<u32>,
    #[arg(long)]
    cols: Option<u32>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    api: ApiArgs,
}

#[derive(Debug, Parser)]
struct SliceArgs {
    /// Local file, http(s) URL or data URI.
    #[arg(long)]
    sheet: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Archive path; defaults to `<out>/stickers.zip`.
    #[arg(long)]
    archive: Option<PathBuf>,
    #[command(flatten)]
    grid: GridArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    api: ApiArgs,
    #[command(flatten)]
    grid: GridArgs,
}

#[derive(Debug, Parser)]
struct DownloadArgs {
    #[arg(long)]
    reference: String,
    #[arg(long)]
    file: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{}", failure_message(&err));
            std::process::exit(1);
        }
    }
}

fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StickerError>() {
        Some(kind) => format!("stickerforge error [{}]: {err:#}", kind.kind()),
        None => format!("stickerforge error: {err:#}"),
    }
}

/// The pipeline error wins over a failure to write the summary.
fn settle<T>(result: Result<T>, finished: Result<()>) -> Result<T> {
    match (result, finished) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(finish_err)) => Err(finish_err.context("failed finishing run")),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(finish_err)) => {
            Err(err.context(format!("run summary also failed: {finish_err:#}")))
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Slice(args) => run_slice(args),
        Command::Run(args) => run_pipeline(args),
        Command::Download(args) => run_download(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = resolve_api_config(&args.api)?;
    let image = SourceImage::from_path(&args.image)?;
    let mut engine = open_engine(&args.out, args.events.as_deref(), Some(&args.api))?;

    let result = (|| -> Result<()> {
        let reference = engine.generate_sheet(&image, &config)?;
        println!("Sheet reference: {}", reference.abbreviated());
        let sheet = engine.fetch_reference(&reference)?;
        let path = engine.store_sheet(&sheet)?;
        println!("Sheet saved to {}", path.display());
        Ok(())
    })();
    let finished = engine.finish();
    settle(result, finished)?;
    Ok(0)
}

fn run_slice(args: SliceArgs) -> Result<i32> {
    let grid = resolve_grid(&args.grid)?;
    let mut engine = open_engine(&args.out, args.events.as_deref(), None)?;
    let archive_path = args
        .archive
        .clone()
        .unwrap_or_else(|| args.out.join(ARCHIVE_FILE_NAME));

    let result = (|| -> Result<()> {
        let sheet = load_sheet(&engine, &args.sheet)?;
        let (archive, report) = engine.slice_to_archive(&sheet, grid)?;
        engine.write_archive(&archive, &archive_path)?;
        print_slice_report(&report, &archive_path);
        Ok(())
    })();
    let finished = engine.finish();
    settle(result, finished)?;
    Ok(0)
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let config = resolve_api_config(&args.api)?;
    let grid = resolve_grid(&args.grid)?;
    let image = SourceImage::from_path(&args.image)?;
    let mut engine = open_engine(&args.out, args.events.as_deref(), Some(&args.api))?;

    let result = engine.run(&image, &config, grid);
    let finished = engine.finish();
    let output = settle(result, finished)?;
    println!("Sheet reference: {}", output.reference.abbreviated());
    println!("Sheet saved to {}", output.sheet_path.display());
    print_slice_report(&output.report, &output.archive_path);
    Ok(0)
}

fn run_download(args: DownloadArgs) -> Result<i32> {
    let Some(reference) = ImageReference::parse(&args.reference) else {
        bail!("reference must be an http(s) URL or a data URI");
    };
    let fetcher = ResilientFetcher::new(http_client()?, EventWriter::disabled("download"))
        .with_proxy_prefix(proxy_prefix_from_env());
    match fetcher.save(&reference, &args.file)? {
        SaveOutcome::Saved(path) => {
            println!("Saved {}", path.display());
            Ok(0)
        }
        SaveOutcome::OpenManually(url) => {
            eprintln!("Download failed; open this link and save the image manually:");
            println!("{url}");
            Ok(2)
        }
    }
}

fn open_engine(out: &Path, events: Option<&Path>, api: Option<&ApiArgs>) -> Result<StickerEngine> {
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    let mut engine =
        StickerEngine::new(out, events_path)?.with_proxy_prefix(proxy_prefix_from_env());
    if let Some(prompt) = api.map(resolve_prompt).transpose()?.flatten() {
        engine = engine.with_prompt(prompt);
    }
    Ok(engine)
}

fn resolve_api_config(args: &ApiArgs) -> Result<ApiConfig> {
    let config = ApiConfig::from_env().with_overrides(
        args.base_url.as_deref(),
        args.api_key.as_deref(),
        args.model.as_deref(),
    );
    config.validate()?;
    Ok(config)
}

fn resolve_prompt(args: &ApiArgs) -> Result<Option<String>> {
    let path = args
        .prompt_file
        .clone()
        .or_else(|| non_empty_env("STICKER_PROMPT_FILE").map(PathBuf::from));
    let Some(path) = path else {
        return Ok(None);
    };
    let prompt = std::fs::read_to_string(&path)
        .with_context(|| format!("failed reading prompt file {}", path.display()))?;
    if prompt.trim().is_empty() {
        bail!("prompt file {} is empty", path.display());
    }
    Ok(Some(prompt))
}

fn resolve_grid(args: &GridArgs) -> Result<GridSpec> {
    if let Some(grid) = args.grid {
        return Ok(grid);
    }
    Ok(GridSpec::new(
        args.rows.unwrap_or(DEFAULT_ROWS),
        args.cols.unwrap_or(DEFAULT_COLS),
    )?)
}

fn load_sheet(engine: &StickerEngine, raw: &str) -> Result<Vec<u8>> {
    let path = Path::new(raw);
    if path.is_file() {
        return std::fs::read(path).with_context(|| format!("failed reading sheet {raw}"));
    }
    let Some(reference) = ImageReference::parse(raw) else {
        bail!("sheet {raw:?} is neither a file nor an http(s)/data reference");
    };
    Ok(engine.fetch_reference(&reference)?.bytes)
}

fn print_slice_report(report: &SliceReport, archive_path: &Path) {
    for skipped in &report.skipped {
        eprintln!(
            "warning: skipped cell at row {}, column {}: {}",
            skipped.region.row + 1,
            skipped.region.col + 1,
            skipped.reason
        );
    }
    println!(
        "Wrote {} stickers ({}x{} sheet) to {}",
        report.cells_written,
        report.source_width,
        report.source_height,
        archive_path.display()
    );
}
