use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabular_extract::{
    config::{detect_memory_limit, parse_memory_size},
    logger,
    monitor::load_metrics,
    PerformanceReport, Settings,
};

#[derive(Parser)]
#[command(name = "tabular_extract")]
#[command(about = "Tabular data extraction toolkit with performance monitoring")]
struct Args {
    /// Project root; data/ and its subdirectories live under it
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = Settings::DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Rows per batch when reading large files
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Memory budget, e.g. 512M or 2G
    #[arg(long, default_value = Settings::DEFAULT_MAX_MEMORY_USE)]
    max_memory: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data directory layout
    Init,

    /// Show which file type a source resolves to
    Inspect {
        /// Source file path
        path: PathBuf,
    },

    /// Summarize a metrics file from previous runs
    Report {
        /// Metrics file (default: data/performance.log)
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::from_base_dir(&args.base_dir);
    settings.log_level = args.log_level;
    settings.max_memory_use = parse_memory_size(&args.max_memory)?;
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }

    logger::init(&settings).context("Failed to initialize logging")?;

    match args.command {
        Command::Init => init(&settings),
        Command::Inspect { path } => inspect(&settings, &path),
        Command::Report { metrics_file } => {
            let path = metrics_file.unwrap_or_else(|| settings.performance_log_file.clone());
            report(&path)
        }
    }
}

fn init(settings: &Settings) -> Result<()> {
    logger::log_start_process("init");
    settings
        .ensure_directories()
        .context("Failed to create data directories")?;

    for dir in settings.directories() {
        tracing::info!("  Directory: {}", dir.display());
    }
    let detected = detect_memory_limit();
    tracing::info!("  Detected memory limit: {:.2} GB", gib(detected));
    tracing::info!(
        "  Memory budget: {:.2} GB (configured {:.2} GB)",
        gib(settings.effective_memory_budget()),
        gib(settings.max_memory_use)
    );
    if settings.max_memory_use > detected {
        tracing::warn!("  Configured memory budget exceeds what this host allows");
    }
    tracing::info!("  Chunk size: {}", settings.chunk_size);
    for (file_type, extensions) in &settings.supported_file_types {
        tracing::info!("  {}: {}", file_type, extensions.join(", "));
    }
    logger::log_end_process("init");
    Ok(())
}

fn inspect(settings: &Settings, path: &Path) -> Result<()> {
    match settings.file_type_for(path) {
        Some(file_type) => {
            let state = if path.is_file() { "exists" } else { "not found" };
            println!("{}: {} ({})", path.display(), file_type, state);
            Ok(())
        }
        None => anyhow::bail!("Unsupported file type: {}", path.display()),
    }
}

fn report(path: &Path) -> Result<()> {
    let metrics = if path.exists() {
        load_metrics(path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        Vec::new()
    };
    println!("{}", PerformanceReport::new(&metrics));
    Ok(())
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}
