//! Command-line front end for rating packs.
//!
//! `pack-ratings` turns delimited text into a pack file; `validate-pack` checks one or more
//! pack files and exits non-zero if any of them is inconsistent.
//!
//! Pack settings are loaded from (in precedence order): defaults, config file
//! (`--config`, else `ratingpack.toml` if present), environment variables
//! (`RATINGPACK__*`), and CLI flags.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use config::{Config, Environment, File};
use ratingpack::compression::CompressionMode;
use ratingpack::ingest::pack_text_file;
use ratingpack::telemetry::{PackEvent, PackEventListener};
use ratingpack::validate::validate_files;
use ratingpack::PackConfig;
use tracing_subscriber::EnvFilter;

// ---------- CLI ----------

/// Build and check packed rating files.
#[derive(Parser, Debug)]
#[command(name = "ratingpack", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `ratingpack.toml` is loaded when it exists.
    #[arg(long, env = "RATINGPACK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false, global = true)]
    pub no_config: bool,

    /// Log filter (e.g. `info`, `ratingpack=debug`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack a delimited rating file (`user,item,rating[,timestamp]`, optionally gzip/zstd-compressed).
    PackRatings(PackArgs),
    /// Validate pack files; exits non-zero listing every file with violations.
    ValidatePack(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Input text file.
    #[arg(short, long, required_unless_present = "print_config")]
    pub input: Option<PathBuf>,

    /// Output pack file.
    #[arg(short, long, required_unless_present = "print_config")]
    pub output: Option<PathBuf>,

    /// Do not store timestamps.
    #[arg(long, default_value_t = false)]
    pub no_timestamps: bool,

    /// Output compression: none, gzip, zstd or zstd:<level>.
    #[arg(long)]
    pub compression: Option<String>,

    /// Field delimiter (`tab` for a tab character).
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Leading input lines to skip.
    #[arg(long)]
    pub skip_header_lines: Option<usize>,

    /// Print the effective configuration (file + env + CLI) and exit without packing.
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pack files to check.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

// ---------- File/env config (all optional for partial config) ----------

/// Pack settings as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PackFileConfig {
    pub include_timestamps: Option<bool>,
    /// `"gzip"` / `"zstd:5"`, or a `[compression]` table with `type = "zstd", level = 3`.
    pub compression: Option<CompressionMode>,
    pub delimiter: Option<String>,
    pub skip_header_lines: Option<usize>,
}

/// Load merged pack settings. CLI overrides file/env.
fn load_pack_config(cli: &Cli, args: &PackArgs) -> Result<PackConfig, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("ratingpack.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("RATINGPACK")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: PackFileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut config = PackConfig::default();
    merge_into_pack_config(&mut config, &partial);

    if args.no_timestamps {
        config.include_timestamps = false;
    }
    if let Some(ref c) = args.compression {
        config.compression = c.parse().map_err(|e: ratingpack::PackError| e.to_string())?;
    }
    if let Some(ref d) = args.delimiter {
        config.delimiter = d.clone();
    }
    if let Some(n) = args.skip_header_lines {
        config.skip_header_lines = n;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Merge file/env partial config onto `PackConfig`. Only overwrites fields that are `Some`.
fn merge_into_pack_config(base: &mut PackConfig, partial: &PackFileConfig) {
    if let Some(b) = partial.include_timestamps {
        base.include_timestamps = b;
    }
    if let Some(c) = partial.compression {
        base.compression = c;
    }
    if let Some(ref d) = partial.delimiter {
        base.delimiter = d.clone();
    }
    if let Some(n) = partial.skip_header_lines {
        base.skip_header_lines = n;
    }
}

// ---------- Logging ----------

/// Forwards library events to `tracing`.
#[derive(Debug)]
struct TracingEventListener;

impl PackEventListener for TracingEventListener {
    fn on_event(&self, event: PackEvent) {
        match event {
            PackEvent::StoreBuilt { ratings, users, items } => {
                tracing::debug!(ratings, users, items, "store built")
            }
            PackEvent::PackCreated {
                path,
                ratings,
                users,
                items,
                compression,
            } => tracing::info!(
                path = %path.display(),
                ratings,
                users,
                items,
                %compression,
                "pack written"
            ),
            PackEvent::PackOpened {
                path,
                ratings,
                compressed,
            } => tracing::debug!(path = %path.display(), ratings, compressed, "pack opened"),
            PackEvent::RatingsResorted { path, ratings } => tracing::info!(
                path = %path.display(),
                ratings,
                "timestamps out of order; ratings re-sorted"
            ),
            PackEvent::WriterAbandoned { path, ratings } => tracing::warn!(
                path = %path.display(),
                ratings,
                "pack writer abandoned; partial output discarded"
            ),
            PackEvent::SnapshotWritten { path, bytes } => {
                tracing::info!(path = %path.display(), bytes, "snapshot written")
            }
            PackEvent::ValidationFinished { path, violations } => {
                tracing::debug!(path = %path.display(), violations, "validation finished")
            }
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ---------- Commands ----------

fn run_pack(cli: &Cli, args: &PackArgs, listener: Arc<dyn PackEventListener>) -> Result<(), String> {
    let config = load_pack_config(cli, args)?;

    if args.print_config {
        println!("include_timestamps={}", config.include_timestamps);
        println!("compression={}", config.compression);
        println!("delimiter={:?}", config.field_delimiter());
        println!("skip_header_lines={}", config.skip_header_lines);
        return Ok(());
    }

    let (Some(input), Some(output)) = (args.input.as_deref(), args.output.as_deref()) else {
        return Err("--input and --output are required".to_string());
    };
    let summary = pack_text_file(input, output, &config, listener)
        .map_err(|e| format!("{}: {}", input.display(), e))?;
    println!(
        "packed {} ratings ({} users, {} items) into {}",
        summary.rating_count,
        summary.user_count,
        summary.item_count,
        summary.path.display()
    );
    Ok(())
}

fn run_validate(args: &ValidateArgs, listener: Arc<dyn PackEventListener>) -> Result<(), String> {
    let summary = validate_files(&args.files, &listener);
    for report in &summary.reports {
        let path = report.path.as_deref().unwrap_or(Path::new("?"));
        if report.is_valid() {
            tracing::info!(path = %path.display(), "pack is valid");
            continue;
        }
        for v in &report.violations {
            tracing::error!(path = %path.display(), "{}", v);
        }
        let hidden = report.violation_count - report.violations.len();
        if hidden > 0 {
            tracing::error!(path = %path.display(), hidden, "further violations not shown");
        }
    }

    let failed = summary.failed_files();
    if failed.is_empty() {
        println!("{} pack file(s) valid", summary.reports.len());
        Ok(())
    } else {
        for p in &failed {
            println!("INVALID {}", p.display());
        }
        Err(format!("{} of {} pack file(s) invalid", failed.len(), summary.reports.len()))
    }
}

// ---------- Main ----------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let listener: Arc<dyn PackEventListener> = Arc::new(TracingEventListener);

    let result = match &cli.command {
        Command::PackRatings(args) => run_pack(&cli, args, listener),
        Command::ValidatePack(args) => run_validate(args, listener),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
