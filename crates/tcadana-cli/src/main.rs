//! tcadana command-line interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tcadana_cache::{CacheStore, Digest};
use tcadana_core::{Fingerprint, FormatTag, RunId};
use tcadana_metrics::MetricKind;
use tcadana_pipeline::{
    CancellationToken, FingerprintMode, Pipeline, PipelineConfig, ProgressObserver, RunPhase,
    cache_digest, discover_runs, inspect_file,
};

#[derive(Parser)]
#[command(name = "tcadana")]
#[command(about = "TCAD ingestion, derived metrics and compressed caching", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cache directory (overrides the configuration)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze every run under a directory tree (<root>/<device>/<variant>/<index>/)
    Analyze {
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// Metrics to compute, comma separated (default: all)
        #[arg(short, long, value_delimiter = ',')]
        metrics: Vec<String>,

        /// Recompute everything, overwriting cached results
        #[arg(long)]
        force: bool,

        /// Do not read or write the cache
        #[arg(long)]
        no_cache: bool,

        /// Fingerprint runs by file contents instead of metadata
        #[arg(long)]
        content_fingerprint: bool,

        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Exit non-zero when the fraction of failed runs exceeds this
        #[arg(long)]
        max_failure_rate: Option<f64>,

        /// Write the batch report as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        /// Write lineage records as JSON
        #[arg(long, value_name = "FILE")]
        lineage: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Detect the format of a file and summarize its records
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Expected format instead of header sniffing
        #[arg(short, long)]
        format: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count, size and counters
    Stats,
    /// Remove every entry
    Clear,
    /// Remove every entry of a run fingerprint (64 hex characters)
    Invalidate {
        #[arg(value_name = "FINGERPRINT")]
        fingerprint: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
    }

    match cli.command {
        Command::Analyze {
            root,
            metrics,
            force,
            no_cache,
            content_fingerprint,
            threads,
            max_failure_rate,
            json,
            lineage,
            quiet,
        } => {
            let force = force || config.force;
            config = config.with_force(force);
            if no_cache {
                config = config.without_cache();
            }
            if content_fingerprint {
                config = config.with_fingerprint_mode(FingerprintMode::Content);
            }
            if let Some(n) = threads {
                config = config.with_threads(n);
            }
            if max_failure_rate.is_some() {
                config = config.with_max_failure_rate(max_failure_rate);
            }
            let metrics = parse_metrics(&metrics)?;
            let opts = OutputOptions { json, lineage, quiet };
            run_analyze(&root, &metrics, config, &opts)
        }
        Command::Inspect { file, format, json } => {
            let declared = format
                .map(|f| f.parse::<FormatTag>())
                .transpose()
                .context("Invalid --format")?;
            let summary = inspect_file(&file, declared, &config.analysis)
                .with_context(|| format!("Failed to inspect {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.to_text());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Cache { action } => {
            let store = CacheStore::open(config.cache.clone())
                .with_context(|| format!("Failed to open cache at {}", config.cache.root.display()))?;
            run_cache(&store, action)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn parse_metrics(names: &[String]) -> Result<Vec<MetricKind>> {
    if names.is_empty() {
        return Ok(MetricKind::ALL.to_vec());
    }
    names
        .iter()
        .map(|n| n.parse::<MetricKind>().with_context(|| format!("Unknown metric '{}'", n)))
        .collect()
}

struct OutputOptions {
    json: Option<PathBuf>,
    lineage: Option<PathBuf>,
    quiet: bool,
}

/// Advances a progress bar as runs finish.
struct BarObserver {
    bar: ProgressBar,
}

impl ProgressObserver for BarObserver {
    fn on_phase(&self, run: &RunId, phase: RunPhase) {
        if phase == RunPhase::Parsing || phase == RunPhase::Computing {
            self.bar.set_message(format!("{} {}", run, phase));
        }
    }

    fn on_run_finished(&self, _run: &RunId, _completed: usize, _total: usize) {
        self.bar.inc(1);
    }
}

fn run_analyze(root: &Path, metrics: &[MetricKind], config: PipelineConfig, opts: &OutputOptions) -> Result<ExitCode> {
    let runs = discover_runs(root, &config)
        .with_context(|| format!("Failed to discover runs under {}", root.display()))?;
    if runs.is_empty() {
        bail!("No runs found under {} (expected <device>/<variant>/<index>/)", root.display());
    }

    let threshold = config.max_failure_rate;
    let mut pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;
    let bar = if opts.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(runs.len() as u64)
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    pipeline = pipeline.with_observer(Arc::new(BarObserver { bar: bar.clone() }));

    let report = pipeline.run(&runs, metrics, &CancellationToken::new());
    bar.finish_and_clear();

    print!("{}", report.to_text());

    if let Some(path) = &opts.json {
        fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }
    if let Some(path) = &opts.lineage {
        fs::write(path, serde_json::to_string_pretty(&report.lineage())?)
            .with_context(|| format!("Failed to write lineage: {}", path.display()))?;
    }

    if report.exceeds(threshold) {
        eprintln!(
            "Failure rate {:.1}% exceeds the configured threshold",
            report.failure_rate() * 100.0
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_cache(store: &CacheStore, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats => {
            let stats = store.stats();
            println!("Cache: {}", store.root().display());
            println!("Entries: {}", stats.entries);
            println!("Size:    {} bytes", stats.bytes);
            for key in store.keys().iter().rev().take(10) {
                println!("  {}", key);
            }
        }
        CacheAction::Clear => {
            let entries = store.stats().entries;
            store.clear()?;
            println!("Removed {} entries", entries);
        }
        CacheAction::Invalidate { fingerprint } => {
            let fingerprint = Fingerprint::from_hex(&fingerprint).context("Invalid fingerprint")?;
            let digest: Digest = cache_digest(&fingerprint);
            let removed = store.invalidate(&digest)?;
            println!("Removed {} entries for {}", removed, fingerprint.short());
        }
    }
    Ok(())
}
