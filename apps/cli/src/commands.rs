//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use noticeharvest_core::{
    CategoryReport, CategoryStatus, CrawlMode, CrawlOptions, CrawlReport, PipelineContext,
    ProgressReporter,
};
use noticeharvest_indexer::{IndexMode, IndexOptions, IndexReport};
use noticeharvest_shared::{
    AppConfig, DATE_FORMAT, PostOutcome, StrategyKind, config_file_path, init_config, load_config,
    load_config_from,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// NoticeHarvest: incremental notice-board crawler and index sync.
#[derive(Parser)]
#[command(
    name = "noticeharvest",
    version,
    about = "Crawl university notice boards, summarize new posts, and sync a vector index.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.noticeharvest/noticeharvest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum CrawlModeArg {
    /// Most recent listing entries, oldest first.
    Recent,
    /// Sequential seq scan until consecutive misses.
    Scan,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StrategyArg {
    /// Extracted text plus sliced screenshots.
    TextScreenshot,
    /// Rendered PDF.
    Document,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::TextScreenshot => StrategyKind::TextScreenshot,
            StrategyArg::Document => StrategyKind::Document,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum IndexModeArg {
    /// Clear the namespace, then index everything.
    Rebuild,
    /// Add on top of existing vectors.
    Append,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl notice boards and store new or changed posts.
    Crawl {
        /// Enumeration mode.
        #[arg(long, value_enum, default_value = "recent")]
        mode: CrawlModeArg,

        /// First seq for scan mode (overrides per-category start_seq).
        #[arg(long)]
        start_seq: Option<u64>,

        /// Only crawl these categories (repeatable).
        #[arg(long = "category", short = 'c')]
        categories: Vec<String>,

        /// Content acquisition strategy (overrides config).
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Chunk stored summaries and upsert them into the vector index.
    Index {
        #[arg(long, value_enum, default_value = "rebuild")]
        mode: IndexModeArg,

        /// Only notices posted on or after this date (YYYY-MM-DD); append mode only.
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration.
    Show,
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DD, got '{raw}': {e}"))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "noticeharvest=info",
        1 => "noticeharvest=debug",
        _ => "noticeharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Crawl {
            mode,
            start_seq,
            categories,
            strategy,
        } => {
            let mode = match mode {
                CrawlModeArg::Recent => CrawlMode::Recent,
                CrawlModeArg::Scan => CrawlMode::Scan { start_seq },
            };
            cmd_crawl(config_path, mode, categories, strategy).await
        }
        Command::Index { mode, since } => {
            let mode = match mode {
                IndexModeArg::Rebuild => IndexMode::Rebuild,
                IndexModeArg::Append => IndexMode::Append,
            };
            cmd_index(config_path, IndexOptions { mode, since }).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(config_path, force),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    config_path: Option<&Path>,
    mode: CrawlMode,
    categories: Vec<String>,
    strategy: Option<StrategyArg>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(strategy) = strategy {
        config.crawl.strategy = strategy.into();
    }

    info!(
        mode = mode.as_str(),
        strategy = config.crawl.strategy.as_str(),
        categories = ?categories,
        "starting crawl"
    );

    // Fails on a missing API key before any request
    let ctx = PipelineContext::from_config(config).await?;
    let reporter = CliProgress::new();
    let options = CrawlOptions { mode, categories };
    let report = noticeharvest_core::run_crawl(&ctx, &options, &reporter).await;
    reporter.finish();
    let report = report?;

    print_crawl_report(&report);
    Ok(())
}

async fn cmd_index(config_path: Option<&Path>, options: IndexOptions) -> Result<()> {
    let config = resolve_config(config_path)?;
    if options.mode == IndexMode::Append && options.since.is_none() {
        info!("append without --since indexes every stored notice");
    }

    let reporter = CliProgress::new();
    let report = noticeharvest_core::run_index_job(&config, &options, &reporter).await;
    reporter.finish();
    let report = report?;

    print_index_report(&report, &options);
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let target = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if target.exists() && !force {
        return Err(eyre!(
            "config file already exists at '{}' (use --force to overwrite)",
            target.display()
        ));
    }
    let path = init_config(Some(&target))?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_crawl_report(report: &CrawlReport) {
    println!();
    println!(
        "  {:<28} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
        "category", "found", "new", "upd", "same", "miss", "skip"
    );
    for c in &report.categories {
        match c.status {
            CategoryStatus::Completed => println!(
                "  {:<28} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
                c.category,
                c.stats.candidates,
                c.stats.inserted,
                c.stats.updated,
                c.stats.unchanged,
                c.stats.not_found,
                c.stats.skipped_total(),
            ),
            CategoryStatus::Unconfigured => {
                println!("  {:<28} skipped (list_id not configured)", c.category)
            }
            CategoryStatus::NoStartSeq => {
                println!("  {:<28} skipped (no start seq)", c.category)
            }
        }
    }
    println!();
    println!("  Stored: {}", report.stored());
    println!("  Time:   {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_index_report(report: &IndexReport, options: &IndexOptions) {
    println!();
    println!("  Index {} complete", options.mode.as_str());
    if let Some(since) = options.since {
        println!("  Since:   {since}");
    }
    println!("  Notices: {}", report.notices);
    println!("  Chunks:  {}", report.chunks);
    println!("  Batches: {}", report.batches);
    if options.mode == IndexMode::Rebuild && report.batches > 0 {
        println!("  Cleared: {}", if report.cleared { "yes" } else { "no (see log)" });
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

fn outcome_label(outcome: &PostOutcome) -> String {
    match outcome {
        PostOutcome::Stored(kind) => format!("stored ({kind:?})").to_lowercase(),
        PostOutcome::NotFound => "not found".to_string(),
        PostOutcome::SkippedError(stage) => format!("skipped ({})", stage.as_str()),
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn post_processed(
        &self,
        category: &str,
        seq: u64,
        outcome: &PostOutcome,
        current: usize,
        total: Option<usize>,
    ) {
        let position = match total {
            Some(total) => format!("{current}/{total}"),
            None => current.to_string(),
        };
        self.spinner.set_message(format!(
            "{category} [{position}] seq {seq}: {}",
            outcome_label(outcome)
        ));
    }

    fn category_done(&self, report: &CategoryReport) {
        self.spinner.println(format!(
            "{}: {} new, {} updated, {} unchanged, {} missing, {} skipped",
            report.category,
            report.stats.inserted,
            report.stats.updated,
            report.stats.unchanged,
            report.stats.not_found,
            report.stats.skipped_total(),
        ));
    }

    fn index_batch(&self, current: usize, total: usize, vectors: usize) {
        self.spinner
            .set_message(format!("Upserting [{current}/{total}] {vectors} vectors"));
    }
}
