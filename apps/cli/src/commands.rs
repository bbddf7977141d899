//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use phishlens_core::pipeline::{
    self, Enricher, ProgressReporter, RunInput, RunSummary, ServiceSelection, Workspace,
};
use phishlens_shared::{AppConfig, Service, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// phishlens: triage the links in suspicious email.
#[derive(Parser)]
#[command(
    name = "phishlens",
    version,
    about = "Extract, deduplicate, enrich, and report on URLs found in phishing emails.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.phishlens/phishlens.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for every artifact (overrides config).
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Root of the response caches (overrides config).
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Which reputation services to query.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ServiceArg {
    Reputation,
    Sandbox,
    All,
}

impl From<ServiceArg> for ServiceSelection {
    fn from(arg: ServiceArg) -> Self {
        match arg {
            ServiceArg::Reputation => Self::Reputation,
            ServiceArg::Sandbox => Self::Sandbox,
            ServiceArg::All => Self::All,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Pull URLs out of an email export's `body` column.
    Extract {
        /// Email export CSV with a `body` column.
        #[arg(long)]
        emails: PathBuf,
    },

    /// Normalize, deduplicate, and resolve domains.
    Clean {
        /// Extracted `row,url` CSV (defaults to the extract artifact).
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Look cleaned URLs up with the reputation services.
    Enrich {
        /// Service to query.
        #[arg(long, value_enum, default_value = "all")]
        service: ServiceArg,

        /// Look up at most this many URLs per service.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Consolidate results and write the findings report.
    Report {
        /// Rows kept in the findings table.
        #[arg(long)]
        top: Option<usize>,
    },

    /// Run every stage end to end.
    Run {
        /// Email export CSV with a `body` column.
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        emails: Option<PathBuf>,

        /// Already extracted `row,url` CSV.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Service to query.
        #[arg(long, value_enum, default_value = "all")]
        service: ServiceArg,

        /// Look up at most this many URLs per service.
        #[arg(long)]
        limit: Option<usize>,

        /// Rows kept in the findings table.
        #[arg(long)]
        top: Option<usize>,
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
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "phishlens=info",
        1 => "phishlens=debug",
        _ => "phishlens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        };
    }

    let config = resolve_config(&cli)?;
    let ws = Workspace::from_config(&config);

    match cli.command {
        Command::Extract { emails } => cmd_extract(&ws, &emails),
        Command::Clean { input } => cmd_clean(&ws, input.as_deref()),
        Command::Enrich { service, limit } => cmd_enrich(&ws, &config, service.into(), limit).await,
        Command::Report { top } => cmd_report(&ws, &config, top),
        Command::Run {
            emails,
            input,
            service,
            limit,
            top,
        } => {
            let input = match (emails, input) {
                (Some(path), _) => RunInput::Emails(path),
                (None, Some(path)) => RunInput::Extracted(path),
                (None, None) => return Err(eyre!("either --emails or --input is required")),
            };
            cmd_run(&ws, &config, &input, service.into(), limit, top).await
        }
        Command::Config { .. } => Ok(()),
    }
}

/// Load the config file, then apply global CLI overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(dir) = &cli.output_dir {
        config.paths.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.paths.cache_dir = dir.clone();
    }
    Ok(config)
}

/// Build the enricher, applying `--limit` to every selected service.
fn build_enricher(
    config: &AppConfig,
    selection: ServiceSelection,
    limit: Option<usize>,
) -> Result<Enricher> {
    let enricher = Enricher::from_config(config, selection)?;
    Ok(match limit {
        Some(n) => enricher.with_limits(Some(n), Some(n)),
        None => enricher,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_extract(ws: &Workspace, emails: &Path) -> Result<()> {
    info!(emails = %emails.display(), "extracting urls");
    let (_, summary) = pipeline::extract(ws, emails)?;

    println!();
    println!("  Emails read:  {}", summary.emails);
    println!("  URLs found:   {}", summary.occurrences);
    println!("  Written to:   {}", ws.output_dir().display());
    println!();
    Ok(())
}

fn cmd_clean(ws: &Workspace, input: Option<&Path>) -> Result<()> {
    let cleaned = pipeline::clean_file(ws, input)?;
    let s = &cleaned.summary;

    println!();
    println!("  Occurrences:  {}", s.occurrences);
    println!("  Rejected:     {}", rejected_total(s));
    println!("  Duplicates:   {}", s.duplicates);
    println!("  Unique URLs:  {}", s.unique);
    println!("  Domains:      {}", s.domains);
    println!();
    Ok(())
}

async fn cmd_enrich(
    ws: &Workspace,
    config: &AppConfig,
    selection: ServiceSelection,
    limit: Option<usize>,
) -> Result<()> {
    // Keys are resolved here, before any request goes out.
    let mut enricher = build_enricher(config, selection, limit)?;

    let reporter = CliProgress::new();
    let summary = pipeline::enrich_file(ws, &mut enricher, &reporter).await?;
    reporter.finish();

    println!();
    for s in [&summary.reputation, &summary.sandbox].into_iter().flatten() {
        println!(
            "  {:<11} looked up {}, cached {}, fetched {}, unavailable {}",
            s.service.as_str(), s.looked_up, s.cache_hits, s.fetches, s.unavailable
        );
    }
    println!();
    Ok(())
}

fn cmd_report(ws: &Workspace, config: &AppConfig, top: Option<usize>) -> Result<()> {
    let mut policy = config.report.clone();
    if let Some(n) = top {
        policy.top_n = n;
    }

    let summary = pipeline::report_files(ws, &policy)?;

    println!();
    println!("  Consolidated: {}", summary.consolidated);
    println!("  Flagged:      {}", summary.flagged);
    println!("  Reported:     {}", summary.reported);
    println!("  Findings:     {}", ws.path(phishlens_core::artifacts::FINDINGS).display());
    println!();
    Ok(())
}

async fn cmd_run(
    ws: &Workspace,
    config: &AppConfig,
    input: &RunInput,
    selection: ServiceSelection,
    limit: Option<usize>,
    top: Option<usize>,
) -> Result<()> {
    let mut enricher = build_enricher(config, selection, limit)?;
    let mut policy = config.report.clone();
    if let Some(n) = top {
        policy.top_n = n;
    }

    let reporter = CliProgress::new();
    let summary = pipeline::run(ws, input, &mut enricher, &policy, &reporter).await?;

    println!();
    println!("  Run:          {}", summary.run_id);
    println!("  Unique URLs:  {}", summary.clean.unique);
    println!("  Flagged:      {}", summary.report.flagged);
    println!("  Reported:     {}", summary.report.reported);
    println!("  Output:       {}", ws.output_dir().display());
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

fn rejected_total(summary: &pipeline::CleanSummary) -> usize {
    let r = &summary.rejected;
    r.empty + r.non_web_scheme + r.no_candidate + r.unsupported_scheme
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

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn url_looked_up(&self, service: Service, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{service} [{current}/{total}] {url}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.finish();
    }
}
