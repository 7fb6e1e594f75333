//! CLI binary for docai-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one document and writes its artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use docai_extract::{
    inspect, load_document, ExtractionConfig, ExtractionProgressCallback, JobStatus,
    LocalDirStore, PageOrchestrator, ProcessorConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar; pages resolve out of order so only counts are shown.
struct CliProgressCallback {
    bar: ProgressBar,
    retries: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Splitting PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            retries: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_page_retry(&self, index: usize, attempt: u32, error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} Page {:>3}  attempt {} failed, retrying  {}",
            yellow("↻"),
            index + 1,
            attempt,
            dim(&msg),
        ));
    }

    fn on_page_resolved(&self, _index: usize, resolved: usize, _total: usize) {
        self.bar.set_position(resolved as u64);
    }

    fn on_job_complete(&self, _total_pages: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract entities, writing input/ and output/ under the current directory
  docai-extract claim.pdf

  # Choose the output directory and concurrency
  docai-extract claim.pdf --out-dir ./reports --concurrency 8

  # Extract from a URL and print the job as JSON
  docai-extract https://example.com/forms/claim.pdf --json > job.json

  # Page count and PDF version only (no credentials needed)
  docai-extract --inspect-only claim.pdf

OUTPUT LAYOUT:
  <out-dir>/input/<stem>_<YYYYmmdd_HHMMSS>.pdf    copy of the input
  <out-dir>/output/<stem>_<YYYYmmdd_HHMMSS>.xlsx  "Page Details" + "Consolidated"
  <out-dir>/output/<stem>_<YYYYmmdd_HHMMSS>.json  full job record

ENVIRONMENT VARIABLES:
  DOCAI_PROJECT_ID      Google Cloud project that owns the processor
  DOCAI_LOCATION        Processor region (default: us)
  DOCAI_PROCESSOR_ID    Document AI processor ID
  DOCAI_ENDPOINT        Override https://{location}-documentai.googleapis.com
  DOCAI_ACCESS_TOKEN    OAuth2 bearer token (e.g. `gcloud auth print-access-token`)

Press Ctrl-C to cancel: pages not yet resolved are reported as Cancelled and
the partial report is still written.
"#;

/// Extract entities from PDF pages in parallel with Google Document AI.
#[derive(Parser, Debug)]
#[command(
    name = "docai-extract",
    version,
    about = "Extract entities from PDF documents page by page with Google Document AI",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Directory receiving input/ and output/ artifacts.
    #[arg(short, long, env = "DOCAI_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Google Cloud project ID.
    #[arg(long, env = "DOCAI_PROJECT_ID")]
    project: Option<String>,

    /// Processor location (us, eu, ...).
    #[arg(long, env = "DOCAI_LOCATION", default_value = "us")]
    location: String,

    /// Document AI processor ID.
    #[arg(long, env = "DOCAI_PROCESSOR_ID")]
    processor: Option<String>,

    /// Override the Document AI endpoint base URL.
    #[arg(long, env = "DOCAI_ENDPOINT")]
    endpoint: Option<String>,

    /// OAuth2 access token.
    #[arg(long, env = "DOCAI_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Pages in flight at once.
    #[arg(short, long, env = "DOCAI_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Total attempts per page for transient failures.
    #[arg(long, env = "DOCAI_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Per-call timeout in seconds.
    #[arg(long, env = "DOCAI_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCAI_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the job as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Print page count and PDF version only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCAI_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCAI_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCAI_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input, cli.download_timeout)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("File:         {}", cli.input);
            println!("Pages:        {}", info.page_count);
            println!("PDF Version:  {}", info.pdf_version);
            println!("Size:         {} bytes", info.byte_len);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let orchestrator = build_orchestrator(&cli, progress_cb)?;

    // ── Ctrl-C cancels the job; the partial report is still written ──────
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling outstanding pages");
            cancel.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let document = load_document(&cli.input, cli.download_timeout)
        .await
        .context("Failed to load PDF")?;
    let store = LocalDirStore::new(&cli.out_dir);
    let stored = orchestrator
        .run_and_store(&document, &store)
        .await
        .context("Extraction failed")?;
    let job = &stored.job;

    if cli.json {
        let json = serde_json::to_string_pretty(job).context("Failed to serialise job")?;
        println!("{json}");
    }

    if !cli.quiet {
        let s = &job.stats;
        let mark = match job.status {
            JobStatus::Completed => green("✔"),
            JobStatus::CompletedWithFailures => yellow("⚠"),
            JobStatus::Cancelled => red("✘"),
        };
        eprintln!(
            "{}  {}/{} pages  {} entities  {}ms  →  {}",
            mark,
            s.succeeded_pages,
            s.total_pages,
            s.entity_count,
            s.total_duration_ms,
            bold(&stored.workbook_location),
        );
        for outcome in job.report.outcomes.iter().filter(|o| !o.is_success()) {
            if let Some(err) = &outcome.error {
                eprintln!("   {} {}", red("✗"), dim(&err.to_string()));
            }
        }
        eprintln!("   {}", dim(&format!("json: {}", stored.json_location)));
    }

    if job.status == JobStatus::Cancelled {
        std::process::exit(130);
    }
    Ok(())
}

/// Validate the configuration and build the client. No request is made.
fn build_orchestrator(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PageOrchestrator> {
    let config = build_config(cli, progress)?;
    PageOrchestrator::new(config).context("Invalid Document AI processor configuration")
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut processor = ProcessorConfig::new(
        cli.project.clone().unwrap_or_default(),
        cli.location.clone(),
        cli.processor.clone().unwrap_or_default(),
    );
    if let Some(ref endpoint) = cli.endpoint {
        processor = processor.with_endpoint(endpoint.clone());
    }
    if let Some(ref token) = cli.access_token {
        processor = processor.with_access_token(token.clone());
    }

    let mut builder = ExtractionConfig::builder()
        .processor(processor)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
