//! CLI binary for fliphtml5-dl.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DownloadConfig`, draws progress, and turns the outcome into an exit code:
//! 0 on success, 2 on any fatal error, 130 on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use fliphtml5_dl::text::{clean_description, short_label};
use fliphtml5_dl::{
    download_book, inspect, CancellationToken, DownloadConfig, DownloadProgressCallback,
    DownloadStats, FlipError, ProgressCallback, SizeTier, TaskOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while the book is resolved, then one bar for
/// the download phase and one for PDF assembly.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Resolving");
        bar.set_message("Fetching book…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, prefix: &'static str, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(prefix);
        self.bar.set_message("");
        self.bar.reset_eta();
    }
}

impl DownloadProgressCallback for CliProgress {
    fn on_book_info(&self, title: Option<&str>, description: Option<&str>, pages: usize) {
        self.bar.suspend(|| print_book_info(title, description, pages));
    }

    fn on_download_start(&self, total_tasks: usize) {
        self.activate_bar("Download", total_tasks);
    }

    fn on_task_complete(&self, label: &str, outcome: &TaskOutcome, _counts: &DownloadStats) {
        if let TaskOutcome::Failed(failure) = outcome {
            self.bar.println(format!(
                "  {} {}  {}",
                red("✗"),
                short_label(label, 36),
                red(&failure.to_string())
            ));
        }
        self.bar.set_message(short_label(label, 36));
        self.bar.inc(1);
    }

    fn on_download_complete(&self, stats: &DownloadStats) {
        self.bar.println(format!(
            "  {} {} ok  {} skipped  {} failed",
            if stats.failed == 0 { green("✓") } else { red("✗") },
            stats.ok,
            stats.skipped,
            stats.failed
        ));
    }

    fn on_assembly_start(&self, total_pages: usize) {
        self.activate_bar("PDF", total_pages);
    }

    fn on_page_embedded(&self, _page_num: usize, _total_pages: usize, label: &str) {
        self.bar.set_message(short_label(label, 36));
        self.bar.inc(1);
    }

    fn on_assembly_complete(&self, _path: &Path) {
        self.bar.finish_and_clear();
    }
}

/// Plain-text progress when the bar is off: book info only.
struct InfoOnly;

impl DownloadProgressCallback for InfoOnly {
    fn on_book_info(&self, title: Option<&str>, description: Option<&str>, pages: usize) {
        print_book_info(title, description, pages);
    }
}

fn print_book_info(title: Option<&str>, description: Option<&str>, pages: usize) {
    let desc = clean_description(description, None);
    println!("{}", bold("Book"));
    println!("  Title: {}", title.unwrap_or("-"));
    if !desc.is_empty() {
        println!("  Description:");
        for line in textwrap::wrap(&desc, 76) {
            println!("    {line}");
        }
    }
    println!("  Pages: {pages}");
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Download a book into ./download/<Title>.pdf
  fliphtml5-dl https://fliphtml5.com/abcde/fghi/Some-Title/

  # Choose the output file and keep the page images
  fliphtml5-dl fliphtml5.com/abcde/fghi --pdf book.pdf --keep-pages

  # One page at a time, thumbnails only
  fliphtml5-dl https://online.fliphtml5.com/abcde/fghi/ --workers 1 --size thumb

  # Show title and page count without downloading
  fliphtml5-dl --inspect-only https://fliphtml5.com/abcde/fghi/

EXIT CODES:
  0    PDF written
  2    invalid link, fetch/decode failure, failed pages, or PDF error
  130  interrupted (Ctrl-C)

ENVIRONMENT VARIABLES:
  FLIPHTML5_*          Fallback for every flag (e.g. FLIPHTML5_WORKERS=8)
  DESTRING_CACHE_DIR   Where the decoder bundle is cached
  DESTRING_JS_PATH     Use an existing deString.js instead of downloading it
  RUST_LOG             Override the log filter
"#;

/// Download a FlipHTML5 book and save it as a PDF.
#[derive(Parser, Debug)]
#[command(
    name = "fliphtml5-dl",
    version,
    about = "Download FlipHTML5 pages from a book URL and assemble a PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// FlipHTML5 public URL (e.g. https://fliphtml5.com/<pub>/<book>/Title).
    #[arg(env = "FLIPHTML5_URL")]
    url: String,

    /// Output directory.
    #[arg(long, env = "FLIPHTML5_OUT", default_value = "download")]
    out: PathBuf,

    /// Number of download workers.
    #[arg(long, env = "FLIPHTML5_WORKERS", default_value_t = 6,
          value_parser = clap::value_parser!(u64).range(1..))]
    workers: u64,

    /// Overwrite existing page files.
    #[arg(long, env = "FLIPHTML5_OVERWRITE")]
    overwrite: bool,

    /// Save the book configuration as <out>/config.json.
    #[arg(long, env = "FLIPHTML5_SAVE_CONFIG")]
    save_config: bool,

    /// Output PDF path (default: <out>/<title>.pdf).
    #[arg(long, env = "FLIPHTML5_PDF")]
    pdf: Option<PathBuf>,

    /// Keep downloaded page images in <out>/_pages.
    #[arg(long, env = "FLIPHTML5_KEEP_PAGES")]
    keep_pages: bool,

    /// Image size tier to download.
    #[arg(long, env = "FLIPHTML5_SIZE", value_enum, default_value = "large")]
    size: SizeArg,

    /// Attempts per page, including the first.
    #[arg(long, env = "FLIPHTML5_MAX_ATTEMPTS", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Connect/read timeout in seconds.
    #[arg(long, env = "FLIPHTML5_TIMEOUT", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Print book info only, no download.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "FLIPHTML5_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FLIPHTML5_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the final path.
    #[arg(short, long, env = "FLIPHTML5_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SizeArg {
    Large,
    Thumb,
}

impl From<SizeArg> for SizeTier {
    fn from(v: SizeArg) -> Self {
        match v {
            SizeArg::Large => SizeTier::Large,
            SizeArg::Thumb => SizeTier::Thumb,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback while it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
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

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<FlipError>() {
            Some(e) if e.is_cancellation() => {
                eprintln!("{}", dim("cancelled"));
                ExitCode::from(e.exit_code())
            }
            Some(e) => {
                eprintln!("{} {e}", red("error:"));
                ExitCode::from(e.exit_code())
            }
            None => {
                eprintln!("{} {err:#}", red("error:"));
                ExitCode::from(2)
            }
        },
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let bar = show_progress.then(CliProgress::new);
    let progress: Option<ProgressCallback> = match (&bar, cli.quiet) {
        (Some(bar), _) => Some(Arc::clone(bar) as Arc<dyn DownloadProgressCallback>),
        (None, false) => Some(Arc::new(InfoOnly) as Arc<dyn DownloadProgressCallback>),
        (None, true) => None,
    };
    let config = build_config(cli, progress)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.url, &config).await?;
        println!("Reader:  {}", info.base_url);
        print_book_info(
            info.metadata.title.as_deref(),
            info.metadata.description.as_deref(),
            info.page_count,
        );
        return Ok(());
    }

    // ── Ctrl-C → cooperative cancellation ────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = download_book(&cli.url, &config, &cancel).await;
    if let Some(ref bar) = bar {
        bar.bar.finish_and_clear();
    }
    let output = result?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {}",
            green("✔"),
            output.stats.ok + output.stats.skipped,
            dim(&format!("{}ms", output.total_duration_ms)),
        );
    }
    println!("PDF: {}", output.pdf_path.display());
    Ok(())
}

/// Map CLI args to `DownloadConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DownloadConfig> {
    let mut builder = DownloadConfig::builder()
        .out_dir(&cli.out)
        .workers(cli.workers as usize)
        .overwrite(cli.overwrite)
        .save_config(cli.save_config)
        .keep_pages(cli.keep_pages)
        .size(cli.size.into())
        .max_attempts(cli.max_attempts)
        .timeout_secs(cli.timeout);

    if let Some(ref pdf) = cli.pdf {
        builder = builder.pdf_path(pdf);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
