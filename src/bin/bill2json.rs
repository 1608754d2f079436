//! CLI binary for edgequake-bill2json.
//!
//! `serve` runs the HTTP service; `extract` runs one document and prints the
//! response envelope. Both map their flags onto `ExtractionConfig`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_bill2json::{
    extract_with_provider, resolve_provider, serve, AppState, BillExtractError,
    ExtractResponse, ExtractionConfig, ExtractionOutput, ExtractionProgressCallback,
    PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished page. Pages finish out
/// of order, so start times are kept per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Fetching document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_no: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_no))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Extracting");
    }

    fn on_page_start(&self, page_no: usize, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_no, Instant::now());
        }
        self.bar.set_message(format!("page {page_no}"));
    }

    fn on_page_complete(&self, page_no: usize, total_pages: usize, item_count: usize) {
        let secs = self.elapsed_secs(page_no);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            green("✓"),
            page_no,
            total_pages,
            dim(&format!("{item_count:>3} items")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_no: usize, total_pages: usize, error: String) {
        let secs = self.elapsed_secs(page_no);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_no,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, total_item_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} unique items from {}/{} pages",
            if failed == 0 { green("✔") } else { red("⚠") },
            bold(&total_item_count.to_string()),
            total_pages.saturating_sub(failed),
            total_pages,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  bill2json serve --port 8000

  # Extract one bill and pretty-print the response
  bill2json extract https://example.com/bill.pdf --pretty

  # Local scan, first two pages only, with Gemini
  bill2json --provider gemini extract ./scan.pdf --pages 1-2

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  BILL2JSON_*             Any flag below, e.g. BILL2JSON_PORT=9000

A .env file in the working directory is loaded first.
"#;

/// Extract invoice line items with Vision LLMs.
#[derive(Parser, Debug)]
#[command(name = "bill2json", version, after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    opts: ExtractOpts,

    /// Debug logging.
    #[arg(short, long, global = true, env = "BILL2JSON_VERBOSE")]
    verbose: bool,

    /// Errors only; no progress bar.
    #[arg(short, long, global = true, env = "BILL2JSON_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "BILL2JSON_HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "BILL2JSON_PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Extract one document (URL or local path) and print the JSON envelope.
    Extract {
        /// Document URL or file path.
        input: String,

        /// Pages to extract: all, 3, 1-5, or 1,3,7.
        #[arg(long, env = "BILL2JSON_PAGES", default_value = "all")]
        pages: String,

        /// Pretty-print the JSON.
        #[arg(long, env = "BILL2JSON_PRETTY")]
        pretty: bool,
    },
}

#[derive(Args, Debug)]
struct ExtractOpts {
    /// LLM provider (gemini, openai, anthropic, ollama, …).
    #[arg(long, global = true, env = "BILL2JSON_PROVIDER")]
    provider: Option<String>,

    /// Model ID; defaults per provider.
    #[arg(short, long, global = true, env = "BILL2JSON_MODEL")]
    model: Option<String>,

    /// Render DPI (72–400).
    #[arg(long, global = true, env = "BILL2JSON_DPI", default_value_t = 150)]
    dpi: u32,

    /// Concurrent model calls per document.
    #[arg(short, long, global = true, env = "BILL2JSON_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    #[arg(long, global = true, env = "BILL2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    #[arg(long, global = true, env = "BILL2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    #[arg(long, global = true, env = "BILL2JSON_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Name similarity (0.0–1.0) for two items to count as one.
    #[arg(long, global = true, env = "BILL2JSON_SIMILARITY", default_value_t = 0.92)]
    similarity: f64,

    /// Absolute amount difference tolerated between duplicates.
    #[arg(long, global = true, env = "BILL2JSON_AMOUNT_TOLERANCE", default_value_t = 1.0)]
    amount_tolerance: f64,

    /// PDF password.
    #[arg(long, global = true, env = "BILL2JSON_PASSWORD")]
    password: Option<String>,

    /// File containing a custom extraction prompt.
    #[arg(long, global = true, env = "BILL2JSON_SYSTEM_PROMPT_FILE")]
    system_prompt_file: Option<String>,

    /// Download timeout in seconds.
    #[arg(long, global = true, env = "BILL2JSON_DOWNLOAD_TIMEOUT", default_value_t = 20)]
    download_timeout: u64,

    /// Per-page model call timeout in seconds.
    #[arg(long, global = true, env = "BILL2JSON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let show_progress = matches!(cli.command, Command::Extract { .. }) && !cli.quiet;
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

    match cli.command {
        Command::Serve { ref host, port } => {
            let pages = PageSelection::All;
            let config = build_config(&cli.opts, pages, None).await?;
            let provider = resolve_provider(&config).context("No LLM provider available")?;
            let addr = format!("{host}:{port}");
            serve(&addr, AppState::new(provider, config))
                .await
                .with_context(|| format!("Server on {addr} stopped"))?;
        }
        Command::Extract {
            ref input,
            ref pages,
            pretty,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let config = build_config(&cli.opts, parse_pages(pages)?, progress).await?;
            let result = match resolve_provider(&config) {
                Ok(provider) => extract_with_provider(input, &provider, &config).await,
                Err(e) => Err(e),
            };

            let (response, failed) = into_envelope(result);
            println!("{}", render_json(&response, pretty)?);
            if failed {
                if let Some(ref e) = response.error {
                    eprintln!("Extraction failed: {e}");
                }
                std::process::exit(1);
            }

            if !cli.quiet {
                eprintln!(
                    "   {} tokens in  /  {} tokens out",
                    dim(&response.token_usage.input_tokens.to_string()),
                    dim(&response.token_usage.output_tokens.to_string()),
                );
            }
        }
    }

    Ok(())
}

/// Success or failure envelope for an extraction result; `true` when it failed.
fn into_envelope(result: Result<ExtractionOutput, BillExtractError>) -> (ExtractResponse, bool) {
    match result {
        Ok(output) => (output.into_response(), false),
        Err(e) => (ExtractResponse::failure(e.to_string()), true),
    }
}

fn render_json(response: &ExtractResponse, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(response)
    } else {
        serde_json::to_string(response)
    }
    .context("Failed to serialise response")
}

/// Map CLI flags to `ExtractionConfig`.
async fn build_config(
    opts: &ExtractOpts,
    pages: PageSelection,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(opts.dpi)
        .concurrency(opts.concurrency)
        .max_tokens(opts.max_tokens)
        .temperature(opts.temperature)
        .max_retries(opts.max_retries)
        .similarity_threshold(opts.similarity)
        .amount_tolerance(opts.amount_tolerance)
        .download_timeout_secs(opts.download_timeout)
        .api_timeout_secs(opts.api_timeout)
        .pages(pages);

    if let Some(ref provider) = opts.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = opts.model {
        builder = builder.model(model);
    }
    if let Some(ref password) = opts.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = opts.system_prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` into a `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    if s.contains(',') {
        let pages = s
            .split(',')
            .map(|p| {
                let p = p.trim();
                match p.parse::<usize>() {
                    Ok(n) if n >= 1 => Ok(n),
                    Ok(n) => anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", n),
                    Err(_) => anyhow::bail!("Invalid page number: '{}'", p),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
