//! CLI binary for pdf2invoice.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints one JSON report per input document.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2invoice::{
    extract_batch, inspect, DocumentStatus, ExtractionConfig, ExtractionOutput,
    ExtractionProgressCallback, ExtractionSource, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-page log
/// lines using [indicatif]. Works correctly when pages complete out of
/// order (concurrent mode).
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Pages that errored out, echoed in the final summary line.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_extraction_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_resolved(
        &self,
        page_num: usize,
        total: usize,
        source: ExtractionSource,
        from_cache: bool,
    ) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        let via = if from_cache {
            "cache".to_string()
        } else {
            source.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<6}  {}",
            green("✓"),
            page_num,
            total,
            dim(&via),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_page_failed(&self, page_num: usize, total: usize, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, resolved_count: usize) {
        let failed = self
            .errors
            .swap(0, Ordering::SeqCst)
            .max(total_pages.saturating_sub(resolved_count));
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&resolved_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&resolved_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one invoice (JSON to stdout)
  pdf2invoice invoice.pdf

  # A whole batch, records to a file
  pdf2invoice scans/*.pdf -o records.json

  # Use a specific model, force everything through the AI extractor
  pdf2invoice --model gpt-4.1 --provider openai --force-ai invoice.pdf

  # Tighter gate: accept local OCR only above 0.9
  pdf2invoice --accept-threshold 0.9 invoice.pdf

  # Stay under a strict remote budget
  pdf2invoice --rate-limit 20 --max-in-flight 2 batch/*.pdf

  # Inspect PDF metadata (no API key needed)
  pdf2invoice --inspect-only invoice.pdf

FIELDS EXTRACTED:
  vendor, vendor_tax_id, invoice_number, invoice_date, due_date, currency,
  subtotal, tax, grand_total, purchase_order, plus line items
  (description + amount, page-ordered, de-duplicated).

  Conflicting values across pages are reported as conflicts with all
  candidates and provenance — never silently overwritten.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium

SETUP:
  1. Set an API key:   export OPENAI_API_KEY=sk-...
  2. Install pdfium (or set PDFIUM_LIB_PATH) and, optionally, Tesseract
     (build with --features tesseract) for the free local pass.
  3. Extract:          pdf2invoice invoice.pdf -o record.json
"#;

/// Extract structured invoice records from PDF invoices.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2invoice",
    version,
    about = "Extract structured invoice records from PDF invoices using a hybrid OCR + vision-LLM pipeline",
    long_about = "Extract vendor, totals, dates, tax ids, and line items from PDF invoices \
(local files or URLs). A fast local OCR pass handles clean pages for free; low-confidence \
pages escalate to a vision LLM, behind a content-addressed cache and a rate limiter.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file paths or HTTP/HTTPS URLs (one record per input).
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the JSON report to this file instead of stdout.
    #[arg(short, long, env = "PDF2INVOICE_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2INVOICE_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent pages per document.
    #[arg(short, long, env = "PDF2INVOICE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Concurrent documents in a batch.
    #[arg(long, env = "PDF2INVOICE_DOC_CONCURRENCY", default_value_t = 2)]
    doc_concurrency: usize,

    /// Local OCR confidence at or above which a page skips the AI call.
    #[arg(long, env = "PDF2INVOICE_ACCEPT_THRESHOLD", default_value_t = 0.80)]
    accept_threshold: f32,

    /// Confidence at or above which escalation carries the OCR text hint.
    #[arg(long, env = "PDF2INVOICE_HINT_THRESHOLD", default_value_t = 0.50)]
    hint_threshold: f32,

    /// Skip the local OCR pass and send every page to the AI extractor.
    #[arg(long, env = "PDF2INVOICE_FORCE_AI")]
    force_ai: bool,

    /// Tesseract language code for the local pass.
    #[arg(long, env = "PDF2INVOICE_LANG", default_value = "eng")]
    lang: String,

    /// Retries per page on transient AI failures.
    #[arg(long, env = "PDF2INVOICE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Rolling per-minute AI-call budget (shared by all pages).
    #[arg(long, env = "PDF2INVOICE_RATE_LIMIT", default_value_t = 40)]
    rate_limit: u32,

    /// Concurrent AI calls in flight.
    #[arg(long, env = "PDF2INVOICE_MAX_IN_FLIGHT", default_value_t = 4)]
    max_in_flight: usize,

    /// Extraction-cache capacity in entries.
    #[arg(long, env = "PDF2INVOICE_CACHE_CAPACITY", default_value_t = 512)]
    cache_capacity: usize,

    /// Cache entry TTL in seconds (0 disables expiry).
    #[arg(long, env = "PDF2INVOICE_CACHE_TTL", default_value_t = 86_400)]
    cache_ttl: u64,

    /// Wall-clock budget per document in seconds (0 = unlimited).
    #[arg(long, env = "PDF2INVOICE_DOC_TIMEOUT", default_value_t = 0)]
    doc_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2INVOICE_PASSWORD")]
    password: Option<String>,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2INVOICE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2INVOICE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2INVOICE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2INVOICE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-AI-call timeout in seconds.
    #[arg(long, env = "PDF2INVOICE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
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
        for input in &cli.inputs {
            let meta = inspect(input)
                .await
                .with_context(|| format!("inspecting '{input}'"))?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .page_concurrency(cli.concurrency)
        .document_concurrency(cli.doc_concurrency)
        .accept_threshold(cli.accept_threshold)
        .hint_threshold(cli.hint_threshold)
        .force_ai(cli.force_ai)
        .ocr_language(&cli.lang)
        .max_retries(cli.max_retries)
        .ai_calls_per_minute(cli.rate_limit)
        .max_ai_in_flight(cli.max_in_flight)
        .cache_capacity(cli.cache_capacity)
        .cache_ttl_secs((cli.cache_ttl > 0).then_some(cli.cache_ttl))
        .document_timeout_secs((cli.doc_timeout > 0).then_some(cli.doc_timeout))
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new_dynamic() as ProgressCallback);
    }

    let config = builder.build().context("invalid configuration")?;

    // ── Run the batch ────────────────────────────────────────────────────
    let results = extract_batch(&cli.inputs, &config)
        .await
        .context("extraction could not start")?;

    // ── Report ───────────────────────────────────────────────────────────
    let mut reports = Vec::with_capacity(results.len());
    let mut hard_failures = 0usize;

    for (input, result) in cli.inputs.iter().zip(results) {
        match result {
            Ok(output) => {
                if !cli.quiet {
                    print_summary(input, &output);
                }
                if output.record.status == DocumentStatus::Failed {
                    hard_failures += 1;
                }
                reports.push(serde_json::json!({
                    "input": input,
                    "record": output.record,
                    "pages": output.pages,
                    "metadata": output.metadata,
                    "stats": output.stats,
                }));
            }
            Err(e) => {
                hard_failures += 1;
                eprintln!("{} {}: {}", red("✘"), bold(input), e);
                reports.push(serde_json::json!({
                    "input": input,
                    "error": e.to_string(),
                }));
            }
        }
    }

    let json = serde_json::to_string_pretty(&reports)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("writing {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{} wrote {}", green("✔"), path.display());
            }
        }
        None => {
            let mut stdout = io::stdout();
            writeln!(stdout, "{json}")?;
        }
    }

    if hard_failures == cli.inputs.len() {
        anyhow::bail!("all {} document(s) failed", hard_failures);
    }
    Ok(())
}

/// One-line human summary per document, on stderr.
fn print_summary(input: &str, output: &ExtractionOutput) {
    let record = &output.record;
    let stats = &output.stats;

    let status = match record.status {
        DocumentStatus::Complete => green("complete"),
        DocumentStatus::Partial => cyan("partial"),
        DocumentStatus::Failed => red("failed"),
    };

    let total = record
        .resolved
        .get("grand_total")
        .map(|t| format!("total {t}"))
        .unwrap_or_else(|| {
            if record.is_conflicting("grand_total") {
                "total CONFLICT".to_string()
            } else {
                "total —".to_string()
            }
        });

    eprintln!(
        "{} {}  {}  {} fields, {} items, {} conflicts  {}  {}",
        bold(input),
        status,
        dim(&total),
        record.resolved.len(),
        record.line_items.len(),
        record.conflicts.len(),
        dim(&format!(
            "{} local / {} ai / {} cached",
            stats.local_pages, stats.ai_pages, stats.cached_pages
        )),
        dim(&format!("{:.1}s", stats.total_duration_ms as f64 / 1000.0)),
    );
}
