//! CLI binary for docrip.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, resolves a vision provider from the environment and
//! prints one verdict line per document.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docrip::{
    Classification, CollisionPolicy, ConversionConfig, ConversionRequest, Converter,
    DocumentHints, DocumentSource, FolderProcessor, PipelineObserver, RunMode, RunState,
    Severity,
};
use edgequake_llm::{LLMProvider, ProviderFactory};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// One spinner per run, relabelled on every state change. Extractor results
/// are printed above it as they finish.
struct CliObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_start(&self, _run_id: &str, document_name: &str) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix(document_name.to_string());
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn on_state_change(&self, _run_id: &str, state: RunState) {
        if state.is_terminal() {
            return;
        }
        self.with_bar(|bar| bar.set_message(state.to_string().to_lowercase()));
    }

    fn on_extractor_complete(&self, _run_id: &str, extractor: &str, recovered: usize, failed: usize) {
        self.with_bar(|bar| {
            let line = if failed == 0 {
                format!("  {} {extractor}  {recovered} element(s)", green("·"))
            } else {
                format!(
                    "  {} {extractor}  {recovered} element(s), {} failed",
                    cyan("·"),
                    red(&failed.to_string())
                )
            };
            bar.println(line);
        });
    }

    fn on_run_complete(&self, _run_id: &str, _success: bool) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one document; artifacts land in out/report/
  docrip convert report.pdf -o out

  # Several documents, evaluation thresholds on
  docrip convert a.pdf b.docx -o out --mode evaluation

  # Scanned input with a known layout, skip detection sampling
  docrip convert scan.pdf -o out --scanned --tables

  # Redact PII and stamp a classification banner
  docrip convert memo.docx -o out --redact-pii --classification confidential

  # Drain a drop folder
  docrip batch --input inbox --processed done --output out

OUTPUT LAYOUT:
  <output>/<name>/<name>.md         Markdown (omitted when nothing was recovered)
  <output>/<name>/provenance.jsonl  one provenance record per content block
  <output>/<name>/run_report.json   metrics, defects and the accept/reject verdict

  An existing <name>/ directory is left alone; the run writes to
  <name>_<YYYYMMDD_HHMMSS>/ instead unless --overwrite is given.

EXIT STATUS:
  0  every document was accepted
  1  at least one document was rejected, or a write failed

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (vision OCR for scanned pages)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_DIR          Directory holding libpdfium
  RUST_LOG                Log filter, e.g. docrip=debug
"#;

/// Convert PDF and Word documents to Markdown with provenance and a run report.
#[derive(Parser, Debug)]
#[command(
    name = "docrip",
    version,
    about = "Convert PDF and Word documents to Markdown with provenance and a run report",
    long_about = "Convert PDF and Word documents to Markdown. Each document is sampled, \
routed to the extractors that suit it, rendered with provenance, checked by a quality gate \
and written as Markdown plus a provenance log and a run report.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one or more documents.
    Convert {
        /// PDF or DOCX files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output root; one directory per document is created inside it.
        #[arg(short, long, env = "DOCRIP_OUTPUT", default_value = "output")]
        output: PathBuf,

        /// Ground-truth text for CER / WER (single input only).
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Print each run report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Convert every PDF / DOCX in a folder, then move the originals.
    Batch {
        /// Folder to drain.
        #[arg(long, env = "DOCRIP_INPUT_DIR")]
        input: PathBuf,

        /// Originals are moved to <processed>/success or <processed>/failed.
        #[arg(long, env = "DOCRIP_PROCESSED_DIR")]
        processed: PathBuf,

        /// Output root.
        #[arg(long, env = "DOCRIP_OUTPUT_DIR")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Production applies the success rule only; evaluation also checks
    /// metric thresholds.
    #[arg(long, global = true, env = "DOCRIP_MODE", value_enum, default_value = "production")]
    mode: ModeArg,

    /// Treat input as scanned (no text layer).
    #[arg(long, global = true)]
    scanned: bool,

    /// Input contains tables.
    #[arg(long, global = true)]
    tables: bool,

    /// Input contains mathematical notation.
    #[arg(long, global = true)]
    math: bool,

    /// Classification banner added to the Markdown.
    #[arg(long, global = true, env = "DOCRIP_CLASSIFICATION", value_enum,
          default_value = "unclassified")]
    classification: ClassificationArg,

    /// Replace emails, phone numbers, SSNs, card numbers, IPs and URLs.
    #[arg(long, global = true, env = "DOCRIP_REDACT_PII")]
    redact_pii: bool,

    /// Leave provenance markers out of the Markdown.
    #[arg(long, global = true)]
    no_inline_provenance: bool,

    /// Reuse an existing output directory instead of suffixing a new one.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Directory holding the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_DIR")]
    pdfium_lib_dir: Option<PathBuf>,

    /// Vision LLM provider for scanned pages: openai, anthropic, gemini, ollama.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Vision LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Show leading PDF pages and the Markdown to the vision model and record
    /// what it finds missing or wrong.
    #[arg(long, global = true, env = "DOCRIP_VISION_VALIDATE")]
    vision_validate: bool,

    /// Pages shown to the vision cross-check.
    #[arg(long, global = true, default_value_t = 1)]
    validation_pages: u32,

    /// OCR rasterisation DPI (72–400).
    #[arg(long, global = true, env = "DOCRIP_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Wall-clock budget per document, in seconds.
    #[arg(long, global = true, env = "DOCRIP_MAX_RUNTIME", default_value_t = 300)]
    max_runtime: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCRIP_VERBOSE")]
    verbose: bool,

    /// Suppress everything except warnings and errors.
    #[arg(short, long, global = true, env = "DOCRIP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Production,
    Evaluation,
}

impl From<ModeArg> for RunMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Production => RunMode::Production,
            ModeArg::Evaluation => RunMode::Evaluation,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ClassificationArg {
    Unclassified,
    Internal,
    Confidential,
    Restricted,
}

impl From<ClassificationArg> for Classification {
    fn from(v: ClassificationArg) -> Self {
        match v {
            ClassificationArg::Unclassified => Classification::Unclassified,
            ClassificationArg::Internal => Classification::Internal,
            ClassificationArg::Confidential => Classification::Confidential,
            ClassificationArg::Restricted => Classification::Restricted,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if common.verbose {
        "docrip=debug"
    } else if common.quiet {
        "docrip=warn"
    } else {
        "docrip=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(common)?;
    let converter = Converter::new(config);

    let all_accepted = match &cli.command {
        Command::Convert {
            inputs,
            output,
            reference,
            json,
        } => {
            let reference = match reference {
                Some(path) if inputs.len() > 1 => {
                    anyhow::bail!(
                        "--reference {} applies to a single input, got {}",
                        path.display(),
                        inputs.len()
                    );
                }
                Some(path) => Some(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read reference text from {:?}", path))?,
                ),
                None => None,
            };
            run_convert(&converter, inputs, output, reference, *json, common).await?
        }
        Command::Batch {
            input,
            processed,
            output,
        } => {
            let stats = FolderProcessor::new(converter, input, processed, output)
                .with_hints(hints(common))
                .process_all()
                .await
                .with_context(|| format!("Failed to read input folder {:?}", input))?;
            if !common.quiet {
                eprintln!(
                    "{}  {} processed  {} accepted  {} rejected",
                    if stats.failed == 0 { green("✔") } else { red("✘") },
                    bold(&stats.processed.to_string()),
                    stats.succeeded,
                    stats.failed,
                );
                for e in &stats.errors {
                    eprintln!("   {} {}: {}", red("!"), e.file.display(), e.error);
                }
            }
            stats.failed == 0
        }
    };

    Ok(if all_accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_convert(
    converter: &Converter,
    inputs: &[PathBuf],
    output: &Path,
    reference: Option<String>,
    json: bool,
    common: &CommonArgs,
) -> Result<bool> {
    let mut all_accepted = true;
    for input in inputs {
        let mut request = ConversionRequest::new(DocumentSource::path(input)).hints(hints(common));
        if let Some(text) = &reference {
            request = request.reference_text(text.clone());
        }

        let result = match converter.convert(&request, output).await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("{} {}: {}", red("✘"), input.display(), e);
                all_accepted = false;
                continue;
            }
        };
        let report = &result.run_report;
        all_accepted &= result.success();

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("Failed to serialise run report")?
            );
        }
        if common.quiet {
            continue;
        }

        let target = result
            .output_file_paths
            .as_ref()
            .map(|p| p.directory.display().to_string())
            .unwrap_or_default();
        eprintln!(
            "{}  {}  {:.2}s  {} defect(s)  →  {}",
            if result.success() { green("✔") } else { red("✘") },
            bold(&input.display().to_string()),
            report.processing_time_seconds,
            report.defects.len(),
            target,
        );
        if let Some(msg) = &report.error_message {
            eprintln!("   {}", red(msg));
        }
        for d in report
            .defects
            .iter()
            .filter(|d| d.severity >= Severity::High)
        {
            eprintln!("   {} {}", red(&format!("[{}]", d.severity)), d.description);
        }
        eprintln!("   {}", dim(&report.run_id));
    }
    Ok(all_accepted)
}

fn hints(common: &CommonArgs) -> DocumentHints {
    let mut hints = DocumentHints::default();
    if common.scanned {
        hints = hints.scanned(true);
    }
    if common.tables {
        hints = hints.contains_tables(true);
    }
    if common.math {
        hints = hints.contains_math(true);
    }
    hints
}

/// Map CLI args to `ConversionConfig`.
fn build_config(common: &CommonArgs) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .mode(common.mode.into())
        .classification(common.classification.into())
        .pii_redaction(common.redact_pii)
        .inline_provenance(!common.no_inline_provenance)
        .collision(if common.overwrite {
            CollisionPolicy::Overwrite
        } else {
            CollisionPolicy::Suffix
        })
        .ocr_dpi(common.dpi)
        .max_runtime(Duration::from_secs(common.max_runtime));

    if let Some(dir) = &common.pdfium_lib_dir {
        builder = builder.pdfium_library_dir(dir);
    }
    if let Some((provider, model)) = resolve_provider(common)? {
        builder = builder
            .vision_provider(provider)
            .vision_model(model)
            .vision_validation(common.vision_validate)
            .validation_pages(common.validation_pages);
    } else if common.vision_validate {
        tracing::warn!("--vision-validate ignored: no vision provider available");
    }
    if !common.quiet && !common.verbose {
        builder = builder.observer(CliObserver::new() as Arc<dyn PipelineObserver>);
    }

    builder.build().context("Invalid configuration")
}

/// Resolve the vision provider used for scanned pages.
///
/// An explicit `--provider` that cannot be built is an error. Otherwise the
/// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` pair, then `OPENAI_API_KEY`,
/// then full auto-detection are tried; when none is available the run goes
/// ahead without OCR and scanned documents are rejected with a defect.
fn resolve_provider(common: &CommonArgs) -> Result<Option<(Arc<dyn LLMProvider>, String)>> {
    let model = common.model.clone().unwrap_or_else(|| "gpt-4.1-nano".to_string());

    if let Some(name) = &common.provider {
        let provider = ProviderFactory::create_llm_provider(name, &model)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to configure vision provider '{name}'"))?;
        return Ok(Some((provider, model)));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            if let Ok(provider) = ProviderFactory::create_llm_provider(&prov, &env_model) {
                return Ok(Some((provider, env_model)));
            }
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        if let Ok(provider) = ProviderFactory::create_llm_provider("openai", &model) {
            return Ok(Some((provider, model)));
        }
    }

    match ProviderFactory::from_env() {
        Ok((provider, _embedding)) => Ok(Some((provider, "auto".to_string()))),
        Err(e) => {
            tracing::warn!("No vision provider available, scanned pages cannot be read: {e}");
            Ok(None)
        }
    }
}
