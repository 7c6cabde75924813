//! CLI binary for workorder-intake.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `process` pushes one local PDF through the pipeline and prints the
//! outcome.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workorder_intake::{
    AnnotationStyle, FieldExtractor, HttpFieldExtractor, HttpOcrEngine, HttpWebhook,
    IntakeConfig, IntakePipeline, IntakeProgressCallback, KeywordTable, LlmFieldExtractor,
    OcrEngine, OcrScope, PageLayout, PdfiumBackend, ProcessOptions, Stage, TesseractOcrEngine,
    UploadedDocument,
};

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

/// Spinner that names the running stage and logs one line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Intake");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl IntakeProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!(
            "[{}/{}] {stage}…",
            stage.number(),
            Stage::ALL.len()
        ));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<9} {}",
            green("✓"),
            stage,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        let msg = match error.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} {:<9} {}", red("✗"), stage, red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 8000
  wo-intake serve --bind 0.0.0.0:8000

  # Classify, archive and annotate one PDF locally
  wo-intake process work_order.pdf

  # Same, with field extraction and webhook delivery, JSON output
  wo-intake process --extract --webhook-url https://hooks.example/intake --json work_order.pdf

  # Load settings from a JSON file, override the store
  wo-intake --config intake.json --store-root /srv/intake serve

ENVIRONMENT VARIABLES:
  INTAKE_CONFIG              JSON config file (same keys as IntakeConfig)
  INTAKE_STORE_ROOT          Store root (default static/temporary)
  INTAKE_PUBLIC_BASE_URL     URL the store is served under
  INTAKE_WEBHOOK_URL         Webhook receiving extraction records
  INTAKE_OCR_URL             EasyOCR-style service; tesseract CLI when unset
  INTAKE_EXTRACTION_URL      Routed extraction service; LLM when unset
  INTAKE_EXTRACTION_API_KEY  Bearer token for the extraction service
  OPENAI_API_KEY             OpenAI key for LLM extraction
  EDGEQUAKE_LLM_PROVIDER     Override LLM provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL            Override LLM model ID
  PDFIUM_LIB_PATH            Path to libpdfium (file or directory)
  RUST_LOG                   Log filter, overrides --verbose/--quiet

A .env file in the working directory is loaded first.
"#;

/// Classify, archive and OCR-annotate scanned work-order PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "wo-intake",
    version,
    about = "Classify, archive and OCR-annotate scanned work-order PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INTAKE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "INTAKE_BIND", default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Push one local PDF through the pipeline.
    Process {
        /// PDF file to ingest. It is copied to the staging area; the original
        /// is never moved.
        input: PathBuf,

        /// Require annotation, then run extraction and webhook delivery.
        #[arg(long)]
        extract: bool,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,

        /// Disable the progress spinner.
        #[arg(long, env = "INTAKE_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct Settings {
    /// JSON configuration file. Flags below override its values.
    #[arg(long, global = true, env = "INTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the document store.
    #[arg(long, global = true, env = "INTAKE_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Base URL the store root is served under.
    #[arg(long, global = true, env = "INTAKE_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Comma-separated company keywords, in priority order.
    #[arg(long, global = true, env = "INTAKE_KEYWORDS")]
    keywords: Option<String>,

    /// Archive label: `{company}_{label}.pdf`.
    #[arg(long, global = true, env = "INTAKE_LABEL")]
    label: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, global = true, env = "INTAKE_DPI",
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Page image layout.
    #[arg(long, global = true, env = "INTAKE_LAYOUT", value_enum)]
    layout: Option<LayoutArg>,

    /// Pages sent to OCR.
    #[arg(long, global = true, env = "INTAKE_OCR_SCOPE", value_enum)]
    ocr_scope: Option<ScopeArg>,

    /// TrueType font for annotation labels. Boxes only when unset.
    #[arg(long, global = true, env = "INTAKE_LABEL_FONT")]
    label_font: Option<PathBuf>,

    /// Webhook receiving extraction records.
    #[arg(long, global = true, env = "INTAKE_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// EasyOCR-style OCR service URL. The tesseract CLI is used when unset.
    #[arg(long, global = true, env = "INTAKE_OCR_URL")]
    ocr_url: Option<String>,

    /// tesseract binary.
    #[arg(long, global = true, env = "INTAKE_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Routed extraction service base URL. The LLM extractor is used when unset.
    #[arg(long, global = true, env = "INTAKE_EXTRACTION_URL")]
    extraction_url: Option<String>,

    /// Path to libpdfium, or the directory holding it.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    PerPage,
    Merged,
}

impl From<LayoutArg> for PageLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::PerPage => PageLayout::PerPage,
            LayoutArg::Merged => PageLayout::Merged,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    FirstPage,
    AllPages,
}

impl From<ScopeArg> for OcrScope {
    fn from(v: ScopeArg) -> Self {
        match v {
            ScopeArg::FirstPage => OcrScope::FirstPage,
            ScopeArg::AllPages => OcrScope::AllPages,
        }
    }
}

impl Settings {
    fn to_config(&self) -> Result<IntakeConfig> {
        let mut config = match &self.config {
            Some(path) => IntakeConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => IntakeConfig::default(),
        };

        if let Some(root) = &self.store_root {
            config.store_root = root.clone();
        }
        if let Some(url) = &self.public_base_url {
            config.public_base_url = url.clone();
        }
        if let Some(csv) = &self.keywords {
            config.keywords = KeywordTable::from_csv(csv);
        }
        if let Some(label) = &self.label {
            config.label = label.clone();
        }
        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if let Some(layout) = self.layout {
            config.image_layout = layout.into();
        }
        if let Some(scope) = self.ocr_scope {
            config.ocr_scope = scope.into();
        }
        if let Some(font) = &self.label_font {
            config.annotation = AnnotationStyle {
                font_path: Some(font.clone()),
                ..config.annotation
            };
        }
        if self.webhook_url.is_some() {
            config.webhook_url = self.webhook_url.clone();
        }
        if self.pdfium_lib.is_some() {
            config.pdfium_lib_path = self.pdfium_lib.clone();
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn build_pipeline(&self, config: IntakeConfig) -> IntakePipeline {
        let pdf = Arc::new(PdfiumBackend::new(config.pdfium_lib_path.clone()));
        let ocr: Arc<dyn OcrEngine> = match &self.ocr_url {
            Some(url) => Arc::new(HttpOcrEngine::new(url.clone())),
            None => Arc::new(TesseractOcrEngine::new(self.tesseract.clone(), "eng")),
        };
        let extractor: Option<Arc<dyn FieldExtractor>> = match &self.extraction_url {
            Some(url) => Some(Arc::new(HttpFieldExtractor::from_env(url.clone()))),
            None => match LlmFieldExtractor::from_env() {
                Ok(llm) => Some(Arc::new(llm)),
                Err(e) => {
                    warn!("Field extraction disabled: {}", e);
                    None
                }
            },
        };
        let webhook = config.webhook_url.clone().map(HttpWebhook::new);
        if let Some(webhook) = &webhook {
            info!("Extraction records go to {}", webhook.url());
        }

        let mut pipeline = IntakePipeline::new(config, pdf, ocr);
        if let Some(extractor) = extractor {
            pipeline = pipeline.with_extractor(extractor);
        }
        if let Some(webhook) = webhook {
            pipeline = pipeline.with_webhook(Arc::new(webhook));
        }
        pipeline
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback in `process` mode, so library INFO logs
    // are quieted there unless --verbose.
    let spinner = matches!(
        cli.command,
        Command::Process { json: false, no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
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

    let mut config = cli.settings.to_config()?;

    match cli.command {
        Command::Serve { bind } => {
            let pipeline = Arc::new(cli.settings.build_pipeline(config));
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("binding {}", bind))?;
            workorder_intake::server::serve(listener, pipeline, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("server error")?;
        }
        Command::Process {
            input,
            extract,
            json,
            ..
        } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let filename = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let progress = spinner.then(CliProgressCallback::new);
            if let Some(cb) = &progress {
                config.progress_callback = Some(cb.clone() as Arc<dyn IntakeProgressCallback>);
            }
            let pipeline = cli.settings.build_pipeline(config);
            let options = if extract {
                ProcessOptions::extract()
            } else {
                ProcessOptions::upload()
            };

            let result = pipeline
                .process(UploadedDocument::new(filename, bytes), options)
                .await;
            if let Some(cb) = &progress {
                cb.finish();
            }
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => bail!("{} ({})", e.public_message(), e),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if !cli.quiet {
                eprintln!(
                    "{} {} → {}",
                    green("✔"),
                    bold(outcome.company_name.as_str()),
                    outcome.file_url
                );
                for url in &outcome.image_urls {
                    eprintln!("  {} {}", dim("image"), url);
                }
                if let Some(url) = &outcome.annotated_image_url {
                    eprintln!("  {} {}", dim("annotated"), url);
                }
                for err in &outcome.dispatch_errors {
                    eprintln!("  {} {}", red("✗"), err);
                }
                if let Some(record) = &outcome.record {
                    println!("{}", serde_json::to_string_pretty(record)?);
                }
            }
        }
    }
    Ok(())
}
