//! # workorder-intake
//!
//! Classify, archive and OCR-annotate scanned work-order PDFs, then hand a
//! structured record to downstream systems.
//!
//! ## Why this crate?
//!
//! Property-management companies send repair instructions as scanned PDFs.
//! Each one has to end up in the right company's folder, under a name that
//! never clobbers an earlier order, with an OCR overlay a human can check and
//! a JSON record a job system can ingest. This crate does that as a library,
//! an axum service and a CLI.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Intake      validate name/extension/body, stage under incoming/
//!  ├─ 2. Classify    first-page text vs. ordered keyword table
//!  ├─ 3. Render      rasterise pages via pdfium (spawn_blocking)
//!  ├─ 4. Preprocess  grayscale → adaptive threshold → NLM denoise
//!  ├─ 5. Annotate    OCR + boxes drawn on the original bitmap
//!  ├─ 6. Archive     {company}/{company}_{label}[_vN].pdf, exclusive create
//!  └─ 7. Dispatch    public URLs, routed extraction, webhook
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use workorder_intake::{
//!     IntakeConfig, IntakePipeline, PdfiumBackend, ProcessOptions, TesseractOcrEngine,
//!     UploadedDocument,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IntakeConfig::builder().store_root("static/temporary").build()?;
//!     let pipeline = IntakePipeline::new(
//!         config,
//!         Arc::new(PdfiumBackend::default()),
//!         Arc::new(TesseractOcrEngine::default()),
//!     );
//!     let bytes = std::fs::read("work_order.pdf")?;
//!     let outcome = pipeline
//!         .process(UploadedDocument::new("work_order.pdf", bytes), ProcessOptions::upload())
//!         .await?;
//!     println!("{} → {}", outcome.company_name, outcome.file_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum router and `serve` (upload, health, webhook, static files) |
//! | `cli`    | on      | the `wo-intake` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only users can opt out:
//! ```toml
//! workorder-intake = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod intake;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod webhook;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AnnotationPolicy, AnnotationStyle, IntakeConfig, IntakeConfigBuilder, KeywordTable, OcrScope,
    PageLayout, PreprocessOptions, RoutingTable,
};
pub use error::{DispatchStage, IntakeError, PdfFault, Result};
pub use extract::{FieldExtractor, HttpFieldExtractor, LlmFieldExtractor};
pub use intake::{IntakePipeline, ProcessOptions};
pub use ocr::{HttpOcrEngine, OcrEngine, TesseractOcrEngine};
pub use output::{
    AnnotatedArtifact, ArchivedDocument, BoundingBox, Classification, CompanyIdentity,
    ExtractionRecord, IntakeOutcome, IntakeStats, OcrToken, PageImage, StagedFile,
    UploadedDocument,
};
pub use pipeline::render::{PdfBackend, PdfiumBackend};
pub use progress::{IntakeProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use webhook::{HttpWebhook, WebhookSink};
