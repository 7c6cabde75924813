//! Intake orchestration: one uploaded PDF through every stage.
//!
//! [`IntakePipeline::process`] is the entry point for the HTTP handlers and
//! the CLI. Stages run strictly in sequence for a given document:
//!
//! ```text
//! stage ─▶ classify ─▶ render ─▶ annotate ─▶ archive ─▶ dispatch
//! ```
//!
//! The staged file is only ever removed by a successful archival. Any error
//! before that point leaves it in `{store_root}/incoming/` for inspection.
//! Dispatch happens after archival and its failures never fail the request.

use crate::config::{AnnotationPolicy, IntakeConfig};
use crate::error::{IntakeError, Result};
use crate::extract::FieldExtractor;
use crate::ocr::OcrEngine;
use crate::output::{
    AnnotatedArtifact, Classification, CompanyIdentity, IntakeOutcome, IntakeStats,
    UploadedDocument,
};
use crate::pipeline::annotate::annotate_document;
use crate::pipeline::archive::archive;
use crate::pipeline::classify::classify_pdf;
use crate::pipeline::dispatch::{dispatch, public_url, DispatchReport, DispatchRequest};
use crate::pipeline::intake::{secure_filename, stage_upload};
use crate::pipeline::render::{render_document, PdfBackend};
use crate::progress::Stage;
use crate::webhook::WebhookSink;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a single request should be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub annotation: AnnotationPolicy,
    /// Run field extraction and webhook delivery after archival.
    pub extract: bool,
}

impl ProcessOptions {
    /// Plain upload: annotation is best-effort, no extraction.
    pub fn upload() -> Self {
        Self {
            annotation: AnnotationPolicy::Optional,
            extract: false,
        }
    }

    /// Upload with extraction: annotation must succeed, then extract and
    /// deliver.
    pub fn extract() -> Self {
        Self {
            annotation: AnnotationPolicy::Required,
            extract: true,
        }
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::upload()
    }
}

/// The configured pipeline plus its collaborators. Cheap to share behind an
/// `Arc`; every request is independent.
pub struct IntakePipeline {
    config: IntakeConfig,
    pdf: Arc<dyn PdfBackend>,
    ocr: Arc<dyn OcrEngine>,
    extractor: Option<Arc<dyn FieldExtractor>>,
    webhook: Option<Arc<dyn WebhookSink>>,
}

impl std::fmt::Debug for IntakePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakePipeline")
            .field("config", &self.config)
            .field("extractor", &self.extractor.is_some())
            .field("webhook", &self.webhook.is_some())
            .finish_non_exhaustive()
    }
}

impl IntakePipeline {
    pub fn new(config: IntakeConfig, pdf: Arc<dyn PdfBackend>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            config,
            pdf,
            ocr,
            extractor: None,
            webhook: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookSink>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn webhook(&self) -> Option<&Arc<dyn WebhookSink>> {
        self.webhook.as_ref()
    }

    /// Run `upload` through every stage.
    ///
    /// # Errors
    /// Anything before archival is fatal. With
    /// [`AnnotationPolicy::Optional`] an OCR failure only drops the
    /// annotated artifact. Dispatch failures are returned in
    /// [`IntakeOutcome::dispatch_errors`].
    pub async fn process(
        &self,
        upload: UploadedDocument,
        options: ProcessOptions,
    ) -> Result<IntakeOutcome> {
        let total_start = Instant::now();
        let config = &self.config;
        let mut stats = IntakeStats::default();
        info!(
            "Intake '{}' ({} bytes, annotation {:?}, extract {})",
            upload.filename,
            upload.bytes.len(),
            options.annotation,
            options.extract
        );

        // ── 1. Stage ──────────────────────────────────────────────────────
        let (staged, _) = self
            .stage(Stage::Intake, stage_upload(&config.staging_dir(), &upload))
            .await?;
        drop(upload);

        // ── 2. Classify ───────────────────────────────────────────────────
        let (classification, ms) = self
            .stage(
                Stage::Classify,
                classify_pdf(
                    self.pdf.as_ref(),
                    &staged.path,
                    &config.keywords,
                    config.render_timeout_secs,
                ),
            )
            .await?;
        stats.classify_duration_ms = ms;
        let company = match classification {
            Classification::Resolved(company) => company,
            Classification::Unresolved => {
                let err = IntakeError::ClassificationUnresolved {
                    path: staged.path.clone(),
                };
                self.report_error(Stage::Classify, &err);
                return Err(err);
            }
        };

        // ── 3. Render ─────────────────────────────────────────────────────
        let (rendered, ms) = self
            .stage(
                Stage::Render,
                render_document(self.pdf.as_ref(), &staged, config),
            )
            .await?;
        stats.render_duration_ms = ms;
        stats.page_count = rendered.pages.len();

        // ── 4. Preprocess + annotate ──────────────────────────────────────
        let annotated: Option<AnnotatedArtifact> = match self
            .stage(
                Stage::Annotate,
                annotate_document(self.ocr.as_ref(), &rendered, &staged, config),
            )
            .await
        {
            Ok((artifact, ms)) => {
                stats.annotate_duration_ms = ms;
                stats.ocr_tokens = artifact.texts.len();
                Some(artifact)
            }
            Err(e) if options.annotation == AnnotationPolicy::Optional => {
                warn!("Continuing without annotation: {}", e);
                None
            }
            Err(e) => return Err(e),
        };
        drop(rendered.pages);

        // ── 5. Archive ────────────────────────────────────────────────────
        let label = secure_filename(&config.label);
        let (archived, ms) = self
            .stage(
                Stage::Archive,
                archive(&staged, &config.store_root, &company, &label),
            )
            .await?;
        stats.archive_duration_ms = ms;

        let file_url = self.url_for(&archived.path)?;
        let image_urls = rendered
            .image_paths
            .iter()
            .map(|p| self.url_for(p))
            .collect::<Result<Vec<_>>>()?;
        let annotated_image_url = annotated
            .as_ref()
            .map(|a| self.url_for(&a.path))
            .transpose()?;
        let extracted_texts = annotated.map(|a| a.texts).unwrap_or_default();

        // ── 6. Dispatch ───────────────────────────────────────────────────
        let report = if options.extract {
            self.dispatch_stage(
                &company,
                &extracted_texts,
                &file_url,
                annotated_image_url.as_deref(),
                &mut stats,
            )
            .await
        } else {
            DispatchReport::default()
        };

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Intake complete: {} → {} in {}ms",
            company,
            archived.path.display(),
            stats.total_duration_ms
        );

        Ok(IntakeOutcome {
            company_name: company,
            archived,
            file_url,
            image_urls,
            annotated_image_url,
            extracted_texts,
            record: report.record,
            dispatch_errors: report.errors,
            stats,
        })
    }

    async fn dispatch_stage(
        &self,
        company: &CompanyIdentity,
        texts: &[String],
        file_url: &str,
        annotated_image_url: Option<&str>,
        stats: &mut IntakeStats,
    ) -> DispatchReport {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(Stage::Dispatch);
        }
        let start = Instant::now();
        let report = dispatch(
            self.extractor.as_deref(),
            self.webhook.as_deref(),
            &self.config.routing,
            DispatchRequest {
                company,
                texts,
                file_url,
                annotated_image_url,
            },
            self.config.dispatch_timeout_secs,
        )
        .await;
        stats.dispatch_duration_ms = start.elapsed().as_millis() as u64;

        if let Some(ref cb) = self.config.progress_callback {
            if report.errors.is_empty() {
                cb.on_stage_complete(Stage::Dispatch, stats.dispatch_duration_ms);
            } else {
                cb.on_stage_error(Stage::Dispatch, &report.errors.join("; "));
            }
        }
        report
    }

    /// Run one stage, timing it and reporting to the progress callback.
    async fn stage<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<(T, u64)> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
        let start = Instant::now();
        let result = fut.await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                debug!("Stage {} done in {}ms", stage, elapsed_ms);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_stage_complete(stage, elapsed_ms);
                }
                Ok((value, elapsed_ms))
            }
            Err(e) => {
                self.report_error(stage, &e);
                Err(e)
            }
        }
    }

    fn report_error(&self, stage: Stage, err: &IntakeError) {
        warn!("Stage {} failed: {}", stage, err);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_error(stage, &err.to_string());
        }
    }

    fn url_for(&self, path: &Path) -> Result<String> {
        public_url(&self.config.public_base_url, &self.config.store_root, path)
    }
}
