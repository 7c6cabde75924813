//! Value types produced by the pipeline stages.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A file received from a client, before anything touched the disk.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Client-supplied name, unsanitised.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Declared MIME type, if the client sent one.
    pub content_type: Option<String>,
}

impl UploadedDocument {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            content_type: None,
        }
    }
}

/// An upload written to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Short BLAKE3 digest of the content. Namespaces every artifact derived
    /// from this document so concurrent requests never share an output path.
    pub content_hash: String,
}

impl StagedFile {
    /// Filename stem used to name derived images.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Sanitised company token, used as a directory name and routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyIdentity(String);

impl CompanyIdentity {
    pub(crate) fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CompanyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of keyword classification. Hard failures are `Err`, not a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Resolved(CompanyIdentity),
    Unresolved,
}

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index in the source document.
    pub page_index: usize,
    pub image: DynamicImage,
}

/// Axis-aligned box in image pixel coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A token recognised by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub bbox: BoundingBox,
    pub text: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl OcrToken {
    /// Build a token, stripping control characters and clamping confidence.
    pub fn new(bbox: BoundingBox, text: &str, confidence: f32) -> Self {
        let text: String = text.trim().chars().filter(|c| !c.is_control()).collect();
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            bbox,
            text,
            confidence,
        }
    }
}

/// The overlay written by the annotator, plus the texts it drew.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedArtifact {
    pub path: PathBuf,
    /// Token texts in the order the OCR engine returned them.
    pub texts: Vec<String>,
}

/// A document moved into its company store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedDocument {
    pub path: PathBuf,
    pub company: CompanyIdentity,
    /// 0 for the bare name, `n` for the `_vn` suffix.
    pub version: u32,
}

/// Structured fields extracted from a work order, plus derived URLs.
///
/// Serialises flat: the extracted fields with `file_path` (and
/// `annotated_image_url`, when present) appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image_url: Option<String>,
}

/// Per-stage timings for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeStats {
    pub page_count: usize,
    pub ocr_tokens: usize,
    pub classify_duration_ms: u64,
    pub render_duration_ms: u64,
    pub annotate_duration_ms: u64,
    pub archive_duration_ms: u64,
    pub dispatch_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a successful intake produced.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub company_name: CompanyIdentity,
    pub archived: ArchivedDocument,
    pub file_url: String,
    pub image_urls: Vec<String>,
    /// `None` when annotation was optional and failed.
    pub annotated_image_url: Option<String>,
    pub extracted_texts: Vec<String>,
    /// `None` when extraction was not requested or failed.
    pub record: Option<ExtractionRecord>,
    /// Human-readable dispatch failures (extraction, webhook). Logged, not fatal.
    pub dispatch_errors: Vec<String>,
    pub stats: IntakeStats,
}
