//! OCR engines.
//!
//! [`OcrEngine`] is the seam between the annotator and whatever model does
//! text detection. Two engines ship:
//!
//! - [`TesseractOcrEngine`] shells out to the `tesseract` CLI and parses its
//!   word-level TSV output.
//! - [`HttpOcrEngine`] posts the bitmap to an EasyOCR-style JSON service that
//!   answers with quadrilateral boxes.
//!
//! Engines return tokens in reading order as the model emits them. They do
//! not apply timeouts; the annotator bounds every call.

use crate::error::{IntakeError, Result};
use crate::output::{BoundingBox, OcrToken};
use crate::pipeline::encode::{encode_png, encode_png_base64};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Text detection over a single preprocessed bitmap.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise text regions, in model order.
    async fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrToken>>;
}

fn unavailable(detail: impl Into<String>) -> IntakeError {
    IntakeError::OcrUnavailable {
        detail: detail.into(),
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// [`OcrEngine`] wrapping the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcrEngine {
    binary: PathBuf,
    language: String,
}

impl Default for TesseractOcrEngine {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }
}

impl TesseractOcrEngine {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    async fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrToken>> {
        let png = encode_png(&DynamicImage::ImageLuma8(image.clone()))
            .map_err(|e| unavailable(format!("cannot encode bitmap: {}", e)))?;

        let tmpdir = tempfile::Builder::new()
            .prefix("tesseract")
            .tempdir()
            .map_err(|e| unavailable(format!("cannot create temp dir: {}", e)))?;
        let input_path = tmpdir.path().join("input.png");
        let output_base = tmpdir.path().join("output");
        tokio::fs::write(&input_path, &png)
            .await
            .map_err(|e| unavailable(format!("cannot write tesseract input: {}", e)))?;

        let output = Command::new(&self.binary)
            .arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| unavailable(format!("cannot run {}: {}", self.binary.display(), e)))?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .map_err(|e| unavailable(format!("cannot read tesseract output: {}", e)))?;
        let tokens = parse_tesseract_tsv(&tsv);
        debug!("tesseract: {} tokens", tokens.len());
        Ok(tokens)
    }
}

/// Parse `tesseract ... tsv` output into word tokens.
///
/// Only level-5 (word) rows with a non-negative confidence and non-blank
/// text are kept. Confidence is rescaled from 0–100 to 0–1.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<OcrToken> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.splitn(12, '\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<i64>().ok();
            let conf: f32 = cols[10].trim().parse().ok()?;
            if conf < 0.0 || cols[11].trim().is_empty() {
                return None;
            }
            let bbox = BoundingBox {
                x: num(6)?.max(0) as u32,
                y: num(7)?.max(0) as u32,
                width: num(8)?.max(0) as u32,
                height: num(9)?.max(0) as u32,
            };
            let token = OcrToken::new(bbox, cols[11], conf / 100.0);
            (!token.text.is_empty()).then_some(token)
        })
        .collect()
}

// ── HTTP (EasyOCR-style) ─────────────────────────────────────────────────

/// [`OcrEngine`] backed by a JSON OCR service.
///
/// Request: `POST {url}` with `{"image": "<base64 png>"}`. Response: a list
/// of `{"bbox": [[x,y] ×4], "text": "...", "confidence": 0.93}` in
/// top-left, top-right, bottom-right, bottom-left order, either bare or
/// wrapped as `{"results": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpOcrEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpOcrEngine {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectedRegion {
    bbox: Vec<[f64; 2]>,
    text: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectionResponse {
    Bare(Vec<DetectedRegion>),
    Wrapped { results: Vec<DetectedRegion> },
}

impl DetectedRegion {
    /// Box from the top-left and bottom-right corners, clamped at zero.
    fn into_token(self) -> Option<OcrToken> {
        let top_left = self.bbox.first()?;
        let bottom_right = self.bbox.get(2).unwrap_or(top_left);
        let x = top_left[0].max(0.0);
        let y = top_left[1].max(0.0);
        let bbox = BoundingBox {
            x: x as u32,
            y: y as u32,
            width: (bottom_right[0] - x).max(0.0) as u32,
            height: (bottom_right[1] - y).max(0.0) as u32,
        };
        Some(OcrToken::new(bbox, &self.text, self.confidence))
    }
}

/// Parse an EasyOCR-style response body.
pub fn parse_detections(body: &str) -> Result<Vec<OcrToken>> {
    let response: DetectionResponse = serde_json::from_str(body)
        .map_err(|e| unavailable(format!("malformed OCR response: {}", e)))?;
    let regions = match response {
        DetectionResponse::Bare(r) | DetectionResponse::Wrapped { results: r } => r,
    };
    Ok(regions
        .into_iter()
        .filter_map(DetectedRegion::into_token)
        .collect())
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrToken>> {
        let b64 = encode_png_base64(&DynamicImage::ImageLuma8(image.clone()))
            .map_err(|e| unavailable(format!("cannot encode bitmap: {}", e)))?;

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "image": b64 }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(format!("OCR service request failed: {}", e)))?;
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(format!("OCR service body unreadable: {}", e)))?;

        let tokens = parse_detections(&body)?;
        debug!("OCR service {}: {} tokens", self.url, tokens.len());
        Ok(tokens)
    }
}
