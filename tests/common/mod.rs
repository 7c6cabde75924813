//! In-process stand-ins for pdfium, OCR, extraction and the webhook.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workorder_intake::{
    BoundingBox, DispatchStage, FieldExtractor, IntakeConfig, IntakeError, IntakePipeline,
    OcrEngine, OcrToken, PageImage, PdfBackend, Result, WebhookSink,
};

pub const PAGE_W: u32 = 64;
pub const PAGE_H: u32 = 48;

/// Returns canned first-page text and `pages` white pages with a dark bar.
pub struct FakePdf {
    pub text: String,
    pub pages: usize,
}

impl FakePdf {
    pub fn new(text: &str, pages: usize) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            pages,
        })
    }
}

#[async_trait]
impl PdfBackend for FakePdf {
    async fn first_page_text(&self, _path: &Path) -> Result<String> {
        Ok(self.text.clone())
    }

    async fn render_pages(
        &self,
        _path: &Path,
        _dpi: u32,
        _max_pixels: u32,
    ) -> Result<Vec<PageImage>> {
        Ok((0..self.pages)
            .map(|page_index| {
                let mut img = RgbaImage::from_pixel(PAGE_W, PAGE_H, Rgba([255, 255, 255, 255]));
                for x in 8..40 {
                    for y in 10..16 {
                        img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                    }
                }
                PageImage {
                    page_index,
                    image: DynamicImage::ImageRgba8(img),
                }
            })
            .collect())
    }
}

/// A [`FakePdf`] whose text extraction and rasterisation stall first.
pub struct SlowPdf {
    pub inner: FakePdf,
    pub text_delay: Duration,
    pub render_delay: Duration,
}

impl SlowPdf {
    pub fn new(text: &str, text_delay: Duration, render_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: FakePdf {
                text: text.to_string(),
                pages: 1,
            },
            text_delay,
            render_delay,
        })
    }
}

#[async_trait]
impl PdfBackend for SlowPdf {
    async fn first_page_text(&self, path: &Path) -> Result<String> {
        tokio::time::sleep(self.text_delay).await;
        self.inner.first_page_text(path).await
    }

    async fn render_pages(&self, path: &Path, dpi: u32, max_pixels: u32) -> Result<Vec<PageImage>> {
        tokio::time::sleep(self.render_delay).await;
        self.inner.render_pages(path, dpi, max_pixels).await
    }
}

/// Returns the same tokens for every bitmap and counts calls.
pub struct FixedOcr {
    pub texts: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl FixedOcr {
    pub fn new(texts: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            texts: texts.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FixedOcr {
    async fn recognize(&self, _image: &GrayImage) -> Result<Vec<OcrToken>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let bbox = BoundingBox {
                    x: 4,
                    y: 4 + 12 * i as u32,
                    width: 30,
                    height: 10,
                };
                OcrToken::new(bbox, text, 0.9)
            })
            .collect())
    }
}

pub struct FailingOcr;

#[async_trait]
impl OcrEngine for FailingOcr {
    async fn recognize(&self, _image: &GrayImage) -> Result<Vec<OcrToken>> {
        Err(IntakeError::OcrUnavailable {
            detail: "engine offline".into(),
        })
    }
}

/// Returns `fields` and records every `(endpoint, text)` it was called with.
#[derive(Default)]
pub struct FakeExtractor {
    pub fields: Map<String, Value>,
    pub fail: bool,
    pub seen: Mutex<Vec<(String, String)>>,
}

impl FakeExtractor {
    pub fn returning(fields: Value) -> Arc<Self> {
        Arc::new(Self {
            fields: fields.as_object().cloned().unwrap_or_default(),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl FieldExtractor for FakeExtractor {
    async fn extract(&self, endpoint: &str, text: &str) -> Result<Map<String, Value>> {
        self.seen
            .lock()
            .unwrap()
            .push((endpoint.to_string(), text.to_string()));
        if self.fail {
            return Err(IntakeError::DispatchFailed {
                stage: DispatchStage::Extraction,
                detail: "model returned prose".into(),
            });
        }
        Ok(self.fields.clone())
    }
}

#[derive(Default)]
pub struct CapturingWebhook {
    pub payloads: Mutex<Vec<Value>>,
}

#[async_trait]
impl WebhookSink for CapturingWebhook {
    async fn post(&self, payload: &Value) -> Result<Value> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(json!({ "accepted": true }))
    }
}

/// A config rooted at `root/store` with the default keyword and routing
/// tables.
pub fn test_config(root: &Path) -> IntakeConfig {
    IntakeConfig::builder()
        .store_root(root.join("store"))
        .public_base_url("http://localhost:8000/temporary/")
        .build()
        .unwrap()
}

pub fn pipeline(
    config: IntakeConfig,
    pdf: Arc<dyn PdfBackend>,
    ocr: Arc<dyn OcrEngine>,
) -> IntakePipeline {
    IntakePipeline::new(config, pdf, ocr)
}

pub fn pdf_bytes(tag: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {tag}\n%%EOF\n").into_bytes()
}
