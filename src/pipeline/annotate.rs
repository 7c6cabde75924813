//! OCR annotation: recognise text on the preprocessed bitmap, draw it on the
//! original.
//!
//! The OCR engine only ever sees the binarised, denoised bitmap. Boxes and
//! labels are drawn on a copy of the colour original so the artifact stays
//! readable. Preprocessing and OCR of each bitmap run under the configured
//! OCR timeout. Engine errors, font load errors and timeouts all surface as
//! `OcrUnavailable`.

use crate::config::{AnnotationStyle, IntakeConfig, OcrScope, PageLayout, PreprocessOptions};
use crate::error::{IntakeError, Result};
use crate::ocr::OcrEngine;
use crate::output::{AnnotatedArtifact, OcrToken, StagedFile};
use crate::pipeline::preprocess::preprocess;
use crate::pipeline::render::{compose_vertical, write_png, RenderedDocument};
use ab_glyph::{FontVec, PxScale};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::{DynamicImage, GrayImage, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Annotate a single bitmap and write the overlay to `out_path`.
pub async fn annotate(
    engine: &dyn OcrEngine,
    original: &DynamicImage,
    preprocessed: &GrayImage,
    out_path: &Path,
    style: &AnnotationStyle,
    timeout_secs: u64,
) -> Result<AnnotatedArtifact> {
    let font = load_font(style).await?;
    let drawn = recognize_and_draw(engine, original, preprocessed, style, font);
    let (overlay, texts) = within(timeout_secs, "OCR", drawn).await?;
    save_overlay(DynamicImage::ImageRgba8(overlay), out_path.to_path_buf()).await?;
    info!("Annotated {} tokens → {}", texts.len(), out_path.display());
    Ok(AnnotatedArtifact {
        path: out_path.to_path_buf(),
        texts,
    })
}

/// Annotate a rendered document according to the configured OCR scope and
/// image layout, producing exactly one artifact.
///
/// - first page only, any layout: page 1 is OCR'd
/// - all pages, merged layout: the merged image is preprocessed and OCR'd once
/// - all pages, per-page layout: pages are OCR'd with bounded concurrency and
///   the annotated pages are stacked in page order
///
/// Preprocessing and OCR of one bitmap share a single `ocr_timeout_secs`
/// budget.
pub async fn annotate_document(
    engine: &dyn OcrEngine,
    rendered: &RenderedDocument,
    staged: &StagedFile,
    config: &IntakeConfig,
) -> Result<AnnotatedArtifact> {
    let bitmaps: Vec<DynamicImage> = match (config.ocr_scope, config.image_layout, &rendered.merged)
    {
        (OcrScope::FirstPage, ..) => rendered.pages.iter().take(1).map(|p| p.image.clone()).collect(),
        (OcrScope::AllPages, PageLayout::Merged, Some(merged)) => vec![merged.clone()],
        (OcrScope::AllPages, ..) => rendered.pages.iter().map(|p| p.image.clone()).collect(),
    };
    if bitmaps.is_empty() {
        return Err(IntakeError::OcrUnavailable {
            detail: "no page bitmap to annotate".into(),
        });
    }

    let font = load_font(&config.annotation).await?;
    let out_path = config
        .annotated_dir()
        .join(format!("{}_{}_annotated.png", staged.stem(), staged.content_hash));
    let timeout_secs = config.ocr_timeout_secs;
    let style = &config.annotation;
    let opts = &config.preprocess;

    // buffered() keeps page order while bounding in-flight OCR calls.
    let results: Vec<(RgbaImage, Vec<String>)> = stream::iter(bitmaps)
        .map(|bitmap| {
            let font = font.clone();
            within(timeout_secs, "preprocessing and OCR", async move {
                let preprocessed = preprocess_blocking(bitmap.clone(), *opts).await?;
                recognize_and_draw(engine, &bitmap, &preprocessed, style, font).await
            })
        })
        .buffered(config.ocr_concurrency.max(1))
        .try_collect()
        .await?;

    let bitmap_count = results.len();
    let mut texts = Vec::new();
    let mut overlays = Vec::with_capacity(results.len());
    for (overlay, page_texts) in results {
        texts.extend(page_texts);
        overlays.push(DynamicImage::ImageRgba8(overlay));
    }
    let artifact_image = if overlays.len() == 1 {
        overlays.remove(0)
    } else {
        compose_vertical(&overlays)?
    };

    save_overlay(artifact_image, out_path.clone()).await?;
    info!(
        "Annotated {} bitmap(s), {} tokens → {}",
        bitmap_count,
        texts.len(),
        out_path.display()
    );
    Ok(AnnotatedArtifact {
        path: out_path,
        texts,
    })
}

async fn preprocess_blocking(bitmap: DynamicImage, opts: PreprocessOptions) -> Result<GrayImage> {
    tokio::task::spawn_blocking(move || preprocess(&bitmap, &opts))
        .await
        .map_err(|e| IntakeError::Internal(format!("Preprocess task panicked: {}", e)))
}

/// Run `work` under the OCR time budget; expiry is `OcrUnavailable`.
async fn within<T>(
    timeout_secs: u64,
    what: &str,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), work)
        .await
        .map_err(|_| IntakeError::OcrUnavailable {
            detail: format!("{} exceeded {}s", what, timeout_secs),
        })?
}

async fn recognize_and_draw(
    engine: &dyn OcrEngine,
    original: &DynamicImage,
    preprocessed: &GrayImage,
    style: &AnnotationStyle,
    font: Option<Arc<FontVec>>,
) -> Result<(RgbaImage, Vec<String>)> {
    let tokens = engine.recognize(preprocessed).await?;
    debug!("OCR returned {} tokens", tokens.len());

    let original = original.clone();
    let style = style.clone();
    tokio::task::spawn_blocking(move || {
        let overlay = draw_tokens(&original, &tokens, &style, font.as_deref());
        let texts = tokens.into_iter().map(|t| t.text).collect();
        (overlay, texts)
    })
    .await
    .map_err(|e| IntakeError::Internal(format!("Draw task panicked: {}", e)))
}

async fn save_overlay(image: DynamicImage, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| IntakeError::io(dir, e))?;
        }
        write_png(&image, &path)
    })
    .await
    .map_err(|e| IntakeError::Internal(format!("Overlay write task panicked: {}", e)))?
}

/// Load the label font, if one is configured.
async fn load_font(style: &AnnotationStyle) -> Result<Option<Arc<FontVec>>> {
    let Some(path) = &style.font_path else {
        return Ok(None);
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IntakeError::OcrUnavailable {
            detail: format!("cannot read label font '{}': {}", path.display(), e),
        })?;
    let font = FontVec::try_from_vec(bytes).map_err(|e| IntakeError::OcrUnavailable {
        detail: format!("invalid label font '{}': {}", path.display(), e),
    })?;
    Ok(Some(Arc::new(font)))
}

/// Draw one box per token, plus its text when a font is available.
///
/// Strokes grow inward from the token box; boxes are clipped to the image.
/// Label baselines sit 10 px above the box.
pub fn draw_tokens(
    original: &DynamicImage,
    tokens: &[OcrToken],
    style: &AnnotationStyle,
    font: Option<&FontVec>,
) -> RgbaImage {
    let mut canvas = original.to_rgba8();
    let (img_w, img_h) = canvas.dimensions();
    let box_color = style.box_rgba();
    let text_color = style.text_rgba();
    let scale = PxScale::from(style.font_scale);

    for token in tokens {
        let b = token.bbox;
        if b.x >= img_w || b.y >= img_h {
            continue;
        }
        let w = b.width.min(img_w - b.x);
        let h = b.height.min(img_h - b.y);

        for t in 0..style.thickness.max(1) {
            let inner_w = w.saturating_sub(2 * t);
            let inner_h = h.saturating_sub(2 * t);
            if inner_w == 0 || inner_h == 0 {
                break;
            }
            let rect = Rect::at((b.x + t) as i32, (b.y + t) as i32).of_size(inner_w, inner_h);
            draw_hollow_rect_mut(&mut canvas, rect, box_color);
        }

        if let Some(font) = font {
            if !token.text.is_empty() {
                let top = b.y as i32 - 10 - style.font_scale.round() as i32;
                draw_text_mut(
                    &mut canvas,
                    text_color,
                    b.x as i32,
                    top,
                    scale,
                    font,
                    &token.text,
                );
            }
        }
    }
    canvas
}
