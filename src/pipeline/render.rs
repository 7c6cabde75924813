//! PDF access: first-page text, page rasterisation and page composition.
//!
//! ## Why a trait?
//!
//! pdfium is a native library that may not be present where the pipeline is
//! tested. [`PdfBackend`] is the seam: [`PdfiumBackend`] is the production
//! implementation and tests inject a backend that returns canned text and
//! synthetic bitmaps.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state and is CPU-bound. Every call runs on the
//! blocking pool so the Tokio workers serving other uploads never stall.

use crate::config::{IntakeConfig, PageLayout};
use crate::error::{IntakeError, PdfFault, Result};
use crate::output::{PageImage, StagedFile};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Black-box access to a PDF document.
#[async_trait]
pub trait PdfBackend: Send + Sync {
    /// Plain text of the first page. Empty if the page has no text layer.
    async fn first_page_text(&self, path: &Path) -> Result<String>;

    /// Rasterise every page, in order, at `dpi`, with neither edge exceeding
    /// `max_pixels`.
    async fn render_pages(&self, path: &Path, dpi: u32, max_pixels: u32)
        -> Result<Vec<PageImage>>;
}

/// [`PdfBackend`] over pdfium-render.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    lib_path: Option<PathBuf>,
}

impl PdfiumBackend {
    /// `lib_path` may name the library file or the directory holding it.
    /// `None` binds to the system library.
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium> {
        let bindings = match &self.lib_path {
            Some(p) if p.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            }
            Some(p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_system_library(),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| IntakeError::PdfiumBindingFailed(format!("{:?}", e)))
    }
}

#[async_trait]
impl PdfBackend for PdfiumBackend {
    async fn first_page_text(&self, path: &Path) -> Result<String> {
        let backend = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || backend.first_page_text_blocking(&path))
            .await
            .map_err(|e| IntakeError::Internal(format!("Text task panicked: {}", e)))?
    }

    async fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<PageImage>> {
        let backend = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || backend.render_pages_blocking(&path, dpi, max_pixels))
            .await
            .map_err(|e| IntakeError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumBackend {
    fn first_page_text_blocking(&self, path: &Path) -> Result<String> {
        let pdfium = self.bind()?;
        let document = load(&pdfium, path)?;
        let page = document.pages().first().map_err(|e| IntakeError::UnreadablePdf {
            path: path.to_path_buf(),
            fault: PdfFault::NoPages,
            detail: format!("{:?}", e),
        })?;
        let text = page.text().map_err(|e| IntakeError::UnreadablePdf {
            path: path.to_path_buf(),
            fault: PdfFault::RenderFailed,
            detail: format!("text layer: {:?}", e),
        })?;
        Ok(text.all())
    }

    fn render_pages_blocking(
        &self,
        path: &Path,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<PageImage>> {
        let pdfium = self.bind()?;
        let document = load(&pdfium, path)?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let mut results = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                IntakeError::UnreadablePdf {
                    path: path.to_path_buf(),
                    fault: PdfFault::RenderFailed,
                    detail: format!("page {}: {:?}", idx + 1, e),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            results.push(PageImage {
                page_index: idx,
                image,
            });
        }
        Ok(results)
    }
}

fn load<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| IntakeError::UnreadablePdf {
            path: path.to_path_buf(),
            fault: PdfFault::Corrupt,
            detail: format!("{:?}", e),
        })
}

/// Rasterised pages of one document plus the images written to disk.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub pages: Vec<PageImage>,
    /// All pages stacked, present when the layout is [`PageLayout::Merged`].
    pub merged: Option<DynamicImage>,
    /// Files written to the images directory, in page order.
    pub image_paths: Vec<PathBuf>,
}

/// Rasterise the staged PDF under the render timeout and save its images.
///
/// Zero pages is an error, never an empty success.
pub async fn render_document(
    backend: &dyn PdfBackend,
    staged: &StagedFile,
    config: &IntakeConfig,
) -> Result<RenderedDocument> {
    let limit = Duration::from_secs(config.render_timeout_secs);
    let pages = tokio::time::timeout(
        limit,
        backend.render_pages(&staged.path, config.dpi, config.max_rendered_pixels),
    )
    .await
    .map_err(|_| IntakeError::UnreadablePdf {
        path: staged.path.clone(),
        fault: PdfFault::TimedOut,
        detail: format!("rasterisation exceeded {}s", config.render_timeout_secs),
    })??;

    if pages.is_empty() {
        return Err(IntakeError::UnreadablePdf {
            path: staged.path.clone(),
            fault: PdfFault::NoPages,
            detail: "document has no pages".into(),
        });
    }

    let images_dir = config.images_dir();
    let prefix = format!("{}_{}", staged.stem(), staged.content_hash);
    let layout = config.image_layout;

    tokio::task::spawn_blocking(move || save_images(&images_dir, &prefix, layout, pages))
        .await
        .map_err(|e| IntakeError::Internal(format!("Image write task panicked: {}", e)))?
}

fn save_images(
    dir: &Path,
    prefix: &str,
    layout: PageLayout,
    pages: Vec<PageImage>,
) -> Result<RenderedDocument> {
    std::fs::create_dir_all(dir).map_err(|e| IntakeError::io(dir, e))?;

    let mut image_paths = Vec::new();
    let merged = match layout {
        PageLayout::PerPage => {
            for page in &pages {
                let path = dir.join(format!("{}_page_{}.png", prefix, page.page_index + 1));
                write_png(&page.image, &path)?;
                image_paths.push(path);
            }
            None
        }
        PageLayout::Merged => {
            let images: Vec<DynamicImage> = pages.iter().map(|p| p.image.clone()).collect();
            let merged = compose_vertical(&images)?;
            let path = dir.join(format!("{}_merged.png", prefix));
            write_png(&merged, &path)?;
            image_paths.push(path);
            Some(merged)
        }
    };

    info!("Saved {} image(s) to {}", image_paths.len(), dir.display());
    Ok(RenderedDocument {
        pages,
        merged,
        image_paths,
    })
}

pub(crate) fn write_png(image: &DynamicImage, path: &Path) -> Result<()> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| IntakeError::Internal(format!("Failed to write '{}': {}", path.display(), e)))
}

/// Stack images top-to-bottom, left-aligned, on a white background.
///
/// Width is the widest input; height is the sum of all heights. Image `i`
/// starts at the sum of the heights before it.
pub fn compose_vertical(images: &[DynamicImage]) -> Result<DynamicImage> {
    if images.is_empty() {
        return Err(IntakeError::Internal("no images to compose".into()));
    }

    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height: u64 = images.iter().map(|i| u64::from(i.height())).sum();
    let height = u32::try_from(height).map_err(|_| {
        IntakeError::Internal(format!("merged image too tall: {} px", height))
    })?;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut offset: i64 = 0;
    for image in images {
        image::imageops::overlay(&mut canvas, &image.to_rgba8(), 0, offset);
        offset += i64::from(image.height());
    }
    debug!("Composed {} images → {}x{} px", images.len(), width, height);
    Ok(DynamicImage::ImageRgba8(canvas))
}
