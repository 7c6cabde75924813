//! Configuration types for work-order intake.
//!
//! All pipeline behaviour is controlled through [`IntakeConfig`], built via
//! its [`IntakeConfigBuilder`] or loaded from a JSON file. The keyword table
//! and routing table live here rather than in process-wide statics so that
//! two pipelines with different tables can run side by side.

use crate::error::{IntakeError, Result};
use crate::progress::ProgressCallback;
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Sub-directory of the store root where uploads wait for classification.
pub const STAGING_DIR: &str = "incoming";
/// Sub-directory for rasterised page (or merged) images.
pub const IMAGES_DIR: &str = "Images";
/// Sub-directory for OCR-annotated overlays.
pub const ANNOTATED_DIR: &str = "AnnotatedImages";

/// Configuration for the intake pipeline.
///
/// # Example
/// ```rust
/// use workorder_intake::{IntakeConfig, KeywordTable};
///
/// let config = IntakeConfig::builder()
///     .store_root("/srv/workorders")
///     .keywords(KeywordTable::new(["Benham", "CBRE"]))
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Root of the document store. Default: `./static/temporary`.
    pub store_root: PathBuf,

    /// Base URL under which `store_root` is served. Default:
    /// `http://localhost:8000/temporary/`.
    pub public_base_url: String,

    /// Ordered keyword table used for classification.
    pub keywords: KeywordTable,

    /// Company → extraction endpoint identifier.
    pub routing: RoutingTable,

    /// Label used in archived filenames (`{company}_{label}.pdf`). Default: `processed`.
    pub label: String,

    /// Rasterisation DPI. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 5000.
    ///
    /// Keeps a 300-DPI render of an oversized page from exhausting memory.
    pub max_rendered_pixels: u32,

    /// Whether page images are saved one per page or stacked into one.
    pub image_layout: PageLayout,

    /// Which pages are sent to OCR.
    pub ocr_scope: OcrScope,

    /// Concurrent OCR calls when OCR'ing pages independently. Default: 2.
    pub ocr_concurrency: usize,

    /// Parameters of the OCR preprocessing chain.
    pub preprocess: PreprocessOptions,

    /// Colours, stroke and font for the annotated overlay.
    pub annotation: AnnotationStyle,

    /// Timeout for opening, reading and rasterising the PDF. Default: 120.
    pub render_timeout_secs: u64,

    /// Time budget for preprocessing plus OCR of one bitmap. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Timeout for the extraction call and for the webhook POST. Default: 60.
    pub dispatch_timeout_secs: u64,

    /// Webhook receiving the extraction record. `None` disables delivery.
    pub webhook_url: Option<String>,

    /// Path to libpdfium, or a directory containing it. `None` uses the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Stage progress callback. Never serialised.
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("static/temporary"),
            public_base_url: "http://localhost:8000/temporary/".to_string(),
            keywords: KeywordTable::default(),
            routing: RoutingTable::default(),
            label: "processed".to_string(),
            dpi: 300,
            max_rendered_pixels: 5000,
            image_layout: PageLayout::default(),
            ocr_scope: OcrScope::default(),
            ocr_concurrency: 2,
            preprocess: PreprocessOptions::default(),
            annotation: AnnotationStyle::default(),
            render_timeout_secs: 120,
            ocr_timeout_secs: 120,
            dispatch_timeout_secs: 60,
            webhook_url: None,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeConfig")
            .field("store_root", &self.store_root)
            .field("public_base_url", &self.public_base_url)
            .field("keywords", &self.keywords.len())
            .field("routing", &self.routing.len())
            .field("label", &self.label)
            .field("dpi", &self.dpi)
            .field("image_layout", &self.image_layout)
            .field("ocr_scope", &self.ocr_scope)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<set>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IntakeProgressCallback>"),
            )
            .finish()
    }
}

impl IntakeConfig {
    /// Create a new builder for `IntakeConfig`.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| IntakeError::io(path, e))?;
        let config: IntakeConfig = serde_json::from_str(&raw).map_err(|e| {
            IntakeError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints the builder enforces.
    pub fn validate(&self) -> Result<()> {
        if !(72..=600).contains(&self.dpi) {
            return Err(IntakeError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                self.dpi
            )));
        }
        if self.keywords.is_empty() {
            return Err(IntakeError::InvalidConfig(
                "Keyword table must not be empty".into(),
            ));
        }
        if crate::pipeline::intake::secure_filename(&self.label).is_empty() {
            return Err(IntakeError::InvalidConfig(format!(
                "Archive label '{}' is empty after sanitising",
                self.label
            )));
        }
        if self.ocr_concurrency == 0 {
            return Err(IntakeError::InvalidConfig(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        if self.render_timeout_secs == 0
            || self.ocr_timeout_secs == 0
            || self.dispatch_timeout_secs == 0
        {
            return Err(IntakeError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        reqwest::Url::parse(&self.public_base_url).map_err(|e| {
            IntakeError::InvalidConfig(format!(
                "public_base_url '{}' is not a URL: {}",
                self.public_base_url, e
            ))
        })?;
        Ok(())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.store_root.join(STAGING_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.store_root.join(IMAGES_DIR)
    }

    pub fn annotated_dir(&self) -> PathBuf {
        self.store_root.join(ANNOTATED_DIR)
    }
}

/// Builder for [`IntakeConfig`].
#[derive(Debug)]
pub struct IntakeConfigBuilder {
    config: IntakeConfig,
}

impl IntakeConfigBuilder {
    pub fn store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.store_root = root.into();
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into();
        self
    }

    pub fn keywords(mut self, table: KeywordTable) -> Self {
        self.config.keywords = table;
        self
    }

    pub fn routing(mut self, table: RoutingTable) -> Self {
        self.config.routing = table;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_layout(mut self, layout: PageLayout) -> Self {
        self.config.image_layout = layout;
        self
    }

    pub fn ocr_scope(mut self, scope: OcrScope) -> Self {
        self.config.ocr_scope = scope;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn preprocess(mut self, opts: PreprocessOptions) -> Self {
        self.config.preprocess = opts;
        self
    }

    pub fn annotation(mut self, style: AnnotationStyle) -> Self {
        self.config.annotation = style;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn dispatch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.dispatch_timeout_secs = secs;
        self
    }

    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.config.webhook_url = Some(url.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IntakeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

/// Ordered list of company keywords. Order is significant: the first
/// keyword found on the page wins, even if a later one is more specific.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordTable(Vec<String>);

impl KeywordTable {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keywords.into_iter().map(Into::into).collect())
    }

    /// Parse a comma-separated list, dropping blank entries.
    pub fn from_csv(s: &str) -> Self {
        Self::new(
            s.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty()),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new([
            "Benham",
            "CBRE",
            "Chestertons",
            "Cluttons",
            "GCP",
            "Haart",
            "Hamptons",
            "KFH",
            "marshandparsons",
            "MyLako",
            "Savills",
            "Squires",
            "APW",
            "winkworth",
            "Streets Ahead",
            "metro-village",
            "alandemaid",
            "bairstoweves",
            "gpees",
            "Mann",
            "LCP",
            "Foxtons",
            "Cole",
            "Chase Buchanan\u{2019}s",
            "Featherstone",
        ])
    }
}

/// Maps a company identity to the identifier of its extraction endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingTable {
    /// Endpoint used when the company has no entry.
    pub fallback: String,
    pub routes: BTreeMap<String, String>,
}

impl RoutingTable {
    /// Endpoint identifier for `company`, or the fallback.
    pub fn endpoint_for(&self, company: &str) -> &str {
        self.routes
            .get(company)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        let routes = [
            ("Benham", "benhamreeves_repair"),
            ("CBRE", "cbre_repair"),
            ("Chestertons", "chestertons_repair"),
            ("Cluttons", "cluttons_repair"),
            ("Countrywide", "countrywide_repair"),
            ("GCP", "gcp_repair"),
            ("Haart", "haart_repair"),
            ("Hamptons", "hamptons_repair"),
            ("KFH", "kfh_repair"),
            ("Mash_and_Parson", "mashandparson_repair"),
            ("marshandparsons", "mashandparson_repair"),
            ("MyLako", "mylako_repair"),
            ("Savills_Picture_House", "savillspicturehouse_repair"),
            ("Savills", "savillspicturehouse_repair"),
            ("Squires_Estates", "squiresestates_repair"),
            ("Squires", "squiresestates_repair"),
            ("APW", "apw_repair"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            fallback: "default_repair".to_string(),
            routes,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How rasterised pages are written to the `Images/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLayout {
    /// One PNG per page (default).
    #[default]
    PerPage,
    /// One PNG with all pages stacked top-to-bottom.
    Merged,
}

/// Which pages are sent to OCR and annotated.
///
/// Exactly one annotated artifact is produced per document either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrScope {
    /// Only the first page (default). Work orders carry their fields there.
    /// Page 1 is read on its own in both layouts, so a merged document is
    /// not OCR'd beyond its first page.
    #[default]
    FirstPage,
    /// Every page. With [`PageLayout::Merged`] the merged image is OCR'd once;
    /// with [`PageLayout::PerPage`] pages are OCR'd independently and the
    /// annotated pages are stacked.
    AllPages,
}

/// Whether a failed annotation aborts the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationPolicy {
    /// Continue with no artifact and no text.
    #[default]
    Optional,
    /// Abort with `OcrUnavailable`; nothing is archived.
    Required,
}

/// Parameters of the OCR preprocessing chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Odd neighbourhood size for the Gaussian adaptive threshold. Default: 11.
    pub threshold_block_size: u32,
    /// Constant subtracted from the weighted local mean. Default: 2.
    pub threshold_c: f32,
    /// Non-local-means filter strength. Default: 30.
    pub denoise_h: f32,
    /// Odd patch size compared between pixels. Default: 7.
    pub denoise_template_window: u32,
    /// Odd search area around each pixel. Default: 21.
    pub denoise_search_window: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            threshold_block_size: 11,
            threshold_c: 2.0,
            denoise_h: 30.0,
            denoise_template_window: 7,
            denoise_search_window: 21,
        }
    }
}

/// Look of the annotated overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    /// RGBA colour of the token boxes. Default: green.
    pub box_color: [u8; 4],
    /// RGBA colour of the token labels. Default: blue.
    pub text_color: [u8; 4],
    /// Box stroke in pixels. Default: 2.
    pub thickness: u32,
    /// Label height in pixels. Default: 16.
    pub font_scale: f32,
    /// TrueType font used for labels. Labels are skipped when unset.
    pub font_path: Option<PathBuf>,
}

impl AnnotationStyle {
    pub(crate) fn box_rgba(&self) -> Rgba<u8> {
        Rgba(self.box_color)
    }

    pub(crate) fn text_rgba(&self) -> Rgba<u8> {
        Rgba(self.text_color)
    }
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_color: [0, 255, 0, 255],
            text_color: [0, 0, 255, 255],
            thickness: 2,
            font_scale: 16.0,
            font_path: None,
        }
    }
}
