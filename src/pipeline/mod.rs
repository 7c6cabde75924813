//! Pipeline stages for work-order intake.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the external collaborators (pdfium, OCR, extraction, webhook)
//! stay behind traits.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ classify ──▶ render ──▶ preprocess ──▶ annotate ──▶ archive ──▶ dispatch
//! (stage)    (keywords)   (pdfium)   (threshold,    (OCR +       (versioned  (URLs, extract,
//!                                      denoise)      overlay)      rename)     webhook)
//! ```
//!
//! 1. [`intake`]     validate the upload and write it to the staging directory
//! 2. [`classify`]   match first-page text against the ordered keyword table
//! 3. [`render`]     rasterise pages in `spawn_blocking`; optional vertical merge
//! 4. [`preprocess`] grayscale, Gaussian adaptive threshold, non-local-means
//! 5. [`annotate`]   OCR the preprocessed bitmap, draw boxes on the original
//! 6. [`archive`]    move the staged PDF to a collision-free versioned name
//! 7. [`dispatch`]   public URLs, routed field extraction, webhook delivery
//!
//! [`encode`] holds the PNG/base64 helpers the OCR engines share.

pub mod annotate;
pub mod archive;
pub mod classify;
pub mod dispatch;
pub mod encode;
pub mod intake;
pub mod preprocess;
pub mod render;
