//! Error types for the workorder-intake library.
//!
//! Every stage returns [`IntakeError`]. The variants map one-to-one onto the
//! failure classes an operator cares about:
//!
//! * **Client errors** ([`IntakeError::InvalidUpload`],
//!   [`IntakeError::ClassificationUnresolved`], corrupt or empty PDFs) are
//!   terminal and reported as HTTP 400. The staged copy is kept.
//!
//! * **Pipeline errors** (OCR, archival, rendering) are HTTP 500. The staged
//!   file is never deleted on these paths so it can be recovered by hand.
//!
//! * **Dispatch errors** ([`IntakeError::DispatchFailed`]) happen after the
//!   document is durably archived. They are logged and reported in the
//!   outcome, never propagated to the HTTP response.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

/// Why a PDF could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfFault {
    /// Header/xref is broken, or the file is not a PDF at all.
    Corrupt,
    /// The document opened but has zero pages.
    NoPages,
    /// pdfium failed on a specific page.
    RenderFailed,
    /// The backend did not answer within the render timeout.
    TimedOut,
}

/// Which downstream step of dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Extraction,
    Webhook,
}

impl std::fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStage::Extraction => f.write_str("extraction"),
            DispatchStage::Webhook => f.write_str("webhook"),
        }
    }
}

/// All errors returned by the workorder-intake library.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// The upload was rejected before anything touched the disk.
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    /// No keyword from the table appears on the first page.
    #[error("No valid company name found in the PDF '{path}'")]
    ClassificationUnresolved { path: PathBuf },

    /// The document could not be opened, has no pages, or failed to render.
    #[error("Unreadable PDF '{path}' ({fault:?}): {detail}")]
    UnreadablePdf {
        path: PathBuf,
        fault: PdfFault,
        detail: String,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The OCR collaborator failed, timed out, or its input could not be loaded.
    #[error("OCR unavailable: {detail}")]
    OcrUnavailable { detail: String },

    /// The staged file could not be moved into the company store.
    ///
    /// The staged file is left at `staged`.
    #[error("Failed to archive '{staged}' to '{target}': {source}\nThe staged file was left in place.")]
    ArchivalFailed {
        staged: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Extraction or webhook delivery failed after archival.
    #[error("Dispatch failed at {stage}: {detail}")]
    DispatchFailed { stage: DispatchStage, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A filesystem operation outside archival failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or config-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (panicked task, image encoding, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IntakeError::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status code the upload endpoints answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            IntakeError::InvalidUpload { .. } | IntakeError::ClassificationUnresolved { .. } => {
                400
            }
            IntakeError::UnreadablePdf { fault, .. } => match fault {
                PdfFault::Corrupt | PdfFault::NoPages => 400,
                PdfFault::RenderFailed | PdfFault::TimedOut => 500,
            },
            _ => 500,
        }
    }

    /// Short operator-facing message for the JSON `message` field.
    pub fn public_message(&self) -> &'static str {
        match self {
            IntakeError::InvalidUpload { .. } => "Invalid upload",
            IntakeError::ClassificationUnresolved { .. } => {
                "No valid company name found in the PDF"
            }
            IntakeError::UnreadablePdf { .. } => "Unreadable PDF",
            _ => "Failed to process file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_unresolved_is_client_error() {
        let e = IntakeError::ClassificationUnresolved {
            path: PathBuf::from("incoming/a.pdf"),
        };
        assert_eq!(e.status_code(), 400);
        assert_eq!(e.public_message(), "No valid company name found in the PDF");
    }

    #[test]
    fn unreadable_status_depends_on_fault() {
        let corrupt = IntakeError::UnreadablePdf {
            path: "a.pdf".into(),
            fault: PdfFault::Corrupt,
            detail: "bad xref".into(),
        };
        let timeout = IntakeError::UnreadablePdf {
            path: "a.pdf".into(),
            fault: PdfFault::TimedOut,
            detail: "30s".into(),
        };
        assert_eq!(corrupt.status_code(), 400);
        assert_eq!(timeout.status_code(), 500);
    }

    #[test]
    fn archival_failed_mentions_staged_file() {
        let e = IntakeError::ArchivalFailed {
            staged: "incoming/a.pdf".into(),
            target: "CBRE/CBRE_processed.pdf".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "cross-device link"),
        };
        let msg = e.to_string();
        assert!(msg.contains("left in place"), "got: {msg}");
        assert!(msg.contains("cross-device"), "got: {msg}");
        assert_eq!(e.status_code(), 500);
    }

    #[test]
    fn dispatch_failed_display() {
        let e = IntakeError::DispatchFailed {
            stage: DispatchStage::Webhook,
            detail: "HTTP 502".into(),
        };
        assert!(e.to_string().contains("webhook"));
        assert!(e.to_string().contains("502"));
    }
}
