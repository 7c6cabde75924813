//! Intake gate: validate an upload and write it to the staging directory.
//!
//! The gate only checks what the client can fix (name, extension, empty
//! body). Whether the bytes are really a PDF is left to the classifier,
//! which has to open the document anyway and reports `UnreadablePdf`.

use crate::error::{IntakeError, Result};
use crate::output::{StagedFile, UploadedDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Reduce a client-supplied name to a safe single path segment.
///
/// Mirrors the common `secure_filename` contract: non-ASCII characters are
/// dropped, path separators and whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed and leading/trailing `.`/`_` are trimmed.
/// The result may be empty.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name.chars().filter(char::is_ascii).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = WHITESPACE.replace_all(spaced.trim(), "_");
    let kept = UNSAFE_CHARS.replace_all(&joined, "");
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Check the name and body of an upload without touching the disk.
///
/// Returns the sanitised filename on success.
pub fn validate_upload(doc: &UploadedDocument) -> Result<String> {
    if doc.filename.trim().is_empty() {
        return Err(IntakeError::InvalidUpload {
            reason: "No selected file".into(),
        });
    }

    let sanitized = secure_filename(&doc.filename);
    let is_pdf = Path::new(&sanitized)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf || sanitized.len() <= ".pdf".len() {
        return Err(IntakeError::InvalidUpload {
            reason: "Only PDF files are allowed.".into(),
        });
    }

    if doc.bytes.is_empty() {
        return Err(IntakeError::InvalidUpload {
            reason: format!("'{}' is empty", doc.filename),
        });
    }

    Ok(sanitized)
}

/// Validate `doc` and write it to `staging_dir/{sanitised name}`.
///
/// An earlier staged file with the same sanitised name is overwritten.
pub async fn stage_upload(staging_dir: &Path, doc: &UploadedDocument) -> Result<StagedFile> {
    let sanitized = validate_upload(doc)?;

    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| IntakeError::io(staging_dir, e))?;

    let path = staging_dir.join(&sanitized);
    tokio::fs::write(&path, &doc.bytes)
        .await
        .map_err(|e| IntakeError::io(&path, e))?;

    let content_hash = content_hash(&doc.bytes);
    debug!(
        "Staged {} bytes as {} (hash {})",
        doc.bytes.len(),
        path.display(),
        content_hash
    );
    info!("Staged upload '{}' → {}", doc.filename, path.display());

    Ok(StagedFile { path, content_hash })
}

/// First 16 hex digits of the BLAKE3 digest.
pub fn content_hash(bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    hex.as_str()[..16].to_string()
}
