//! Keyword classification of a document's first page.
//!
//! Table order wins: the keyword list is walked in declared order and the
//! first case-insensitive substring hit is returned. A keyword that is a
//! substring of a later, more specific one shadows it.
//!
//! The one exception is a keyword that matches but sanitises to an empty
//! directory name. It is skipped and the walk continues down the table, so a
//! later keyword can still resolve the document.

use crate::config::KeywordTable;
use crate::error::{IntakeError, PdfFault, Result};
use crate::output::{Classification, CompanyIdentity};
use crate::pipeline::intake::secure_filename;
use crate::pipeline::render::PdfBackend;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Match `text` against `keywords`.
///
/// Keywords that sanitise to an empty token are skipped, since they could
/// not name a directory.
pub fn classify(text: &str, keywords: &KeywordTable) -> Classification {
    let haystack = text.to_lowercase();
    for keyword in keywords.iter() {
        let needle = keyword.to_lowercase();
        if needle.is_empty() || !haystack.contains(&needle) {
            continue;
        }
        let token = secure_filename(keyword);
        if token.is_empty() {
            debug!("Keyword '{}' matched but sanitises to nothing", keyword);
            continue;
        }
        info!("Keyword found: {}", keyword);
        return Classification::Resolved(CompanyIdentity::new(token));
    }
    info!("No keyword found");
    Classification::Unresolved
}

/// Read the first page of `path` through `backend` and classify it.
pub async fn classify_pdf(
    backend: &dyn PdfBackend,
    path: &Path,
    keywords: &KeywordTable,
    timeout_secs: u64,
) -> Result<Classification> {
    let text = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        backend.first_page_text(path),
    )
    .await
    .map_err(|_| IntakeError::UnreadablePdf {
        path: path.to_path_buf(),
        fault: PdfFault::TimedOut,
        detail: format!("text extraction exceeded {}s", timeout_secs),
    })??;
    debug!("First page text: {} chars", text.len());
    Ok(classify(&text, keywords))
}
