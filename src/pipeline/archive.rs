//! Versioned archival of a staged PDF into its company store.
//!
//! Names are tried in order `{company}_{label}.pdf`, `{company}_{label}_v1.pdf`,
//! `_v2`, … Each candidate is reserved with an exclusive create before the
//! staged file is renamed onto it, so two concurrent archivals can never pick
//! the same name and an existing file is never replaced.

use crate::error::{IntakeError, Result};
use crate::output::{ArchivedDocument, CompanyIdentity, StagedFile};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Upper bound on candidate names tried before giving up.
pub const MAX_VERSION_ATTEMPTS: u32 = 1000;

/// File name for `version` (0 is the bare name).
pub fn versioned_name(company: &CompanyIdentity, label: &str, version: u32) -> String {
    if version == 0 {
        format!("{}_{}.pdf", company, label)
    } else {
        format!("{}_{}_v{}.pdf", company, label, version)
    }
}

/// Move `staged` to `{store_root}/{company}/` under the first free versioned name.
///
/// On failure the staged file is left where it was and no reservation is
/// left behind.
pub async fn archive(
    staged: &StagedFile,
    store_root: &Path,
    company: &CompanyIdentity,
    label: &str,
) -> Result<ArchivedDocument> {
    let dir = store_root.join(company.as_str());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| IntakeError::io(&dir, e))?;

    for version in 0..MAX_VERSION_ATTEMPTS {
        let target = dir.join(versioned_name(company, label, version));
        match reserve(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} taken, trying next version", target.display());
                continue;
            }
            Err(e) => return Err(failed(staged, target, e)),
        }

        if let Err(e) = tokio::fs::rename(&staged.path, &target).await {
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!(
                    "Could not remove reservation {}: {}",
                    target.display(),
                    cleanup
                );
            }
            return Err(failed(staged, target, e));
        }

        info!("Archived {} → {}", staged.path.display(), target.display());
        return Ok(ArchivedDocument {
            path: target,
            company: company.clone(),
            version,
        });
    }

    Err(failed(
        staged,
        dir.join(versioned_name(company, label, MAX_VERSION_ATTEMPTS)),
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name after {} attempts", MAX_VERSION_ATTEMPTS),
        ),
    ))
}

async fn reserve(target: &Path) -> io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
        .map(drop)
}

fn failed(staged: &StagedFile, target: PathBuf, source: io::Error) -> IntakeError {
    IntakeError::ArchivalFailed {
        staged: staged.path.clone(),
        target,
        source,
    }
}
