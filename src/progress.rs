//! Progress-callback trait for per-stage intake events.
//!
//! Inject an [`Arc<dyn IntakeProgressCallback>`] via
//! [`crate::config::IntakeConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves a document through its stages. The CLI uses
//! it to drive a spinner; a server could forward it to metrics.
//!
//! # Example
//!
//! ```rust
//! use workorder_intake::{IntakeConfig, IntakeProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl IntakeProgressCallback for Printer {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = IntakeConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn IntakeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Classify,
    Render,
    Annotate,
    Archive,
    Dispatch,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Intake,
        Stage::Classify,
        Stage::Render,
        Stage::Annotate,
        Stage::Archive,
        Stage::Dispatch,
    ];

    /// 1-based position in [`Stage::ALL`].
    pub fn number(self) -> usize {
        Stage::ALL
            .iter()
            .position(|s| *s == self)
            .map_or(Stage::ALL.len(), |i| i + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Intake => "intake",
            Stage::Classify => "classify",
            Stage::Render => "render",
            Stage::Annotate => "annotate",
            Stage::Archive => "archive",
            Stage::Dispatch => "dispatch",
        };
        f.pad(s)
    }
}

/// Called by the pipeline around each stage.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`
/// because one pipeline instance serves concurrent requests.
pub trait IntakeProgressCallback: Send + Sync {
    /// Called just before a stage starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage fails, or degrades (optional annotation, dispatch).
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl IntakeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IntakeConfig`].
pub type ProgressCallback = Arc<dyn IntakeProgressCallback>;
