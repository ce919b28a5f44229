// ────────────────────── ERRORS ──────────────────────
// Insufficient data and numerical guards never surface here: they resolve to
// neutral values inside the extractor and filter bank.

use thiserror::Error;

/// Root error type for the metasurface controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetasurfaceError {
    /// Rejected configuration. Raised at construction, before any tick runs.
    #[error("config error: {0}")]
    Config(String),

    /// A frame from the producer failed validation. Extractor state is untouched.
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// The sample producer reported a failure or disconnected.
    #[error("sample source error: {0}")]
    Source(String),

    /// Control worker could not be spawned or is still shutting down.
    #[error("worker error: {0}")]
    Worker(String),
}

pub type MetasurfaceResult<T> = Result<T, MetasurfaceError>;
