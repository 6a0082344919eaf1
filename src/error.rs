//! Crate-wide error boundary
//!
//! Every public operation returns `Result<T, ErrorKind>`. Component
//! modules keep their own internal error types (`StoreError`,
//! `SearchError`, ...) and the orchestrator converts them into this
//! type at the public boundary, sanitizing messages along the way.

use thiserror::Error;

/// Machine-readable error kind surfaced at the public API boundary.
///
/// Messages carried inside each variant are sanitized: no file paths,
/// no SQL text, no internal schema names.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Size, type, or shape violation. Caller-fixable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced id or profile does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violation (e.g. duplicate profile name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write queue full or reader pool exhausted. Retry with backoff.
    #[error("busy: {0}")]
    Busy(String),

    /// Integrity check failed; caller should recommend restore.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// An optional dependency (ANN backend, embedding model) is
    /// missing; the component fell back and the result is valid but
    /// degraded. Surfaced as a warning, not a hard failure.
    #[error("unavailable (degraded): {0}")]
    Unavailable(String),

    /// Unexpected failure. Always sanitized.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// True for errors that are safe to retry after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Busy(_))
    }

    /// True for errors where the result is still usable, just degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ErrorKind::Unavailable(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Strip anything that looks like a filesystem path or SQL fragment
/// from an internal error message before it crosses the public
/// boundary. Conservative: only called on messages already known to
/// originate from a component, never on user-supplied content.
pub(crate) fn sanitize(message: impl AsRef<str>) -> String {
    let raw = message.as_ref();
    // Collapse anything containing a path separator or SQL keyword
    // down to a generic phrase; callers should log the raw message
    // with `tracing` before calling this, since that's still internal.
    let looks_sensitive = raw.contains('/')
        || raw.contains('\\')
        || raw.to_ascii_uppercase().contains("SELECT")
        || raw.to_ascii_uppercase().contains("INSERT")
        || raw.to_ascii_uppercase().contains("UPDATE")
        || raw.to_ascii_uppercase().contains("DELETE FROM");
    if looks_sensitive {
        "internal storage error".to_string()
    } else {
        raw.to_string()
    }
}
