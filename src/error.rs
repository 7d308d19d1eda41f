//! Error taxonomy for the export engine.
//!
//! Every variant aborts the running batch: a multi-item stream cannot be split
//! after the fact, so nothing here is retried or skipped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a delta generator.
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// The engine does not understand the requested mode (e.g. omitted header/trailer).
    #[error("operation not supported by generator: {0}")]
    Unsupported(String),

    #[error("generator failed: {0}")]
    Failed(String),

    #[error("generator i/o: {0}")]
    Io(#[from] io::Error),

    #[error("generator cancelled")]
    Cancelled,
}

/// Errors surfaced by the export engine.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Path, uuid or root id unknown to the registry.
    #[error("cannot resolve {what}")]
    Resolution { what: String },

    #[error("snapshot {} is not read-only", path.display())]
    WritableSnapshot { path: PathBuf },

    #[error("no suitable parent found for root id {root_id}")]
    NoSuitableParent { root_id: u64 },

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// Drain side failed: the sink is truncated.
    #[error("failed to transfer stream: {0}")]
    Transfer(#[source] io::Error),

    #[error("allocation failed while growing {0}")]
    Allocation(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("export cancelled by operator")]
    Cancelled,
}

impl ExportError {
    pub fn resolution(what: impl Into<String>) -> Self {
        ExportError::Resolution { what: what.into() }
    }

    /// Whether the error must abort the whole batch.
    ///
    /// Always true at this layer; kept as a method so callers that wrap the engine
    /// (e.g. a scheduler running several sessions) don't have to encode the policy.
    pub fn is_fatal_for_batch(&self) -> bool {
        match self {
            ExportError::Resolution { .. }
            | ExportError::WritableSnapshot { .. }
            | ExportError::NoSuitableParent { .. }
            | ExportError::Generator(_)
            | ExportError::Transfer(_)
            | ExportError::Allocation(_)
            | ExportError::InvalidArgument(_)
            | ExportError::Cancelled => true,
        }
    }

    /// Generator refused the requested stream mode.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ExportError::Generator(GeneratorError::Unsupported(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let e = ExportError::WritableSnapshot {
            path: PathBuf::from("snaps/a"),
        };
        assert_eq!(e.to_string(), "snapshot snaps/a is not read-only");

        let e = ExportError::from(GeneratorError::Unsupported("omit header".into()));
        assert!(e.is_unsupported());
        assert_eq!(
            e.to_string(),
            "operation not supported by generator: omit header"
        );
    }

    #[test]
    fn every_error_aborts_batch() {
        assert!(ExportError::NoSuitableParent { root_id: 5 }.is_fatal_for_batch());
        assert!(ExportError::Cancelled.is_fatal_for_batch());
    }
}
