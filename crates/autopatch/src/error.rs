//! Run-integrity errors raised by the stages.
//!
//! Item-local problems never surface here; they are recorded on the
//! `RunResult` by the stage that saw them.

use autopatch_common::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("repository metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("update query failed: {0}")]
    Query(String),

    #[error("run interrupted")]
    Interrupted,
}

impl RunError {
    /// Taxonomy member reported as the abort kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::MetadataUnavailable(_) => ErrorKind::MetadataUnavailable,
            RunError::Query(_) => ErrorKind::Collaborator,
            RunError::Interrupted => ErrorKind::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            RunError::MetadataUnavailable("x".into()).kind(),
            ErrorKind::MetadataUnavailable
        );
        assert_eq!(RunError::Query("x".into()).kind(), ErrorKind::Collaborator);
        assert_eq!(RunError::Interrupted.kind(), ErrorKind::Interrupted);
    }
}
