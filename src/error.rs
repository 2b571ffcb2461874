//! # Error Types
//!
//! The failure taxonomy for a single query run. Disposed settlements are
//! control flow: they are swallowed at the commit boundary and never reach
//! observers. Endpoint failures surface verbatim as the instance error and
//! are never retried. Nothing in this crate is process-fatal.

use thiserror::Error;

/// Failure modes of one asynchronous run.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The settlement arrived after its token was cancelled or its query was
    /// disposed; discarded at commit, never surfaced.
    #[error("settlement discarded: operation aborted or query disposed")]
    Disposed,

    /// The supplied endpoint rejected. Recorded verbatim as the instance
    /// `error`; prior data is left untouched.
    #[error("endpoint failure: {0}")]
    Endpoint(anyhow::Error),
}

impl QueryError {
    /// Check whether this is the internal disposed-settlement signal
    pub fn is_disposed(&self) -> bool {
        matches!(self, QueryError::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_error_display() {
        let err = QueryError::Endpoint(anyhow!("boom"));
        assert_eq!(err.to_string(), "endpoint failure: boom");
        assert!(!err.is_disposed());
        assert!(QueryError::Disposed.is_disposed());
    }
}
