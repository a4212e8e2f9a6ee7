//! Error types for the gantry controller

use thiserror::Error;

/// Main error type for gantry operations
///
/// Variants are split along the reconciler's failure policy: [`Error::Capacity`]
/// and [`Error::List`] abort the current tick (the next tick is the retry),
/// while [`Error::Patch`] is absorbed per runner set within a tick.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster capacity could not be calculated
    #[error("capacity calculation failed: {0}")]
    Capacity(String),

    /// Runner sets could not be listed
    #[error("runner set listing failed: {0}")]
    List(String),

    /// A single runner set update failed
    #[error("failed to patch runner set '{name}': {reason}")]
    Patch {
        /// Name of the runner set that failed to update
        name: String,
        /// Underlying failure description
        reason: String,
    },
}

impl Error {
    /// Create a capacity error with the given message
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    /// Create a listing error with the given message
    pub fn list(msg: impl Into<String>) -> Self {
        Self::List(msg.into())
    }

    /// Create a patch error for the named runner set
    pub fn patch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Patch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error aborts the current reconciliation tick
    ///
    /// Patch failures are per-set and never abort a tick; everything else does.
    pub fn aborts_tick(&self) -> bool {
        !matches!(self, Self::Patch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_message() {
        let err = Error::capacity("failed to list nodes: connection refused");
        assert!(err.to_string().contains("capacity calculation failed"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_list_error_message() {
        let err = Error::list("namespace 'ci' not found");
        assert!(err.to_string().contains("runner set listing failed"));
        assert!(err.to_string().contains("ci"));
    }

    #[test]
    fn test_patch_error_names_the_runner_set() {
        let err = Error::patch("arc-large", "conflict");
        assert!(err.to_string().contains("arc-large"));
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn test_tick_abort_policy() {
        assert!(Error::capacity("boom").aborts_tick());
        assert!(Error::list("boom").aborts_tick());
        assert!(!Error::patch("rs", "boom").aborts_tick());
    }
}
