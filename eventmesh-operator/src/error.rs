//! Error abstractions.
//!
//! Reconcile errors travel as `anyhow::Error`. The marker types here are recognised anywhere in
//! an error's chain, so stages may freely wrap them with additional context.

/// An error which will not be resolved by retrying the same reconcile pass.
#[derive(Debug, thiserror::Error)]
#[error("non-recoverable error: {0}")]
pub struct NonRecoverableError(pub String);

/// Components installed by a reconcile pass are not ready yet.
#[derive(Debug, thiserror::Error)]
#[error("not ready: {0}")]
pub struct NotReadyError(pub String);

/// Errors returned by the cluster apply/delete client.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The targeted object does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The cluster serves no API for the object's group, version & kind.
    #[error("no matching API for {kind} in {api_version}")]
    NoMatchingApi { api_version: String, kind: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClusterError {
    /// Check if this error may be ignored while deleting objects.
    pub fn is_ignorable_on_delete(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NoMatchingApi { .. })
    }
}

/// Check if the given error is marked as non-recoverable.
pub fn is_non_recoverable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<NonRecoverableError>())
}

/// Find a not-ready marker in the given error's chain.
pub fn as_not_ready(err: &anyhow::Error) -> Option<&NotReadyError> {
    err.chain().find_map(|cause| cause.downcast_ref::<NotReadyError>())
}
